//! Member repository over MongoDB.
//!
//! Every status transition is a conditional update filtered on the expected
//! prior status. Concurrent events for the same member therefore serialize at
//! the storage layer: the loser matches zero documents and reports `false`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::doc;
use mongodb::options::UpdateOptions;
use mongodb::Collection;
use tracing::debug;

use crate::cache::{CacheConfig, TypedCache};
use crate::database::{Attribution, Database, Member, MemberStatus, StatusCounts};
use crate::engine::{JoinEvent, MemberStore};
use crate::error::Result;

/// Repository for member documents.
pub struct MemberRepository {
    collection: Collection<Member>,
    cache: TypedCache<i64, Member>,
}

impl MemberRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("members"),
            cache: TypedCache::new(
                CacheConfig::with_capacity(10_000).ttl(Duration::from_secs(3600)),
            ),
        }
    }

    async fn count_status(&self, status: MemberStatus) -> Result<u64> {
        Ok(self
            .collection
            .count_documents(doc! { "status": status.as_str() })
            .await?)
    }
}

#[async_trait]
impl MemberStore for MemberRepository {
    async fn get(&self, user_id: i64) -> Result<Option<Member>> {
        if let Some(member) = self.cache.get(&user_id) {
            return Ok(Some(member));
        }

        let result = self
            .collection
            .find_one(doc! { "user_id": user_id })
            .await?;

        if let Some(member) = &result {
            self.cache.insert(user_id, member.clone());
        }

        Ok(result)
    }

    async fn upsert_pending(&self, event: &JoinEvent, now: i64) -> Result<()> {
        // First sight creates the document; a repeat sighting only refreshes
        // identity fields. $setOnInsert keeps joined_at at first observation.
        let options = UpdateOptions::builder().upsert(true).build();
        self.collection
            .update_one(
                doc! { "user_id": event.user_id },
                doc! {
                    "$set": {
                        "username": event.username.clone(),
                        "first_name": event.first_name.clone(),
                        "last_name": event.last_name.clone(),
                        "last_seen_at": now,
                    },
                    "$setOnInsert": {
                        "status": MemberStatus::Pending.as_str(),
                        "attributed_link": mongodb::bson::Bson::Null,
                        "joined_at": now,
                    },
                },
            )
            .with_options(options)
            .await?;

        // A left or rejected member re-enters the state machine at pending.
        self.collection
            .update_one(
                doc! {
                    "user_id": event.user_id,
                    "status": { "$in": [
                        MemberStatus::Left.as_str(),
                        MemberStatus::Rejected.as_str(),
                    ] },
                },
                doc! { "$set": { "status": MemberStatus::Pending.as_str() } },
            )
            .await?;

        self.cache.invalidate(&event.user_id);
        debug!("Upserted pending member {}", event.user_id);
        Ok(())
    }

    async fn approve(&self, user_id: i64, attribution: &Attribution, now: i64) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "user_id": user_id, "status": MemberStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": MemberStatus::Approved.as_str(),
                    "attributed_link": attribution.token(),
                    "approved_at": now,
                    "last_seen_at": now,
                } },
            )
            .await?;

        self.cache.invalidate(&user_id);
        Ok(result.modified_count == 1)
    }

    async fn reject(&self, user_id: i64, now: i64) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "user_id": user_id, "status": MemberStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": MemberStatus::Rejected.as_str(),
                    "last_seen_at": now,
                } },
            )
            .await?;

        self.cache.invalidate(&user_id);
        Ok(result.modified_count == 1)
    }

    async fn mark_left(&self, user_id: i64, now: i64) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "user_id": user_id, "status": MemberStatus::Approved.as_str() },
                doc! { "$set": {
                    "status": MemberStatus::Left.as_str(),
                    "left_at": now,
                } },
            )
            .await?;

        self.cache.invalidate(&user_id);
        Ok(result.modified_count == 1)
    }

    async fn update_last_seen(&self, user_id: i64, now: i64) -> Result<()> {
        self.collection
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$set": { "last_seen_at": now } },
            )
            .await?;
        self.cache.invalidate(&user_id);
        Ok(())
    }

    async fn approved(&self) -> Result<Vec<Member>> {
        let mut cursor = self
            .collection
            .find(doc! { "status": MemberStatus::Approved.as_str() })
            .await?;

        let mut members = Vec::new();
        while let Some(member) = cursor.next().await {
            members.push(member?);
        }
        Ok(members)
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        Ok(StatusCounts {
            pending: self.count_status(MemberStatus::Pending).await?,
            approved: self.count_status(MemberStatus::Approved).await?,
            rejected: self.count_status(MemberStatus::Rejected).await?,
            left: self.count_status(MemberStatus::Left).await?,
        })
    }

    async fn attribution_counts(&self) -> Result<Vec<(String, u64)>> {
        let pipeline = vec![
            doc! { "$match": { "attributed_link": { "$ne": mongodb::bson::Bson::Null } } },
            doc! { "$group": { "_id": "$attributed_link", "members": { "$sum": 1 } } },
        ];

        let mut cursor = self.collection.aggregate(pipeline).await?;
        let mut counts = Vec::new();
        while let Some(group) = cursor.next().await {
            let group = group?;
            let token = group.get_str("_id").unwrap_or_default().to_string();
            let members = group
                .get_i64("members")
                .unwrap_or_else(|_| group.get_i32("members").map(i64::from).unwrap_or(0));
            counts.push((token, members as u64));
        }
        Ok(counts)
    }
}

impl Clone for MemberRepository {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            cache: self.cache.clone(),
        }
    }
}
