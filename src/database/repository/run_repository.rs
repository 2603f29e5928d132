//! Broadcast-run repository over MongoDB.
//!
//! Outcome entries live inside the run document and are written one at a
//! time through `$set` on `outcomes.<member id>`, which makes progress
//! persistence idempotent: resuming a run re-writes at most the entry that
//! was in flight when the process stopped.

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, Document};
use mongodb::Collection;
use tracing::debug;

use crate::database::{BroadcastRun, Database, RecipientOutcome, RunStatus};
use crate::engine::RunStore;
use crate::error::Result;

/// Repository for broadcast-run documents.
pub struct RunRepository {
    collection: Collection<BroadcastRun>,
}

impl RunRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("broadcasts"),
        }
    }
}

#[async_trait]
impl RunStore for RunRepository {
    async fn insert(&self, run: &BroadcastRun) -> Result<()> {
        self.collection.insert_one(run).await?;
        debug!("Stored broadcast run {} ({} recipients)", run.id, run.total);
        Ok(())
    }

    async fn get(&self, id: ObjectId) -> Result<Option<BroadcastRun>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn record_outcome(
        &self,
        id: ObjectId,
        member_id: i64,
        outcome: &RecipientOutcome,
    ) -> Result<()> {
        let mut set = Document::new();
        set.insert(
            format!("outcomes.{}", member_id),
            mongodb::bson::to_bson(outcome)?,
        );

        self.collection
            .update_one(doc! { "_id": id }, doc! { "$set": set })
            .await?;
        Ok(())
    }

    async fn set_status(&self, id: ObjectId, from: &[RunStatus], to: RunStatus) -> Result<bool> {
        let from: Vec<Bson> = from.iter().map(|s| Bson::from(s.as_str())).collect();

        let result = self
            .collection
            .update_one(
                doc! { "_id": id, "status": { "$in": from } },
                doc! { "$set": { "status": to.as_str() } },
            )
            .await?;

        Ok(result.modified_count == 1)
    }

    async fn due_runs(&self, now: i64) -> Result<Vec<BroadcastRun>> {
        let filter = doc! { "$or": [
            { "status": RunStatus::InProgress.as_str() },
            {
                "status": RunStatus::Pending.as_str(),
                "$or": [
                    { "scheduled_at": { "$exists": false } },
                    { "scheduled_at": Bson::Null },
                    { "scheduled_at": { "$lte": now } },
                ],
            },
        ] };

        let mut cursor = self.collection.find(filter).await?;

        let mut runs = Vec::new();
        while let Some(run) = cursor.next().await {
            runs.push(run?);
        }
        Ok(runs)
    }
}

impl Clone for RunRepository {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
        }
    }
}
