//! Invite-link repository over MongoDB.
//!
//! The usage counter only ever moves through `$inc`, never through
//! read-modify-write in application code, so concurrent joins on the same
//! link cannot lose increments.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::Collection;
use tracing::debug;

use crate::cache::{CacheConfig, TypedCache};
use crate::database::{Database, InviteLink};
use crate::engine::LinkStore;
use crate::error::{Error, Result};

/// Repository for invite-link documents, cached by token.
pub struct LinkRepository {
    collection: Collection<InviteLink>,
    cache: TypedCache<String, InviteLink>,
}

impl LinkRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("invite_links"),
            cache: TypedCache::new(
                CacheConfig::with_capacity(1_000).ttl(Duration::from_secs(300)),
            ),
        }
    }
}

#[async_trait]
impl LinkStore for LinkRepository {
    async fn insert(&self, link: &InviteLink) -> Result<()> {
        self.collection.insert_one(link).await?;
        self.cache.insert(link.token.clone(), link.clone());
        debug!("Stored invite link {} ({})", link.token, link.label);
        Ok(())
    }

    async fn by_token(&self, token: &str) -> Result<Option<InviteLink>> {
        if let Some(link) = self.cache.get(&token.to_string()) {
            return Ok(Some(link));
        }

        let result = self.collection.find_one(doc! { "token": token }).await?;

        if let Some(link) = &result {
            self.cache.insert(link.token.clone(), link.clone());
        }

        Ok(result)
    }

    async fn record_usage(&self, token: &str) -> Result<u64> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .collection
            .find_one_and_update(doc! { "token": token }, doc! { "$inc": { "uses": 1 } })
            .with_options(options)
            .await?
            .ok_or(Error::NotFound("invite link"))?;

        self.cache.insert(updated.token.clone(), updated.clone());
        Ok(updated.uses)
    }

    async fn set_revoked(&self, token: &str) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "token": token },
                doc! { "$set": { "revoked": true } },
            )
            .await?;

        self.cache.invalidate(&token.to_string());
        Ok(result.matched_count == 1)
    }

    async fn all(&self) -> Result<Vec<InviteLink>> {
        let mut cursor = self.collection.find(doc! {}).await?;

        let mut links = Vec::new();
        while let Some(link) = cursor.next().await {
            links.push(link?);
        }
        Ok(links)
    }
}

impl Clone for LinkRepository {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            cache: self.cache.clone(),
        }
    }
}
