//! Link Registry and Attribution Resolver.
//!
//! The registry owns invite-link records and their usage counters; every
//! approved member that followed a tracked link is counted here. Attribution
//! is deliberately soft: a join that cannot be attributed still goes through,
//! it just lands as [`Attribution::Unattributed`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::database::{Attribution, InviteLink};
use crate::engine::{now_ts, LinkStore};
use crate::error::{Error, Result};
use crate::gateway::Gateway;

/// Owns invite-link records and usage counters.
#[derive(Clone)]
pub struct LinkRegistry {
    store: Arc<dyn LinkStore>,
    gateway: Arc<dyn Gateway>,
}

impl LinkRegistry {
    pub fn new(store: Arc<dyn LinkStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Create a shareable link for the given source label.
    ///
    /// The gateway call comes first; nothing is persisted unless the platform
    /// confirmed the token, so there is no partial record to clean up on
    /// failure.
    pub async fn create(
        &self,
        label: &str,
        creator_id: i64,
        expires_at: Option<i64>,
    ) -> Result<InviteLink> {
        let token = self.gateway.create_invite_link(label, expires_at).await?;

        let link = InviteLink::new(
            token,
            label.to_string(),
            creator_id,
            now_ts(),
            expires_at,
        );
        self.store.insert(&link).await?;

        info!("Created invite link '{}' -> {}", label, link.token);
        Ok(link)
    }

    /// Retire a link. Historical attribution is unaffected.
    pub async fn revoke(&self, token: &str) -> Result<InviteLink> {
        let link = self
            .store
            .by_token(token)
            .await?
            .ok_or(Error::NotFound("invite link"))?;

        self.gateway.revoke_invite_link(token).await?;
        self.store.set_revoked(token).await?;

        info!("Revoked invite link '{}' ({})", link.label, token);
        Ok(link)
    }

    /// Atomically bump the usage counter; returns the new count.
    pub async fn record_usage(&self, token: &str) -> Result<u64> {
        self.store.record_usage(token).await
    }

    pub async fn resolve(&self, token: &str) -> Result<Option<InviteLink>> {
        self.store.by_token(token).await
    }

    pub async fn list(&self) -> Result<Vec<InviteLink>> {
        self.store.all().await
    }

    /// Map a join event's invite token onto an acquisition source.
    ///
    /// Unknown, revoked, and expired tokens resolve to `Unattributed`; the
    /// member is still approved, just without source tracking. The usage
    /// counter is NOT incremented here: the join state machine bumps it only
    /// after its approval write wins, which keeps the counter equal to the
    /// number of attributed members even when the gateway delivers the same
    /// event twice.
    pub async fn attribute(&self, invite_token: Option<&str>) -> Attribution {
        let Some(token) = invite_token else {
            return Attribution::Unattributed;
        };

        match self.store.by_token(token).await {
            Ok(Some(link)) if link.is_usable(now_ts()) => Attribution::Link(link.token),
            Ok(Some(link)) => {
                debug!(
                    "Invite link '{}' is revoked or expired; join left unattributed",
                    link.label
                );
                Attribution::Unattributed
            }
            Ok(None) => {
                debug!("Unknown invite token {}; join left unattributed", token);
                Attribution::Unattributed
            }
            Err(err) => {
                // Attribution failure must never block approval.
                warn!("Attribution lookup failed for {}: {}", token, err);
                Attribution::Unattributed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::{FakeGateway, MemoryStore};

    fn registry(store: &Arc<MemoryStore>, gateway: &Arc<FakeGateway>) -> LinkRegistry {
        LinkRegistry::new(store.clone(), gateway.clone())
    }

    #[tokio::test]
    async fn create_persists_after_gateway_confirms() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let registry = registry(&store, &gateway);

        let link = registry.create("Instagram", 42, None).await.unwrap();

        assert_eq!(link.label, "Instagram");
        assert_eq!(link.uses, 0);
        assert!(registry.resolve(&link.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_persists_nothing_when_gateway_fails() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_link_creation();
        let registry = registry(&store, &gateway);

        let err = registry.create("Instagram", 42, None).await.unwrap_err();

        assert!(matches!(err, Error::GatewayUnavailable(_)));
        assert!(store.links_is_empty());
    }

    #[tokio::test]
    async fn revoke_unknown_token_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let registry = registry(&store, &gateway);

        let err = registry.revoke("https://t.me/+nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn usage_counter_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let registry = registry(&store, &gateway);

        let link = registry.create("Blog", 1, None).await.unwrap();

        assert_eq!(registry.record_usage(&link.token).await.unwrap(), 1);
        assert_eq!(registry.record_usage(&link.token).await.unwrap(), 2);
        assert_eq!(registry.record_usage(&link.token).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn attribute_resolves_usable_links_only() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let registry = registry(&store, &gateway);

        let live = registry.create("Live", 1, None).await.unwrap();
        let revoked = registry.create("Old", 1, None).await.unwrap();
        registry.revoke(&revoked.token).await.unwrap();
        assert_eq!(gateway.revoked(), vec![revoked.token.clone()]);
        let expired = registry.create("Expired", 1, Some(now_ts() - 60)).await.unwrap();

        assert_eq!(
            registry.attribute(Some(&live.token)).await,
            Attribution::Link(live.token.clone())
        );
        assert_eq!(
            registry.attribute(Some(&revoked.token)).await,
            Attribution::Unattributed
        );
        assert_eq!(
            registry.attribute(Some(&expired.token)).await,
            Attribution::Unattributed
        );
        assert_eq!(
            registry.attribute(Some("https://t.me/+unknown")).await,
            Attribution::Unattributed
        );
        assert_eq!(registry.attribute(None).await, Attribution::Unattributed);
    }
}
