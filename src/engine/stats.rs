//! Statistics Aggregator.
//!
//! Read-only path: folds current member and invite-link state into the
//! aggregate administrators see. No caching; calls are admin-triggered and
//! rare.

use std::collections::HashMap;

use crate::engine::{LinkStore, MemberStore};
use crate::error::Result;

/// One invite link's slice of the member base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkBreakdown {
    pub token: String,
    pub label: String,
    /// Usage counter maintained by the Link Registry.
    pub uses: u64,
    /// Members currently attributed to this link (any status).
    pub members: u64,
    pub revoked: bool,
}

/// The aggregate returned to administrators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Distinct members ever observed.
    pub total: u64,
    pub approved: u64,
    pub pending: u64,
    pub rejected: u64,
    pub left: u64,
    /// Members that joined without a resolvable source.
    pub unattributed: u64,
    pub per_link: Vec<LinkBreakdown>,
}

/// Fold member and link state into the admin-facing aggregate.
pub async fn compute_stats(
    members: &dyn MemberStore,
    links: &dyn LinkStore,
) -> Result<ChannelStats> {
    let counts = members.status_counts().await?;
    let attribution: HashMap<String, u64> =
        members.attribution_counts().await?.into_iter().collect();
    let attributed_total: u64 = attribution.values().sum();

    let mut per_link: Vec<LinkBreakdown> = links
        .all()
        .await?
        .into_iter()
        .map(|link| LinkBreakdown {
            members: attribution.get(&link.token).copied().unwrap_or(0),
            token: link.token,
            label: link.label,
            uses: link.uses,
            revoked: link.revoked,
        })
        .collect();
    per_link.sort_by(|a, b| b.members.cmp(&a.members).then(a.label.cmp(&b.label)));

    Ok(ChannelStats {
        total: counts.total(),
        approved: counts.approved,
        pending: counts.pending,
        rejected: counts.rejected,
        left: counts.left,
        unattributed: counts.total().saturating_sub(attributed_total),
        per_link,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::join::{JoinEngine, JoinPolicy};
    use crate::engine::links::LinkRegistry;
    use crate::engine::testkit::{immediate_retry, FakeGateway, MemoryStore};
    use crate::engine::{JoinEvent, LeaveEvent};

    fn join_event(user_id: i64, token: Option<&str>) -> JoinEvent {
        JoinEvent {
            user_id,
            username: None,
            first_name: format!("User {}", user_id),
            last_name: None,
            invite_token: token.map(String::from),
        }
    }

    #[tokio::test]
    async fn totals_add_up_to_distinct_members() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let registry = LinkRegistry::new(store.clone(), gateway.clone());
        let engine = JoinEngine::new(
            store.clone(),
            registry.clone(),
            gateway.clone(),
            JoinPolicy::new([500u64]),
            immediate_retry(1),
            None,
        );

        let link = registry.create("source-A", 1, None).await.unwrap();

        // Two attributed joins, one organic, one rejection, one leaver.
        for user_id in [1, 2] {
            engine
                .handle_join(join_event(user_id, Some(&link.token)))
                .await
                .unwrap();
        }
        engine.handle_join(join_event(3, None)).await.unwrap();
        engine.handle_join(join_event(500, None)).await.unwrap();
        engine.handle_join(join_event(4, None)).await.unwrap();
        engine.handle_leave(LeaveEvent { user_id: 4 }).await.unwrap();

        let stats = compute_stats(store.as_ref(), store.as_ref()).await.unwrap();

        assert_eq!(stats.total, 5);
        assert_eq!(
            stats.approved + stats.pending + stats.rejected + stats.left,
            stats.total
        );
        assert_eq!(stats.approved, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.left, 1);
        assert_eq!(stats.unattributed, 3);

        let breakdown = &stats.per_link[0];
        assert_eq!(breakdown.label, "source-A");
        assert_eq!(breakdown.uses, 2);
        assert_eq!(breakdown.members, 2);
    }

    #[tokio::test]
    async fn links_without_members_still_show_up() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let registry = LinkRegistry::new(store.clone(), gateway.clone());

        registry.create("Unused", 1, None).await.unwrap();

        let stats = compute_stats(store.as_ref(), store.as_ref()).await.unwrap();

        assert_eq!(stats.per_link.len(), 1);
        assert_eq!(stats.per_link[0].members, 0);
        assert_eq!(stats.per_link[0].uses, 0);
    }
}
