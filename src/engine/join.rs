//! Join-Request State Machine.
//!
//! Per (member, request): `Pending → {Approved, Rejected}`, and
//! `Approved → Left` on a leave event. A left or rejected member may
//! re-enter at `Pending` on a new request, reusing the same record.
//!
//! The store is the source of truth: the member transition is persisted
//! first, and only then is the gateway asked to confirm. A confirmation
//! failure after the durable write is retried with backoff and finally
//! downgraded to a delivery warning, never rolled back.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ConfirmRetrySettings;
use crate::database::{Attribution, MemberStatus, MessagePayload};
use crate::engine::links::LinkRegistry;
use crate::engine::{now_ts, GatewayEvent, JoinEvent, LeaveEvent, MemberStore};
use crate::error::Result;
use crate::gateway::Gateway;

/// Outcome of processing a join request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approved,
    /// Duplicate delivery of an already-processed request; absorbed.
    AlreadyApproved,
    Rejected,
}

/// Verdict of the approval policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

/// The approval policy: a pure, synchronous decision over the join event.
///
/// The base policy approves everyone not on the configured deny list.
/// Anything richer slots in here without touching the state machine's
/// persistence contract.
#[derive(Clone, Debug, Default)]
pub struct JoinPolicy {
    denied: HashSet<i64>,
}

impl JoinPolicy {
    pub fn new(denied_user_ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            denied: denied_user_ids.into_iter().map(|id| id as i64).collect(),
        }
    }

    pub fn evaluate(&self, event: &JoinEvent) -> Verdict {
        if self.denied.contains(&event.user_id) {
            Verdict::Reject
        } else {
            Verdict::Approve
        }
    }
}

/// Drives join-request and leave events through the member store.
#[derive(Clone)]
pub struct JoinEngine {
    members: Arc<dyn MemberStore>,
    registry: LinkRegistry,
    gateway: Arc<dyn Gateway>,
    policy: JoinPolicy,
    retry: ConfirmRetrySettings,
    welcome_message: Option<String>,
}

impl JoinEngine {
    pub fn new(
        members: Arc<dyn MemberStore>,
        registry: LinkRegistry,
        gateway: Arc<dyn Gateway>,
        policy: JoinPolicy,
        retry: ConfirmRetrySettings,
        welcome_message: Option<String>,
    ) -> Self {
        Self {
            members,
            registry,
            gateway,
            policy,
            retry,
            welcome_message,
        }
    }

    /// Entry point for gateway events.
    pub async fn handle_event(&self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::JoinRequest(join) => {
                self.handle_join(join).await?;
            }
            GatewayEvent::Left(leave) => self.handle_leave(leave).await?,
        }
        Ok(())
    }

    /// Process one join request.
    ///
    /// Duplicate gateway deliveries are absorbed twice over: an
    /// already-approved member short-circuits here, and a lost race on the
    /// `pending → approved` conditional update reports `AlreadyApproved`
    /// without a second usage increment.
    pub async fn handle_join(&self, event: JoinEvent) -> Result<Decision> {
        if let Some(existing) = self.members.get(event.user_id).await? {
            if existing.status == MemberStatus::Approved {
                debug!(
                    "Duplicate join request from approved member {}; absorbed",
                    event.user_id
                );
                return Ok(Decision::AlreadyApproved);
            }
        }

        self.members.upsert_pending(&event, now_ts()).await?;

        match self.policy.evaluate(&event) {
            Verdict::Approve => self.approve(event).await,
            Verdict::Reject => self.reject(event).await,
        }
    }

    async fn approve(&self, event: JoinEvent) -> Result<Decision> {
        let attribution = self.registry.attribute(event.invite_token.as_deref()).await;

        let won = self
            .members
            .approve(event.user_id, &attribution, now_ts())
            .await?;
        if !won {
            debug!(
                "Member {} was no longer pending; approval absorbed",
                event.user_id
            );
            return Ok(Decision::AlreadyApproved);
        }

        // Count the usage only after winning the approval write, so N
        // deliveries of one event still move the counter once.
        if let Attribution::Link(token) = &attribution {
            if let Err(err) = self.registry.record_usage(token).await {
                error!("Usage count for {} failed: {}", token, err);
            }
        }

        if let Err(err) = self.confirm(event.user_id, true).await {
            warn!(
                "Approval of {} is durable but the gateway confirmation failed: {}",
                event.user_id, err
            );
        }

        self.send_welcome(event.user_id).await;

        info!(
            "Approved member {} ({}), source {:?}",
            event.user_id,
            event.first_name,
            attribution.token().unwrap_or("unattributed"),
        );
        Ok(Decision::Approved)
    }

    async fn reject(&self, event: JoinEvent) -> Result<Decision> {
        let won = self.members.reject(event.user_id, now_ts()).await?;
        if !won {
            debug!(
                "Member {} was no longer pending; rejection absorbed",
                event.user_id
            );
            return Ok(Decision::AlreadyApproved);
        }

        if let Err(err) = self.confirm(event.user_id, false).await {
            warn!(
                "Rejection of {} is durable but the gateway confirmation failed: {}",
                event.user_id, err
            );
        }

        info!("Rejected join request from {}", event.user_id);
        Ok(Decision::Rejected)
    }

    /// Process a leave event. Duplicates and leaves of never-approved users
    /// are absorbed.
    pub async fn handle_leave(&self, event: LeaveEvent) -> Result<()> {
        let marked = self.members.mark_left(event.user_id, now_ts()).await?;
        if marked {
            info!("Member {} left the channel", event.user_id);
        } else {
            debug!("Leave event for {} matched no approved member", event.user_id);
        }
        Ok(())
    }

    /// Issue the approve/decline confirmation call with bounded retry.
    async fn confirm(&self, user_id: i64, approve: bool) -> Result<()> {
        let mut delay = self.retry.initial_backoff;
        let mut attempt = 1u32;

        loop {
            let result = if approve {
                self.gateway.approve_join(user_id).await
            } else {
                self.gateway.decline_join(user_id).await
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let wait = err.retry_hint().unwrap_or(delay);
                    debug!(
                        "Confirmation for {} failed (attempt {}), retrying in {:?}",
                        user_id, attempt, wait
                    );
                    sleep(wait).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_welcome(&self, user_id: i64) {
        let Some(text) = &self.welcome_message else {
            return;
        };

        let payload = MessagePayload::text(text.clone());
        if let Err(err) = self.gateway.send_direct(user_id, &payload).await {
            warn!("Welcome message to {} not delivered: {}", user_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::{immediate_retry, FakeGateway, MemoryStore, SendMode};

    fn join_event(user_id: i64, token: Option<&str>) -> JoinEvent {
        JoinEvent {
            user_id,
            username: Some(format!("user{}", user_id)),
            first_name: format!("User {}", user_id),
            last_name: None,
            invite_token: token.map(String::from),
        }
    }

    fn engine(
        store: &Arc<MemoryStore>,
        gateway: &Arc<FakeGateway>,
        policy: JoinPolicy,
    ) -> JoinEngine {
        JoinEngine::new(
            store.clone(),
            LinkRegistry::new(store.clone(), gateway.clone()),
            gateway.clone(),
            policy,
            immediate_retry(3),
            Some("Welcome!".to_string()),
        )
    }

    #[tokio::test]
    async fn unseen_user_ends_up_with_exactly_one_approved_record() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());

        let decision = engine.handle_join(join_event(100, None)).await.unwrap();

        assert_eq!(decision, Decision::Approved);
        assert_eq!(store.member_count(), 1);
        let member = store.member(100).unwrap();
        assert_eq!(member.status, MemberStatus::Approved);
        assert_eq!(member.attribution(), Attribution::Unattributed);
        assert_eq!(gateway.approved(), vec![100]);
    }

    #[tokio::test]
    async fn duplicate_join_request_is_absorbed() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());
        let registry = LinkRegistry::new(store.clone(), gateway.clone());
        let link = registry.create("Blog", 1, None).await.unwrap();

        let first = engine
            .handle_join(join_event(100, Some(&link.token)))
            .await
            .unwrap();
        let second = engine
            .handle_join(join_event(100, Some(&link.token)))
            .await
            .unwrap();

        assert_eq!(first, Decision::Approved);
        assert_eq!(second, Decision::AlreadyApproved);
        assert_eq!(store.member_count(), 1);
        assert_eq!(gateway.approved(), vec![100]);
        assert_eq!(store.link(&link.token).unwrap().uses, 1);
    }

    #[tokio::test]
    async fn concurrent_joins_on_one_link_count_every_attribution() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());
        let registry = LinkRegistry::new(store.clone(), gateway.clone());
        let link = registry.create("source-A", 1, None).await.unwrap();

        let mut tasks = Vec::new();
        for user_id in 0..25 {
            let engine = engine.clone();
            let token = link.token.clone();
            tasks.push(tokio::spawn(async move {
                engine.handle_join(join_event(user_id, Some(&token))).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Decision::Approved);
        }

        assert_eq!(store.link(&link.token).unwrap().uses, 25);
        assert_eq!(store.attributed_to(&link.token), 25);
    }

    #[tokio::test]
    async fn concurrent_duplicates_of_one_event_count_once() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());
        let registry = LinkRegistry::new(store.clone(), gateway.clone());
        let link = registry.create("source-A", 1, None).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let token = link.token.clone();
            tasks.push(tokio::spawn(async move {
                engine.handle_join(join_event(7, Some(&token))).await
            }));
        }
        let mut approved = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == Decision::Approved {
                approved += 1;
            }
        }

        assert_eq!(approved, 1);
        assert_eq!(store.member_count(), 1);
        assert_eq!(store.link(&link.token).unwrap().uses, 1);
    }

    #[tokio::test]
    async fn three_joins_via_source_a_attribute_three_members() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());
        let registry = LinkRegistry::new(store.clone(), gateway.clone());
        let link = registry.create("source-A", 1, None).await.unwrap();

        for user_id in [1, 2, 3] {
            let decision = engine
                .handle_join(join_event(user_id, Some(&link.token)))
                .await
                .unwrap();
            assert_eq!(decision, Decision::Approved);
        }

        assert_eq!(store.link(&link.token).unwrap().uses, 3);
        assert_eq!(store.attributed_to(&link.token), 3);
    }

    #[tokio::test]
    async fn denied_user_is_rejected_without_attribution() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::new([666u64]));
        let registry = LinkRegistry::new(store.clone(), gateway.clone());
        let link = registry.create("source-A", 1, None).await.unwrap();

        let decision = engine
            .handle_join(join_event(666, Some(&link.token)))
            .await
            .unwrap();

        assert_eq!(decision, Decision::Rejected);
        assert_eq!(store.member(666).unwrap().status, MemberStatus::Rejected);
        assert_eq!(gateway.declined(), vec![666]);
        assert_eq!(store.link(&link.token).unwrap().uses, 0);
    }

    #[tokio::test]
    async fn leave_then_rejoin_reuses_the_same_record() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());

        engine.handle_join(join_event(100, None)).await.unwrap();
        engine.handle_leave(LeaveEvent { user_id: 100 }).await.unwrap();
        assert_eq!(store.member(100).unwrap().status, MemberStatus::Left);

        let decision = engine.handle_join(join_event(100, None)).await.unwrap();

        assert_eq!(decision, Decision::Approved);
        assert_eq!(store.member_count(), 1);
        assert_eq!(store.member(100).unwrap().status, MemberStatus::Approved);
    }

    #[tokio::test]
    async fn duplicate_leave_events_are_absorbed() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let engine = engine(&store, &gateway, JoinPolicy::default());

        engine.handle_join(join_event(100, None)).await.unwrap();
        engine.handle_leave(LeaveEvent { user_id: 100 }).await.unwrap();
        engine.handle_leave(LeaveEvent { user_id: 100 }).await.unwrap();

        assert_eq!(store.member(100).unwrap().status, MemberStatus::Left);
    }

    #[tokio::test]
    async fn confirmation_failure_does_not_roll_back_the_decision() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_confirmations();
        let engine = engine(&store, &gateway, JoinPolicy::default());

        let decision = engine.handle_join(join_event(100, None)).await.unwrap();

        assert_eq!(decision, Decision::Approved);
        assert_eq!(store.member(100).unwrap().status, MemberStatus::Approved);
        // Bounded retry: the confirmation was attempted exactly max_attempts
        // times before being downgraded to a warning.
        assert_eq!(gateway.approve_attempts(), 3);
    }

    #[tokio::test]
    async fn welcome_failure_is_soft() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_send_mode(100, SendMode::Permanent);
        let engine = engine(&store, &gateway, JoinPolicy::default());

        let decision = engine.handle_join(join_event(100, None)).await.unwrap();

        assert_eq!(decision, Decision::Approved);
        assert_eq!(store.member(100).unwrap().status, MemberStatus::Approved);
    }
}
