//! Core engine: subscriber lifecycle, attribution, broadcasts, statistics.
//!
//! Engines consume the persistent store through the traits below and the
//! chat platform through [`crate::gateway::Gateway`], so every piece of
//! lifecycle logic runs identically against MongoDB and against the
//! in-memory fakes used in tests.

pub mod broadcast;
pub mod join;
pub mod links;
pub mod stats;

#[cfg(test)]
pub(crate) mod testkit;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::database::{
    Attribution, BroadcastRun, InviteLink, Member, RecipientOutcome, RunStatus, StatusCounts,
};
use crate::error::Result;

/// An inbound event from the chat platform, already reduced to what the
/// engine needs. The gateway may deliver any of these more than once.
#[derive(Clone, Debug)]
pub enum GatewayEvent {
    JoinRequest(JoinEvent),
    Left(LeaveEvent),
}

/// A join request for the managed channel.
#[derive(Clone, Debug)]
pub struct JoinEvent {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    /// The invite-link token the user followed, when the platform reports it.
    pub invite_token: Option<String>,
}

/// A member left (or was removed from) the managed channel.
#[derive(Clone, Debug)]
pub struct LeaveEvent {
    pub user_id: i64,
}

/// Member persistence as consumed by the engines.
///
/// All transitions are conditional on the expected prior status, which is
/// what serializes concurrent events for the same member id.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<Member>>;

    /// Create the member on first sight, or reset a left/rejected member to
    /// pending; refreshes identity fields either way.
    async fn upsert_pending(&self, event: &JoinEvent, now: i64) -> Result<()>;

    /// `pending → approved`, recording the attribution. Returns `false` when
    /// the member was not pending (the event was a duplicate or lost a race).
    async fn approve(&self, user_id: i64, attribution: &Attribution, now: i64) -> Result<bool>;

    /// `pending → rejected`.
    async fn reject(&self, user_id: i64, now: i64) -> Result<bool>;

    /// `approved → left`.
    async fn mark_left(&self, user_id: i64, now: i64) -> Result<bool>;

    async fn update_last_seen(&self, user_id: i64, now: i64) -> Result<()>;

    /// Snapshot of currently approved members.
    async fn approved(&self) -> Result<Vec<Member>>;

    async fn status_counts(&self) -> Result<StatusCounts>;

    /// Member counts grouped by attributed link token.
    async fn attribution_counts(&self) -> Result<Vec<(String, u64)>>;
}

/// Invite-link persistence.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn insert(&self, link: &InviteLink) -> Result<()>;

    async fn by_token(&self, token: &str) -> Result<Option<InviteLink>>;

    /// Atomic increment at the storage layer; returns the new count.
    /// `NotFound` for unknown tokens.
    async fn record_usage(&self, token: &str) -> Result<u64>;

    /// Returns `false` when the token is unknown.
    async fn set_revoked(&self, token: &str) -> Result<bool>;

    async fn all(&self) -> Result<Vec<InviteLink>>;
}

/// Broadcast-run persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: &BroadcastRun) -> Result<()>;

    async fn get(&self, id: ObjectId) -> Result<Option<BroadcastRun>>;

    /// Upsert one recipient's outcome entry by member id.
    async fn record_outcome(
        &self,
        id: ObjectId,
        member_id: i64,
        outcome: &RecipientOutcome,
    ) -> Result<()>;

    /// Conditional status update. Returns `false` when the run was in none of
    /// the `from` states.
    async fn set_status(&self, id: ObjectId, from: &[RunStatus], to: RunStatus) -> Result<bool>;

    /// Runs a processor should pick up at `now`: in-progress ones plus
    /// pending ones whose schedule (if any) is due.
    async fn due_runs(&self, now: i64) -> Result<Vec<BroadcastRun>>;
}

/// Current unix timestamp in seconds.
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
