//! Broadcast-run data model.
//!
//! A run is the durable record of one mass send: the payload, the recipient
//! snapshot taken at creation, and one outcome entry per recipient. The
//! processor works entirely off this record, so an interrupted run resumes
//! from wherever the last persisted outcome left it.

use std::collections::HashMap;

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// What gets sent to each recipient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    /// Telegram file id of an attached photo; the text becomes its caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            photo: None,
        }
    }
}

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created (possibly scheduled for later) but not yet claimed by a
    /// processor.
    Pending,
    InProgress,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::CompletedWithErrors | RunStatus::Cancelled
        )
    }
}

/// Delivery state of a single recipient within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    FailedPermanent,
    FailedRetryable,
    Skipped,
}

/// Per-recipient outcome entry, upserted by member id as the run progresses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub state: DeliveryState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RecipientOutcome {
    pub fn pending() -> Self {
        Self {
            state: DeliveryState::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }
}

/// One administrator-initiated mass send.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastRun {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub payload: MessagePayload,
    pub status: RunStatus,
    pub created_at: i64,
    /// When set, the run stays `Pending` until this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,
    /// Snapshot size at creation.
    pub total: u64,
    /// Outcome entries keyed by stringified member id (BSON maps need string
    /// keys).
    pub outcomes: HashMap<String, RecipientOutcome>,
}

/// Counts derived from a run's outcome entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub sent: u64,
    pub pending: u64,
    pub retryable: u64,
    pub permanent: u64,
    pub skipped: u64,
}

impl BroadcastRun {
    /// Create a run with a pending outcome entry per recipient.
    pub fn new(
        payload: MessagePayload,
        recipients: impl IntoIterator<Item = i64>,
        created_at: i64,
        scheduled_at: Option<i64>,
    ) -> Self {
        let outcomes: HashMap<String, RecipientOutcome> = recipients
            .into_iter()
            .map(|id| (id.to_string(), RecipientOutcome::pending()))
            .collect();

        Self {
            id: ObjectId::new(),
            payload,
            status: RunStatus::Pending,
            created_at,
            scheduled_at,
            total: outcomes.len() as u64,
            outcomes,
        }
    }

    /// Entries still owed a send attempt, as (member id, outcome) pairs.
    pub fn due_entries(&self) -> Vec<(i64, RecipientOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o.state,
                    DeliveryState::Pending | DeliveryState::FailedRetryable
                )
            })
            .filter_map(|(id, o)| id.parse::<i64>().ok().map(|id| (id, o.clone())))
            .collect()
    }

    pub fn progress(&self) -> RunProgress {
        let mut p = RunProgress::default();
        for outcome in self.outcomes.values() {
            match outcome.state {
                DeliveryState::Sent => p.sent += 1,
                DeliveryState::Pending => p.pending += 1,
                DeliveryState::FailedRetryable => p.retryable += 1,
                DeliveryState::FailedPermanent => p.permanent += 1,
                DeliveryState::Skipped => p.skipped += 1,
            }
        }
        p
    }

    /// The terminal status this run's entries add up to, if every entry is
    /// terminal.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        let p = self.progress();
        if p.pending > 0 || p.retryable > 0 {
            return None;
        }
        if p.permanent == 0 && p.skipped == 0 {
            Some(RunStatus::Completed)
        } else if p.permanent > 0 {
            Some(RunStatus::CompletedWithErrors)
        } else {
            // Only sent + skipped remain, which happens on cancellation.
            Some(RunStatus::Cancelled)
        }
    }
}
