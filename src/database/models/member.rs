//! Member data model.
//!
//! One document per channel user ever observed. Members are never deleted;
//! `Left` is the archive state so statistics keep their history.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a member.
///
/// Transitions move forward only (`Pending` to `Approved` or `Rejected`,
/// `Approved` to `Left`), except that a `Left` or `Rejected` member re-enters
/// at `Pending` when a new join request arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Approved,
    Rejected,
    Left,
}

impl MemberStatus {
    /// Storage representation, used in query filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Approved => "approved",
            MemberStatus::Rejected => "rejected",
            MemberStatus::Left => "left",
        }
    }
}

/// The acquisition source of a member, resolved at approval time.
///
/// An explicit variant rather than a bare `Option` so that "we do not know
/// where this member came from" can never be confused with a link that
/// happens to have zero usages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attribution {
    /// The member followed this invite-link token.
    Link(String),
    /// No token on the join event, or the token did not resolve.
    Unattributed,
}

impl Attribution {
    pub fn token(&self) -> Option<&str> {
        match self {
            Attribution::Link(token) => Some(token),
            Attribution::Unattributed => None,
        }
    }
}

/// One chat user known to the system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    /// Telegram user ID (unique key).
    pub user_id: i64,
    /// Username without @, if the user has one.
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub status: MemberStatus,
    /// Invite-link token this member is attributed to. `None` means
    /// unattributed, not zero.
    pub attributed_link: Option<String>,
    /// Unix timestamp of the first observed join request.
    pub joined_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<i64>,
    /// Unix timestamp of the last observed interaction.
    pub last_seen_at: i64,
}

impl Member {
    #[allow(dead_code)]
    pub fn attribution(&self) -> Attribution {
        match &self.attributed_link {
            Some(token) => Attribution::Link(token.clone()),
            None => Attribution::Unattributed,
        }
    }
}

/// Per-status member counts, as computed by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub left: u64,
}

impl StatusCounts {
    /// Total distinct members ever observed.
    pub fn total(&self) -> u64 {
        self.pending + self.approved + self.rejected + self.left
    }
}
