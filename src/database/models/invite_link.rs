//! Invite-link data model.

use serde::{Deserialize, Serialize};

/// A shareable join link tracked for attribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteLink {
    /// The full invite URL issued by the platform (unique key).
    pub token: String,
    /// Human label naming the acquisition source ("Instagram", "Blog", ...).
    pub label: String,
    /// Admin who created the link.
    pub created_by: i64,
    /// Unix timestamp of creation.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Count of members attributed to this link. Monotonically
    /// non-decreasing; incremented with a storage-level atomic update only.
    pub uses: u64,
    /// Revoked links are retired, never deleted, so attribution history
    /// stays intact.
    pub revoked: bool,
}

impl InviteLink {
    pub fn new(
        token: String,
        label: String,
        created_by: i64,
        created_at: i64,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            token,
            label,
            created_by,
            created_at,
            expires_at,
            uses: 0,
            revoked: false,
        }
    }

    /// Whether the link can still attribute joins at `now`.
    pub fn is_usable(&self, now: i64) -> bool {
        !self.revoked && self.expires_at.map_or(true, |exp| exp > now)
    }
}
