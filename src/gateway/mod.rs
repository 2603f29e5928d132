//! Chat-platform gateway.
//!
//! The engines treat the platform as an unreliable, rate-limited,
//! at-least-once event source and a fallible send sink, consumed through the
//! [`Gateway`] trait. The production implementation wraps the throttled
//! Telegram bot; tests substitute a scripted fake.

mod telegram;

pub use telegram::TelegramGateway;

use async_trait::async_trait;

use crate::database::MessagePayload;
use crate::error::Result;

/// Outbound capabilities the engines consume.
///
/// Every method classifies failures into the error taxonomy:
/// `GatewayUnavailable` and `RateLimited` are transient,
/// `RecipientUnreachable` is terminal for that recipient.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Confirm a join request as approved.
    async fn approve_join(&self, user_id: i64) -> Result<()>;

    /// Confirm a join request as declined.
    async fn decline_join(&self, user_id: i64) -> Result<()>;

    /// Create a join-request invite link for the managed channel and return
    /// its token (the invite URL).
    async fn create_invite_link(&self, label: &str, expires_at: Option<i64>) -> Result<String>;

    async fn revoke_invite_link(&self, token: &str) -> Result<()>;

    /// Send a direct message to a user.
    async fn send_direct(&self, user_id: i64, payload: &MessagePayload) -> Result<()>;
}
