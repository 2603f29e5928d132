//! Event handlers for gateway updates.
//!
//! Each handler reduces a raw Telegram update to an engine event and feeds
//! it to the join-request state machine. Updates for chats other than the
//! managed channel are ignored.

pub mod join_request;
pub mod membership;
