//! Error taxonomy (spec §7).
//!
//! Engine and gateway APIs return the typed [`Error`]; handlers at the
//! dispatcher boundary work in `anyhow::Result` and log. The five variants
//! map one-to-one to the spec's taxonomy: transient gateway failures, rate
//! limiting (with the retry hint surfaced), permanent per-recipient failures,
//! missing entities, and fatal store failures.

use std::time::Duration;

use teloxide::{ApiError, RequestError};
use thiserror::Error;

/// Crate-wide typed result.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine/gateway error taxonomy (spec §7).
#[derive(Debug, Error)]
pub enum Error {
    /// Transient gateway failure; retry with backoff, never corrupts state.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(#[source] anyhow::Error),

    /// Telegram rate limit; the `retry_after` hint should be honored.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Permanent per-recipient failure (blocked/deactivated/unknown). Terminal
    /// per recipient, never fatal to a whole run.
    #[error("recipient unreachable: {0}")]
    RecipientUnreachable(String),

    /// A named entity was not found; surfaced, not retried.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Store failure, fatal to the triggering operation.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl Error {
    /// Transient errors are retried with backoff; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::GatewayUnavailable(_) | Error::RateLimited { .. })
    }

    /// Retry-after hint, when the error carries one.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Error::Store(err.into())
    }
}

impl From<mongodb::bson::ser::Error> for Error {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        Error::Store(err.into())
    }
}

/// Classify a raw teloxide request error into the taxonomy.
///
/// Permanent per-recipient conditions (the user blocked the bot, deactivated
/// their account, or cannot be reached) become [`Error::RecipientUnreachable`];
/// rate limits carry the retry hint; everything else is treated as a transient
/// gateway failure.
pub fn classify_request_error(err: RequestError) -> Error {
    match err {
        RequestError::RetryAfter(secs) => Error::RateLimited {
            retry_after: secs.duration(),
        },
        RequestError::Api(api) => classify_api_error(api),
        RequestError::Network(e) => Error::GatewayUnavailable(anyhow::Error::new(e)),
        other => Error::GatewayUnavailable(anyhow::Error::new(other)),
    }
}

fn classify_api_error(api: ApiError) -> Error {
    match api {
        ApiError::BotBlocked
        | ApiError::UserDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots
        | ApiError::UserNotFound
        | ApiError::ChatNotFound => Error::RecipientUnreachable(api.to_string()),
        other => Error::GatewayUnavailable(anyhow::Error::new(other)),
    }
}
