//! Configuration module for the Turnstile bot.
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::Deserialize;

/// Bot running mode
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    Polling,
    Webhook,
}

impl Default for BotMode {
    fn default() -> Self {
        Self::Polling
    }
}

/// Pacing and retry settings for the broadcast pipeline.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Fixed delay between consecutive sends within a run.
    pub pace: Duration,
    /// Attempts per recipient before a retryable failure becomes permanent.
    pub max_attempts: u32,
    /// Base inter-pass backoff, scaled by the pass number when the gateway
    /// gives no rate-limit hint.
    pub retry_backoff: Duration,
    /// How often the scheduler checks for due runs.
    pub scheduler_interval: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            pace: Duration::from_millis(50),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            scheduler_interval: Duration::from_secs(60),
        }
    }
}

/// Retry settings for gateway confirmation calls (approve/decline) issued
/// after the member state is already durable.
#[derive(Debug, Clone)]
pub struct ConfirmRetrySettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for ConfirmRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub bot_mode: BotMode,
    pub webhook_url: Option<String>,
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,

    /// The managed channel. Join requests and membership events from any
    /// other chat are ignored.
    pub channel_id: i64,

    /// Administrator user IDs (comma-separated). Only these users may run
    /// link/broadcast/stats commands.
    pub admin_ids: Vec<u64>,

    /// User IDs whose join requests are rejected by the approval policy.
    pub denied_user_ids: Vec<u64>,

    /// Direct message sent to a member right after approval.
    pub welcome_message: Option<String>,

    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,

    pub broadcast: BroadcastSettings,
    pub confirm_retry: ConfirmRetrySettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Panics
    /// Panics if required environment variables are not set.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bot_mode = env::var("BOT_MODE")
            .unwrap_or_else(|_| "polling".to_string())
            .to_lowercase();

        let bot_mode = match bot_mode.as_str() {
            "webhook" => BotMode::Webhook,
            _ => BotMode::Polling,
        };

        let webhook_url = env::var("WEBHOOK_URL").ok();

        if bot_mode == BotMode::Webhook && webhook_url.is_none() {
            panic!("WEBHOOK_URL must be set when BOT_MODE is webhook");
        }

        let webhook_port = env::var("WEBHOOK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8443);

        let webhook_secret = env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());

        let channel_id = env::var("CHANNEL_ID")
            .expect("CHANNEL_ID must be set")
            .parse::<i64>()
            .expect("CHANNEL_ID must be a numeric chat id");

        let admin_ids = parse_id_list(&env::var("ADMIN_USER_IDS").unwrap_or_default());
        let denied_user_ids = parse_id_list(&env::var("DENIED_USER_IDS").unwrap_or_default());

        let welcome_message = env::var("WELCOME_MESSAGE").ok().filter(|s| !s.is_empty());

        let mut broadcast = BroadcastSettings::default();
        if let Some(ms) = env_u64("BROADCAST_PACE_MS") {
            broadcast.pace = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("BROADCAST_MAX_ATTEMPTS") {
            broadcast.max_attempts = n.max(1) as u32;
        }
        if let Some(secs) = env_u64("BROADCAST_RETRY_BACKOFF_SECS") {
            broadcast.retry_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("BROADCAST_SCHEDULER_INTERVAL_SECS") {
            broadcast.scheduler_interval = Duration::from_secs(secs.max(1));
        }

        Self {
            bot_token: env::var("BOT_TOKEN").expect("BOT_TOKEN must be set"),
            bot_mode,
            webhook_url,
            webhook_port,
            webhook_secret,
            channel_id,
            admin_ids,
            denied_user_ids,
            welcome_message,
            mongodb_uri: env::var("MONGODB_URI").expect("MONGODB_URI must be set"),
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "turnstile".to_string()),
            broadcast,
            confirm_retry: ConfirmRetrySettings::default(),
        }
    }

    /// Check if a user is a bot administrator.
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn parse_id_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect()
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
