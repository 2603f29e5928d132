//! Turnstile - private-channel subscriber management bot.
//!
//! Approves channel join requests, attributes every approved member to the
//! invite link that brought them in, and broadcasts messages to the member
//! base with per-recipient delivery tracking.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `database` - MongoDB models and repositories
//! - `cache` - LRU caching with Moka
//! - `gateway` - Telegram gateway behind a trait seam
//! - `engine` - Join state machine, link registry, broadcast engine, stats
//! - `bot` - Dispatcher and runtime (polling or webhook)
//! - `plugins` - Admin command handlers
//! - `events` - Join-request and membership event handlers
//! - `utils` - Utility functions

mod bot;
mod cache;
mod config;
mod database;
mod engine;
mod error;
mod events;
mod gateway;
mod plugins;
mod utils;

use std::sync::Arc;

use teloxide::adaptors::throttle::Limits;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bot::dispatcher::AppState;
use config::Config;
use database::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // Default to "info" for our crate when RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("turnstile=info,teloxide=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Turnstile bot...");

    let config = Arc::new(Config::from_env());
    info!("Configuration loaded successfully");
    info!(
        "Bot mode: {:?}, managed channel: {}",
        config.bot_mode, config.channel_id
    );

    info!("Connecting to MongoDB...");
    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database).await?;
    info!("Database connected");

    // Throttle keeps every outbound call inside Telegram's rate limits:
    // 30 msg/s globally, 1 msg/s per chat.
    let bot = Bot::new(&config.bot_token).throttle(Limits::default());
    info!("Bot initialized with rate limiting (Throttle)");

    let me = bot.get_me().await?;
    info!("Bot username: @{}", me.username());

    if config.admin_ids.is_empty() {
        info!("No admin IDs configured (ADMIN_USER_IDS is empty)");
    } else {
        info!("Bot admins: {:?}", config.admin_ids);
    }

    let state = AppState::new(bot.clone(), &db, config.clone());

    // The scheduler sweep dispatches due broadcast runs; its first sweep
    // fires immediately, which also resumes runs interrupted by the last
    // shutdown.
    engine::broadcast::spawn_scheduler(state.broadcasts.clone());

    let dispatcher = bot::build_dispatcher(bot.clone(), state);

    bot::run(&config, dispatcher, bot).await;

    Ok(())
}
