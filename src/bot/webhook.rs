//! Webhook mode implementation for the bot.
//!
//! Uses teloxide's built-in axum webhook support to:
//! - Automatically call `setWebhook` on Telegram
//! - Spawn an axum HTTP server to receive updates
//! - Automatically call `deleteWebhook` on shutdown

use std::net::SocketAddr;

use teloxide::prelude::*;
use teloxide::update_listeners::webhooks::{self, Options};
use tracing::info;
use url::Url;

use super::dispatcher::ThrottledBot;
use crate::config::Config;

/// Start the bot in webhook mode.
///
/// On shutdown (Ctrl+C), the webhook is automatically deleted.
pub async fn start_webhook(
    config: &Config,
    mut dispatcher: Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey>,
    bot: ThrottledBot,
) {
    let webhook_url = config
        .webhook_url
        .as_ref()
        .expect("WEBHOOK_URL must be set when using webhook mode");

    let url = Url::parse(webhook_url).expect("Invalid WEBHOOK_URL format");

    // Listen on all interfaces at the configured port.
    let address = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));

    let mut options = Options::new(address, url.clone());

    if let Some(ref secret) = config.webhook_secret {
        options = options.secret_token(secret.clone());
        info!("Webhook secret token configured");
    }

    info!("Setting webhook URL: {}", url);
    info!("Listening on: {}", address);

    // The webhook setup only needs basic API access, so the inner bot
    // (without Throttle) is used for the listener.
    let listener = webhooks::axum(bot.inner().clone(), options)
        .await
        .expect("Failed to setup webhook");

    info!("Webhook setup complete, waiting for updates...");

    let error_handler = LoggingErrorHandler::with_custom_text("Error from update listener");

    dispatcher
        .dispatch_with_listener(listener, error_handler)
        .await;
}
