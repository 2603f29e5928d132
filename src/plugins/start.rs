//! /start command handler.

use teloxide::prelude::*;

use crate::bot::dispatcher::{AppState, ThrottledBot};

/// Handle /start - greet the user and refresh their activity timestamp.
pub async fn start_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
) -> anyhow::Result<()> {
    if let Some(user) = msg.from.as_ref() {
        let now = chrono::Utc::now().timestamp();
        if let Err(err) = state.members.update_last_seen(user.id.0 as i64, now).await {
            tracing::warn!("Could not refresh last_seen for {}: {}", user.id, err);
        }
    }

    let is_admin = msg
        .from
        .as_ref()
        .map(|u| state.config.is_admin(u.id.0))
        .unwrap_or(false);

    let text = if is_admin {
        "Hello! This bot manages the channel's join requests, invite links and broadcasts.\n\
         Send /help for the command list."
    } else {
        "Hello! This bot keeps you connected to the channel.\n\
         If you requested to join, your request is being processed."
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
