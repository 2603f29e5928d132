//! /help command handler.

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::plugins::Command;

/// Handle /help - send the command list. Admin commands are only shown to
/// admins; regular users get the short version.
pub async fn help_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    let is_admin = msg
        .from
        .as_ref()
        .map(|u| state.config.is_admin(u.id.0))
        .unwrap_or(false);

    let text = if is_admin {
        Command::descriptions().to_string()
    } else {
        "Available commands:\n/start — start the bot\n/help — show help".to_string()
    };

    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
