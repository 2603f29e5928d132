//! Plugin system for command handlers.
//!
//! Add new plugins by:
//! 1. Creating a new file in this directory
//! 2. Adding `pub mod your_plugin;` below
//! 3. Adding the handler to `command_handler()`

pub mod broadcast;
pub mod help;
pub mod links;
pub mod start;
pub mod stats;

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use teloxide::utils::command::BotCommands;

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::error::Error;

/// All bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,

    #[command(description = "Show help")]
    Help,

    // Invite-link commands
    #[command(description = "Create a tracked invite link: /newlink <label> [expiry]")]
    Newlink(String),

    #[command(description = "Revoke an invite link: /revokelink <token>")]
    Revokelink(String),

    #[command(description = "List invite links with usage counts")]
    Links,

    // Broadcast commands
    #[command(description = "Broadcast to approved members: /broadcast <text>")]
    Broadcast(String),

    #[command(description = "Schedule a broadcast: /schedule <delay> <text>")]
    Schedule(String),

    #[command(description = "Show broadcast progress: /runstatus <id>")]
    Runstatus(String),

    #[command(description = "Cancel a broadcast: /cancelbroadcast <id>")]
    Cancelbroadcast(String),

    // Statistics
    #[command(description = "Subscriber statistics")]
    Stats,
}

/// Build the combined command handler.
pub fn command_handler() -> UpdateHandler<anyhow::Error> {
    use dptree::case;

    teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(start::start_command))
        .branch(case![Command::Help].endpoint(help::help_command))
        // Invite links
        .branch(case![Command::Newlink(args)].endpoint(links::newlink_command))
        .branch(case![Command::Revokelink(args)].endpoint(links::revokelink_command))
        .branch(case![Command::Links].endpoint(links::links_command))
        // Broadcasts
        .branch(case![Command::Broadcast(args)].endpoint(broadcast::broadcast_command))
        .branch(case![Command::Schedule(args)].endpoint(broadcast::schedule_command))
        .branch(case![Command::Runstatus(args)].endpoint(broadcast::runstatus_command))
        .branch(case![Command::Cancelbroadcast(args)].endpoint(broadcast::cancel_command))
        // Statistics
        .branch(case![Command::Stats].endpoint(stats::stats_command))
}

/// Gate a command to configured administrators. Replies to non-admins and
/// returns `false`.
pub(crate) async fn ensure_admin(
    bot: &ThrottledBot,
    msg: &Message,
    state: &AppState,
) -> anyhow::Result<bool> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(false);
    };

    if state.config.is_admin(user.id.0) {
        return Ok(true);
    }

    bot.send_message(msg.chat.id, "This command is for administrators only.")
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(false)
}

/// Admin-facing text for an engine error.
pub(crate) fn error_text(err: &Error) -> String {
    match err {
        Error::GatewayUnavailable(_) => {
            "Telegram is not responding right now, try again in a minute.".to_string()
        }
        Error::RateLimited { .. } => "Rate limited by Telegram, try again shortly.".to_string(),
        Error::RecipientUnreachable(_) => "That user cannot be reached.".to_string(),
        Error::NotFound(entity) => format!("That {} does not exist.", entity),
        Error::Store(_) => "Storage error; the operation was not applied.".to_string(),
    }
}
