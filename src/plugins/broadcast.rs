//! Broadcast command handlers.

use mongodb::bson::oid::ObjectId;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::database::{BroadcastRun, DeliveryState, MessagePayload, RunStatus};
use crate::plugins::{ensure_admin, error_text};
use crate::utils::{format_ts, parse_duration};

/// Handle /broadcast <text> - send to every approved member.
///
/// Replying to a photo attaches it; the command text (or, failing that, the
/// photo caption) becomes the message.
pub async fn broadcast_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let Some(payload) = payload_from(&msg, args) else {
        bot.send_message(
            msg.chat.id,
            "Usage: /broadcast <text> — or reply to a photo with /broadcast [caption]",
        )
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
        return Ok(());
    };

    match state.broadcasts.start(payload, None).await {
        Ok(run) => {
            state.broadcasts.spawn(run.id);
            bot.send_message(
                msg.chat.id,
                format!(
                    "Broadcast <code>{}</code> started for {} recipient(s).\n\
                     Track it with /runstatus {}",
                    run.id.to_hex(),
                    run.total,
                    run.id.to_hex()
                ),
            )
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        }
        Err(err) => {
            bot.send_message(msg.chat.id, error_text(&err))
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }

    Ok(())
}

/// Handle /schedule <delay> <text> - broadcast later (e.g. `/schedule 2h ...`).
pub async fn schedule_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let usage = "Usage: /schedule <delay> <text>\nExample: /schedule 2h The stream starts soon!";

    let args = args.trim();
    let Some((delay, text)) = args.split_once(char::is_whitespace) else {
        bot.send_message(msg.chat.id, usage)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    };

    let Some(delay) = parse_duration(delay) else {
        bot.send_message(msg.chat.id, usage)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    };

    let Some(payload) = payload_from(&msg, text.to_string()) else {
        bot.send_message(msg.chat.id, usage)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    };

    let scheduled_at = chrono::Utc::now().timestamp() + delay.as_secs() as i64;

    match state.broadcasts.start(payload, Some(scheduled_at)).await {
        Ok(run) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Broadcast <code>{}</code> scheduled for {} ({} recipient(s) snapshotted).",
                    run.id.to_hex(),
                    format_ts(scheduled_at),
                    run.total
                ),
            )
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        }
        Err(err) => {
            bot.send_message(msg.chat.id, error_text(&err))
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }

    Ok(())
}

/// Handle /runstatus <id> - show live progress for a run.
pub async fn runstatus_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let Some(run_id) = parse_run_id(args.trim()) else {
        bot.send_message(msg.chat.id, "Usage: /runstatus <run id>")
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    };

    match state.broadcasts.status(run_id).await {
        Ok(run) => {
            let text = format_run(&run, state.config.broadcast.max_attempts);
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::Html)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
        Err(err) => {
            bot.send_message(msg.chat.id, error_text(&err))
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }

    Ok(())
}

/// Handle /cancelbroadcast <id>.
pub async fn cancel_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let Some(run_id) = parse_run_id(args.trim()) else {
        bot.send_message(msg.chat.id, "Usage: /cancelbroadcast <run id>")
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    };

    match state.broadcasts.cancel(run_id).await {
        Ok(run) => {
            let text = format!(
                "Broadcast <code>{}</code> cancelled.\n{}",
                run.id.to_hex(),
                format_run(&run, state.config.broadcast.max_attempts)
            );
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::Html)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
        Err(err) => {
            bot.send_message(msg.chat.id, error_text(&err))
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }

    Ok(())
}

fn parse_run_id(raw: &str) -> Option<ObjectId> {
    ObjectId::parse_str(raw).ok()
}

/// Build the payload from the command text and, when the command replies to
/// a photo, that photo.
fn payload_from(msg: &Message, text: String) -> Option<MessagePayload> {
    let reply = msg.reply_to_message();
    let photo = reply
        .and_then(|m| m.photo())
        .and_then(|sizes| sizes.last())
        .map(|size| size.file.id.clone());

    let text = text.trim().to_string();
    let text = if text.is_empty() {
        reply
            .and_then(|m| m.caption())
            .unwrap_or_default()
            .to_string()
    } else {
        text
    };

    if text.is_empty() && photo.is_none() {
        return None;
    }

    Some(MessagePayload { text, photo })
}

/// Progress text for a run, separating unreachable recipients from retry
/// exhaustion in the final summary.
fn format_run(run: &BroadcastRun, max_attempts: u32) -> String {
    let progress = run.progress();

    let status = match run.status {
        RunStatus::Pending => "pending",
        RunStatus::InProgress => "in progress",
        RunStatus::Completed => "completed",
        RunStatus::CompletedWithErrors => "completed with errors",
        RunStatus::Cancelled => "cancelled",
    };

    let mut text = format!(
        "📨 <b>Broadcast</b> <code>{}</code> — {}\n\
         Recipients: {}\nSent: {} | Pending: {} | Retrying: {}",
        run.id.to_hex(),
        status,
        run.total,
        progress.sent,
        progress.pending,
        progress.retryable,
    );

    if progress.skipped > 0 {
        text.push_str(&format!(" | Skipped: {}", progress.skipped));
    }

    if progress.permanent > 0 {
        let exhausted = run
            .outcomes
            .values()
            .filter(|o| o.state == DeliveryState::FailedPermanent && o.attempts >= max_attempts)
            .count() as u64;
        let unreachable = progress.permanent - exhausted;
        text.push_str(&format!(
            "\nFailed: {} ({} unreachable, {} gave up after {} attempts)",
            progress.permanent, unreachable, exhausted, max_attempts
        ));
    }

    if let Some(ts) = run.scheduled_at {
        if run.status == RunStatus::Pending {
            text.push_str(&format!("\nScheduled for {}", format_ts(ts)));
        }
    }

    text
}
