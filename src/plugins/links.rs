//! Invite-link command handlers.
//!
//! Each tracked link names an acquisition source; the registry attributes
//! approved members to the link they followed.

use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::plugins::{ensure_admin, error_text};
use crate::utils::{escape_html, format_ts, parse_duration};

/// Handle /newlink <label> [expiry] - create a tracked invite link.
///
/// The optional trailing argument is a duration like `7d` or `12h` after
/// which the link expires.
pub async fn newlink_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }
    let admin = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or_default();

    let args = args.trim();
    if args.is_empty() {
        bot.send_message(
            msg.chat.id,
            "Usage: /newlink <label> [expiry]\nExample: /newlink Instagram 7d",
        )
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
        return Ok(());
    }

    // A parseable trailing token is an expiry; everything else is the label.
    let (label, expires_at) = match args.rsplit_once(char::is_whitespace) {
        Some((head, tail)) if !head.trim().is_empty() => match parse_duration(tail) {
            Some(duration) => (
                head.trim().to_string(),
                Some(chrono::Utc::now().timestamp() + duration.as_secs() as i64),
            ),
            None => (args.to_string(), None),
        },
        _ => (args.to_string(), None),
    };

    match state.registry.create(&label, admin, expires_at).await {
        Ok(link) => {
            let expiry_line = link
                .expires_at
                .map(|ts| format!("\nExpires: {}", format_ts(ts)))
                .unwrap_or_default();
            bot.send_message(
                msg.chat.id,
                format!(
                    "Link for <b>{}</b> created:\n{}{}",
                    escape_html(&link.label),
                    link.token,
                    expiry_line
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

/// Handle /revokelink <token> - retire a link.
pub async fn revokelink_command(
    bot: ThrottledBot,
    msg: Message,
    state: AppState,
    args: String,
) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let token = args.trim();
    if token.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /revokelink <token>")
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    }

    match state.registry.revoke(token).await {
        Ok(link) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Link <b>{}</b> revoked. Its {} attributed member(s) stay counted.",
                    escape_html(&link.label),
                    link.uses
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

/// Handle /links - list tracked invite links.
pub async fn links_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let mut links = state.registry.list().await?;
    if links.is_empty() {
        bot.send_message(msg.chat.id, "No invite links yet. Create one with /newlink.")
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        return Ok(());
    }
    links.sort_by(|a, b| b.uses.cmp(&a.uses));

    let mut text = String::from("🔗 <b>Invite links</b>\n\n");
    for link in links {
        let mut flags = String::new();
        if link.revoked {
            flags.push_str(" [revoked]");
        }
        if let Some(ts) = link.expires_at {
            flags.push_str(&format!(" [expires {}]", format_ts(ts)));
        }
        text.push_str(&format!(
            "<b>{}</b> — {} member(s){}\n{}\n\n",
            escape_html(&link.label),
            link.uses,
            flags,
            link.token
        ));
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
