//! /stats command handler.

use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use crate::bot::dispatcher::{AppState, ThrottledBot};
use crate::engine::stats::compute_stats;
use crate::plugins::ensure_admin;
use crate::utils::escape_html;

/// Handle /stats - subscriber totals and the per-source breakdown.
pub async fn stats_command(bot: ThrottledBot, msg: Message, state: AppState) -> anyhow::Result<()> {
    if !ensure_admin(&bot, &msg, &state).await? {
        return Ok(());
    }

    let stats = compute_stats(state.members.as_ref(), state.links.as_ref()).await?;

    let mut text = format!(
        "📊 <b>Statistics</b>\n\n\
         Members observed: {}\n\
         Approved: {} | Pending: {}\n\
         Rejected: {} | Left: {}\n",
        stats.total, stats.approved, stats.pending, stats.rejected, stats.left,
    );

    if stats.per_link.is_empty() {
        text.push_str("\nNo invite links yet.");
    } else {
        text.push_str("\n<b>By source:</b>\n");
        for link in &stats.per_link {
            let revoked = if link.revoked { " [revoked]" } else { "" };
            text.push_str(&format!(
                "• {} — {} member(s){}\n",
                escape_html(&link.label),
                link.members,
                revoked
            ));
        }
        text.push_str(&format!("• unattributed — {} member(s)\n", stats.unattributed));
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}
