//! Membership-left event handler.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ChatMemberUpdated;

use crate::bot::dispatcher::AppState;
use crate::engine::{GatewayEvent, LeaveEvent};

/// Returns the handler for members leaving the managed channel.
pub fn handler() -> UpdateHandler<anyhow::Error> {
    Update::filter_chat_member()
        .branch(dptree::filter(is_channel_leave).endpoint(on_left))
}

/// A member counts as leaving when they were present before the update and
/// are not after it, regardless of whether they left or were removed.
fn is_channel_leave(update: ChatMemberUpdated, state: AppState) -> bool {
    update.chat.id.0 == state.config.channel_id
        && update.old_chat_member.is_present()
        && !update.new_chat_member.is_present()
}

async fn on_left(update: ChatMemberUpdated, state: AppState) -> anyhow::Result<()> {
    let event = LeaveEvent {
        user_id: update.new_chat_member.user.id.0 as i64,
    };

    state.join.handle_event(GatewayEvent::Left(event)).await?;
    Ok(())
}
