//! Join-request event handler.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ChatJoinRequest;
use tracing::debug;

use crate::bot::dispatcher::AppState;
use crate::engine::{GatewayEvent, JoinEvent};

/// Returns the handler for chat join requests on the managed channel.
pub fn handler() -> UpdateHandler<anyhow::Error> {
    Update::filter_chat_join_request()
        .branch(dptree::filter(is_managed_channel).endpoint(on_join_request))
}

fn is_managed_channel(request: ChatJoinRequest, state: AppState) -> bool {
    request.chat.id.0 == state.config.channel_id
}

async fn on_join_request(request: ChatJoinRequest, state: AppState) -> anyhow::Result<()> {
    let event = JoinEvent {
        user_id: request.from.id.0 as i64,
        username: request.from.username.clone(),
        first_name: request.from.first_name.clone(),
        last_name: request.from.last_name.clone(),
        invite_token: request
            .invite_link
            .as_ref()
            .map(|link| link.invite_link.clone()),
    };

    debug!(
        "Join request from {} via {:?}",
        event.user_id, event.invite_token
    );

    state
        .join
        .handle_event(GatewayEvent::JoinRequest(event))
        .await?;
    Ok(())
}
