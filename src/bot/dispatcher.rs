//! Message dispatcher setup.
//!
//! Builds the dispatcher with the event handlers and command handlers, and
//! wires the engines onto their Mongo stores and the Telegram gateway.

use std::sync::Arc;

use teloxide::adaptors::Throttle;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;

use crate::config::Config;
use crate::database::{Database, LinkRepository, MemberRepository, RunRepository};
use crate::engine::broadcast::BroadcastEngine;
use crate::engine::join::{JoinEngine, JoinPolicy};
use crate::engine::links::LinkRegistry;
use crate::engine::{LinkStore, MemberStore, RunStore};
use crate::events;
use crate::gateway::{Gateway, TelegramGateway};
use crate::plugins;

/// Bot type with Throttle adaptor for automatic rate limiting.
pub type ThrottledBot = Throttle<Bot>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    /// Member store, shared by the engines and the stats/start commands.
    pub members: Arc<dyn MemberStore>,

    /// Link store, read by the statistics aggregator.
    pub links: Arc<dyn LinkStore>,

    /// Link registry (create/revoke/list/attribute).
    pub registry: LinkRegistry,

    /// Join-request state machine.
    pub join: JoinEngine,

    /// Broadcast engine.
    pub broadcasts: BroadcastEngine,
}

impl AppState {
    /// Create a new application state over the given database.
    pub fn new(bot: ThrottledBot, db: &Database, config: Arc<Config>) -> Self {
        let gateway: Arc<dyn Gateway> =
            Arc::new(TelegramGateway::new(bot, config.channel_id));

        let members: Arc<dyn MemberStore> = Arc::new(MemberRepository::new(db));
        let links: Arc<dyn LinkStore> = Arc::new(LinkRepository::new(db));
        let runs: Arc<dyn RunStore> = Arc::new(RunRepository::new(db));

        let registry = LinkRegistry::new(links.clone(), gateway.clone());

        let join = JoinEngine::new(
            members.clone(),
            registry.clone(),
            gateway.clone(),
            JoinPolicy::new(config.denied_user_ids.iter().copied()),
            config.confirm_retry.clone(),
            config.welcome_message.clone(),
        );

        let broadcasts = BroadcastEngine::new(
            members.clone(),
            runs,
            gateway,
            config.broadcast.clone(),
        );

        Self {
            config,
            members,
            links,
            registry,
            join,
            broadcasts,
        }
    }
}

/// Build the dispatcher with all handlers.
pub fn build_dispatcher(
    bot: ThrottledBot,
    state: AppState,
) -> Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
}

/// Build the handler schema.
fn schema() -> UpdateHandler<anyhow::Error> {
    use teloxide::dispatching::UpdateFilterExt;

    // Messages: activity tracking first, then commands.
    let message_handler = Update::filter_message()
        .inspect_async(track_activity)
        .branch(plugins::command_handler());

    dptree::entry()
        .branch(events::join_request::handler())
        .branch(events::membership::handler())
        .branch(message_handler)
}

/// Refresh the sender's last-seen timestamp (runs before all handlers).
async fn track_activity(msg: Message, state: AppState) {
    if let Some(user) = msg.from.as_ref() {
        let now = chrono::Utc::now().timestamp();
        let _ = state.members.update_last_seen(user.id.0 as i64, now).await;
    }
}
