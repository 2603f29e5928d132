//! Telegram implementation of the gateway.

use async_trait::async_trait;
use chrono::DateTime;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, ParseMode, UserId};
use tracing::debug;

use crate::bot::dispatcher::ThrottledBot;
use crate::database::MessagePayload;
use crate::error::{classify_request_error, Result};
use crate::gateway::Gateway;

/// Gateway over the throttled Telegram bot, scoped to one managed channel.
///
/// The `Throttle` adaptor underneath paces every API call against Telegram's
/// global limits; rate-limit responses that still get through surface as
/// `RateLimited` with the retry hint attached.
#[derive(Clone)]
pub struct TelegramGateway {
    bot: ThrottledBot,
    channel: ChatId,
}

impl TelegramGateway {
    pub fn new(bot: ThrottledBot, channel_id: i64) -> Self {
        Self {
            bot,
            channel: ChatId(channel_id),
        }
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn approve_join(&self, user_id: i64) -> Result<()> {
        self.bot
            .approve_chat_join_request(self.channel, UserId(user_id as u64))
            .await
            .map_err(classify_request_error)?;
        debug!("Approved join request for user {}", user_id);
        Ok(())
    }

    async fn decline_join(&self, user_id: i64) -> Result<()> {
        self.bot
            .decline_chat_join_request(self.channel, UserId(user_id as u64))
            .await
            .map_err(classify_request_error)?;
        debug!("Declined join request for user {}", user_id);
        Ok(())
    }

    async fn create_invite_link(&self, label: &str, expires_at: Option<i64>) -> Result<String> {
        // Join-request links may not carry a member limit, so none is set.
        let mut request = self
            .bot
            .create_chat_invite_link(self.channel)
            .creates_join_request(true)
            .name(label.to_string());

        if let Some(ts) = expires_at {
            if let Some(date) = DateTime::from_timestamp(ts, 0) {
                request = request.expire_date(date);
            }
        }

        let link = request.await.map_err(classify_request_error)?;
        debug!("Created invite link {} ({})", link.invite_link, label);
        Ok(link.invite_link)
    }

    async fn revoke_invite_link(&self, token: &str) -> Result<()> {
        self.bot
            .revoke_chat_invite_link(self.channel, token.to_string())
            .await
            .map_err(classify_request_error)?;
        debug!("Revoked invite link {}", token);
        Ok(())
    }

    async fn send_direct(&self, user_id: i64, payload: &MessagePayload) -> Result<()> {
        let chat = ChatId(user_id);

        let result = match &payload.photo {
            Some(file_id) => self
                .bot
                .send_photo(chat, InputFile::file_id(file_id.clone()))
                .caption(payload.text.clone())
                .parse_mode(ParseMode::Html)
                .await
                .map(|_| ()),
            None => self
                .bot
                .send_message(chat, payload.text.clone())
                .parse_mode(ParseMode::Html)
                .await
                .map(|_| ()),
        };

        result.map_err(classify_request_error)
    }
}

impl std::fmt::Debug for TelegramGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramGateway")
            .field("channel", &self.channel)
            .finish()
    }
}