// ABOUTME: The Bot handle passed to every plugin handler.
// ABOUTME: Wraps the chat service, the broker bridge and the bot's own identity.

use anyhow::Result;
use std::sync::Arc;

use crate::broker::BrokerBridge;
use crate::error::{BrokerError, ChatError};
use crate::event::InboundEvent;
use crate::traits::{ChatService, MessageContent, RoomInfo};

/// Who the bot is: account id, account name and desired display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub account_name: String,
    pub display_name: String,
}

impl BotIdentity {
    /// Build an identity; the display name defaults to the account name.
    pub fn new(user_id: impl Into<String>, display_name: Option<String>) -> Self {
        let user_id = user_id.into();
        let account_name = localpart(&user_id).to_string();
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| account_name.clone());
        Self {
            user_id,
            account_name,
            display_name,
        }
    }

    /// Whether `text` mentions the display name or account name (case-insensitive).
    pub fn mentioned_in(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        [&self.display_name, &self.account_name]
            .into_iter()
            .filter(|name| !name.is_empty())
            .any(|name| text.contains(&name.to_lowercase()))
    }
}

/// Localpart of a Matrix-style user id: `@horscht:example.org` -> `horscht`.
pub fn localpart(user_id: &str) -> &str {
    let without_sigil = user_id.strip_prefix('@').unwrap_or(user_id);
    without_sigil
        .split_once(':')
        .map_or(without_sigil, |(local, _)| local)
}

/// Handle plugins use to talk to the chat service and the broker.
#[derive(Clone)]
pub struct Bot {
    chat: Arc<dyn ChatService>,
    broker: Arc<BrokerBridge>,
    identity: Arc<BotIdentity>,
}

impl Bot {
    pub fn new(chat: Arc<dyn ChatService>, broker: Arc<BrokerBridge>, identity: BotIdentity) -> Self {
        Self {
            chat,
            broker,
            identity: Arc::new(identity),
        }
    }

    pub fn chat(&self) -> &Arc<dyn ChatService> {
        &self.chat
    }

    pub fn broker(&self) -> &BrokerBridge {
        &self.broker
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn mentions(&self, text: &str) -> bool {
        self.identity.mentioned_in(text)
    }

    /// Reply to an event with a notice in the same room.
    pub async fn reply(&self, event: &InboundEvent, text: &str) -> Result<()> {
        self.reply_content(event, MessageContent::notice(text)).await
    }

    /// Reply to an event with an HTML message in the same room.
    pub async fn reply_html(&self, event: &InboundEvent, html: &str) -> Result<()> {
        self.reply_content(event, MessageContent::html(html)).await
    }

    async fn reply_content(&self, event: &InboundEvent, content: MessageContent) -> Result<()> {
        tracing::info!(room_id = %event.room_id, reply = %content.plain_text(), "Reply");
        match self.chat.send(&event.room_id, content).await {
            Ok(()) => Ok(()),
            Err(ChatError::RoomNotFound(room)) => {
                tracing::info!(room_id = %room, "Room vanished before reply could be sent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn send_text(&self, room_id: &str, text: &str) -> Result<(), ChatError> {
        self.chat.send(room_id, MessageContent::text(text)).await
    }

    pub async fn send_html(&self, room_id: &str, html: &str) -> Result<(), ChatError> {
        self.chat.send(room_id, MessageContent::html(html)).await
    }

    /// Best-effort publish to the broker.
    pub async fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<(), BrokerError> {
        self.broker.publish(topic, payload.as_ref()).await
    }

    pub async fn room(&self, room_id: &str) -> Option<RoomInfo> {
        self.chat.room(room_id).await
    }

    pub async fn rooms(&self) -> Vec<RoomInfo> {
        self.chat.rooms().await
    }

    /// First joined room whose display name equals `name` (case-insensitive).
    pub async fn find_room_by_name(&self, name: &str) -> Option<RoomInfo> {
        self.chat.rooms().await.into_iter().find(|room| {
            room.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    /// Address used for access control for a room id.
    pub async fn room_address(&self, room_id: &str) -> String {
        match self.chat.room(room_id).await {
            Some(room) => room.address().to_string(),
            None => room_id.to_string(),
        }
    }

    /// Make the server-side display name match the configured one.
    pub async fn ensure_display_name(&self) -> Result<(), ChatError> {
        let wanted = &self.identity.display_name;
        let current = self.chat.display_name().await?;
        if current.as_deref() != Some(wanted.as_str()) {
            tracing::info!(from = ?current, to = %wanted, "Updating display name");
            self.chat.set_display_name(wanted).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("identity", &self.identity)
            .field("broker", &self.broker)
            .finish()
    }
}
