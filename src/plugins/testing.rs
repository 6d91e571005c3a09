// ABOUTME: In-memory chat service and broker transport for plugin unit tests.
// ABOUTME: Both record what plugins send so tests can assert on it.

use async_trait::async_trait;
use horscht_core::{
    BotIdentity, Bot, BrokerAddress, BrokerBridge, BrokerError, BrokerLink, BrokerSettings,
    BrokerTransport, ChatError, ChatService, ChatSinks, CommandCall, InboundEvent, MessageContent,
    PluginConfig, Registry, RoomInfo,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const BOT_ID: &str = "@horscht:example.org";

#[derive(Default)]
pub struct TestChat {
    rooms: Mutex<Vec<RoomInfo>>,
    sent: Mutex<Vec<(String, MessageContent)>>,
}

impl TestChat {
    pub fn sent(&self) -> Vec<(String, MessageContent)> {
        self.sent.lock().clone()
    }

    /// Plain text of everything sent to `room_id`
    pub fn sent_to(&self, room_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(room, _)| room == room_id)
            .map(|(_, content)| content.plain_text().to_string())
            .collect()
    }
}

#[async_trait]
impl ChatService for TestChat {
    fn user_id(&self) -> &str {
        BOT_ID
    }

    async fn display_name(&self) -> Result<Option<String>, ChatError> {
        Ok(None)
    }

    async fn set_display_name(&self, _name: &str) -> Result<(), ChatError> {
        Ok(())
    }

    async fn join_room(&self, _room_id: &str) -> Result<(), ChatError> {
        Ok(())
    }

    async fn send(&self, room_id: &str, content: MessageContent) -> Result<(), ChatError> {
        if !self.rooms.lock().iter().any(|r| r.id == room_id) {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        }
        self.sent.lock().push((room_id.to_string(), content));
        Ok(())
    }

    async fn send_read_receipt(&self, _room_id: &str, _event_id: &str) -> Result<(), ChatError> {
        Ok(())
    }

    async fn room(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms.lock().iter().find(|r| r.id == room_id).cloned()
    }

    async fn rooms(&self) -> Vec<RoomInfo> {
        self.rooms.lock().clone()
    }

    async fn room_members(&self, _room_id: &str) -> Result<Vec<String>, ChatError> {
        Ok(Vec::new())
    }

    async fn listen_once(&self) -> Result<(), ChatError> {
        Ok(())
    }

    async fn start_listening(&self, _sinks: ChatSinks) -> Result<(), ChatError> {
        Ok(())
    }

    async fn stop_listening(&self) {}
}

#[derive(Default)]
pub struct TestTransport {
    connected: Mutex<bool>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl TestTransport {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .iter()
            .map(|(topic, payload)| (topic.clone(), String::from_utf8_lossy(payload).into_owned()))
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for TestTransport {
    async fn connect(&self, _address: &BrokerAddress, _link: BrokerLink) -> Result<(), BrokerError> {
        *self.connected.lock() = true;
        Ok(())
    }

    async fn disconnect(&self) {
        *self.connected.lock() = false;
    }

    async fn subscribe(&self, _topic: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.published.lock().push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}

pub struct TestBot {
    pub bot: Bot,
    pub chat: Arc<TestChat>,
    pub transport: Arc<TestTransport>,
}

impl TestBot {
    /// Bot joined to `rooms`, with a connected broker.
    pub async fn new(rooms: Vec<RoomInfo>) -> Self {
        let chat = Arc::new(TestChat::default());
        *chat.rooms.lock() = rooms;
        let transport = Arc::new(TestTransport::default());
        let (events, _rx) = mpsc::channel(16);
        let bridge = Arc::new(BrokerBridge::new(
            transport.clone(),
            Arc::new(Registry::new()),
            BrokerSettings::new(BrokerAddress::new("localhost", 1883)),
            events,
        ));
        bridge.connect().await.unwrap();
        let bot = Bot::new(chat.clone(), bridge, BotIdentity::new(BOT_ID, None));
        Self {
            bot,
            chat,
            transport,
        }
    }
}

/// Plugin config parsed from a TOML snippet
pub fn config(plugin: &str, src: &str) -> PluginConfig {
    PluginConfig::new(plugin, toml::from_str(src).unwrap())
}

pub fn text_event(room_id: &str, sender: &str, body: &str) -> InboundEvent {
    InboundEvent::text(room_id, sender, format!("$evt-{body}"), body)
}

/// Build a command call the way the router does: args are the words after the token.
pub fn call<'a>(
    event: &'a InboundEvent,
    token: &'a str,
    args: &'a [String],
    config: &'a PluginConfig,
) -> CommandCall<'a> {
    CommandCall {
        event,
        token,
        args,
        config,
    }
}

pub fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}
