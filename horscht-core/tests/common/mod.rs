// ABOUTME: Shared test doubles: a recording chat service, a scriptable broker transport and recording handlers.
// ABOUTME: Also builds a wired-up event loop around them.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use horscht_core::{
    queues, BackoffConfig, Bot, BotIdentity, BrokerAddress, BrokerBridge, BrokerError, BrokerLink,
    BrokerMessage, BrokerSettings, BrokerTransport, ChatError, ChatService, ChatSinks, CommandCall,
    CommandHandler, CronHandler, EventLoop, EventLoopSettings, InboundEvent, MessageContent,
    Observer, PluginConfig, Registry, RoomInfo, TopicHandler,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BOT_ID: &str = "@horscht:example";

// =============================================================================
// Chat service
// =============================================================================

#[derive(Default)]
pub struct MockChat {
    rooms: Mutex<Vec<RoomInfo>>,
    missing_rooms: Mutex<HashSet<String>>,
    failing_rooms: Mutex<HashSet<String>>,
    display_name: Mutex<Option<String>>,
    pub sent: Mutex<Vec<(String, MessageContent)>>,
    pub receipts: Mutex<Vec<String>>,
    pub joined: Mutex<Vec<String>>,
    pub listening: Mutex<bool>,
    pub stop_calls: Mutex<u32>,
    pub fail_start: Mutex<bool>,
    trace: Mutex<Option<Calls>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, room: RoomInfo) {
        self.rooms.lock().unwrap().push(room);
    }

    /// Make `join_room` report the room as not found
    pub fn remove_room(&self, room_id: &str) {
        self.missing_rooms.lock().unwrap().insert(room_id.to_string());
    }

    /// Make `join_room` fail with a generic error
    pub fn fail_join(&self, room_id: &str) {
        self.failing_rooms.lock().unwrap().insert(room_id.to_string());
    }

    pub fn sent(&self) -> Vec<(String, MessageContent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(_, c)| c.plain_text().to_string())
            .collect()
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }

    pub fn receipts(&self) -> Vec<String> {
        self.receipts.lock().unwrap().clone()
    }

    pub fn current_display_name(&self) -> Option<String> {
        self.display_name.lock().unwrap().clone()
    }

    /// Also log successful joins as `"join:<room>"` into `calls`
    pub fn trace_into(&self, calls: &Calls) {
        *self.trace.lock().unwrap() = Some(calls.clone());
    }
}

#[async_trait]
impl ChatService for MockChat {
    fn user_id(&self) -> &str {
        BOT_ID
    }

    async fn display_name(&self) -> Result<Option<String>, ChatError> {
        Ok(self.display_name.lock().unwrap().clone())
    }

    async fn set_display_name(&self, name: &str) -> Result<(), ChatError> {
        *self.display_name.lock().unwrap() = Some(name.to_string());
        Ok(())
    }

    async fn join_room(&self, room_id: &str) -> Result<(), ChatError> {
        if self.missing_rooms.lock().unwrap().contains(room_id) {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        }
        if self.failing_rooms.lock().unwrap().contains(room_id) {
            return Err(ChatError::Request("M_FORBIDDEN".to_string()));
        }
        self.joined.lock().unwrap().push(room_id.to_string());
        if let Some(trace) = self.trace.lock().unwrap().as_ref() {
            trace.push(format!("join:{room_id}"));
        }
        Ok(())
    }

    async fn send(&self, room_id: &str, content: MessageContent) -> Result<(), ChatError> {
        if self.missing_rooms.lock().unwrap().contains(room_id) {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((room_id.to_string(), content));
        Ok(())
    }

    async fn send_read_receipt(&self, _room_id: &str, event_id: &str) -> Result<(), ChatError> {
        self.receipts.lock().unwrap().push(event_id.to_string());
        Ok(())
    }

    async fn room(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
    }

    async fn rooms(&self) -> Vec<RoomInfo> {
        self.rooms.lock().unwrap().clone()
    }

    async fn room_members(&self, _room_id: &str) -> Result<Vec<String>, ChatError> {
        Ok(vec![BOT_ID.to_string()])
    }

    async fn listen_once(&self) -> Result<(), ChatError> {
        Ok(())
    }

    async fn start_listening(&self, _sinks: ChatSinks) -> Result<(), ChatError> {
        if *self.fail_start.lock().unwrap() {
            return Err(ChatError::Request("sync failed".to_string()));
        }
        *self.listening.lock().unwrap() = true;
        Ok(())
    }

    async fn stop_listening(&self) {
        *self.listening.lock().unwrap() = false;
        *self.stop_calls.lock().unwrap() += 1;
    }
}

// =============================================================================
// Broker transport
// =============================================================================

#[derive(Default)]
pub struct MockTransport {
    connected: Mutex<bool>,
    link: Mutex<Option<BrokerLink>>,
    failures_left: Mutex<u32>,
    hang: Mutex<bool>,
    hang_subscribe: Mutex<bool>,
    fail_subscribe: Mutex<Option<String>>,
    pub connects: Mutex<u32>,
    pub disconnects: Mutex<u32>,
    pub subscriptions: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    trace: Mutex<Option<Calls>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` connect attempts are refused
    pub fn fail_next_connects(&self, n: u32) {
        *self.failures_left.lock().unwrap() = n;
    }

    /// Connect attempts never complete
    pub fn hang_connects(&self, hang: bool) {
        *self.hang.lock().unwrap() = hang;
    }

    /// Subscribe requests never complete
    pub fn hang_subscribes(&self, hang: bool) {
        *self.hang_subscribe.lock().unwrap() = hang;
    }

    pub fn fail_subscribe_to(&self, topic: Option<&str>) {
        *self.fail_subscribe.lock().unwrap() = topic.map(str::to_string);
    }

    /// Simulate the connection dropping underneath the bridge
    pub fn drop_connection(&self, reason: &str) {
        *self.connected.lock().unwrap() = false;
        if let Some(link) = self.link.lock().unwrap().as_ref() {
            link.connection_lost(reason);
        }
    }

    /// Simulate the connection dropping without the transport reporting it
    pub fn drop_silently(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn link(&self) -> Option<BrokerLink> {
        self.link.lock().unwrap().clone()
    }

    /// Push an inbound message through the current link
    pub async fn deliver(&self, topic: &str, payload: &str) -> bool {
        let link = self.link().expect("transport was never connected");
        link.deliver(BrokerMessage::new(topic, payload.as_bytes().to_vec()))
            .await
    }

    /// Also log connect attempts as `"connect"` into `calls`
    pub fn trace_into(&self, calls: &Calls) {
        *self.trace.lock().unwrap() = Some(calls.clone());
    }

    pub fn connects(&self) -> u32 {
        *self.connects.lock().unwrap()
    }

    pub fn disconnects(&self) -> u32 {
        *self.disconnects.lock().unwrap()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn clear_subscriptions(&self) {
        self.subscriptions.lock().unwrap().clear();
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn connect(&self, _address: &BrokerAddress, link: BrokerLink) -> Result<(), BrokerError> {
        *self.connects.lock().unwrap() += 1;
        if let Some(trace) = self.trace.lock().unwrap().as_ref() {
            trace.push("connect");
        }
        let hang = *self.hang.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(BrokerError::Connect("connection refused".to_string()));
            }
        }
        *self.link.lock().unwrap() = Some(link);
        *self.connected.lock().unwrap() = true;
        Ok(())
    }

    async fn disconnect(&self) {
        *self.disconnects.lock().unwrap() += 1;
        *self.connected.lock().unwrap() = false;
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        let hang = *self.hang_subscribe.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        if self.fail_subscribe.lock().unwrap().as_deref() == Some(topic) {
            return Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: "not authorized".to_string(),
            });
        }
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

// =============================================================================
// Recording handlers
// =============================================================================

/// Shared call log
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Records `"<token> <args...>"` and optionally replies.
pub struct RecordingCommand {
    pub calls: Calls,
    pub reply: Option<String>,
}

impl RecordingCommand {
    pub fn new(calls: &Calls) -> Self {
        Self {
            calls: calls.clone(),
            reply: None,
        }
    }

    pub fn replying(calls: &Calls, reply: &str) -> Self {
        Self {
            calls: calls.clone(),
            reply: Some(reply.to_string()),
        }
    }
}

#[async_trait]
impl CommandHandler for RecordingCommand {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        let mut entry = call.token.to_string();
        for arg in call.args {
            entry.push(' ');
            entry.push_str(arg);
        }
        self.calls.push(entry);
        if let Some(reply) = &self.reply {
            bot.reply(call.event, reply).await?;
        }
        Ok(())
    }
}

pub struct FailingCommand;

#[async_trait]
impl CommandHandler for FailingCommand {
    async fn handle(&self, _bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        bail!("{} blew up", call.token)
    }
}

pub struct PanickingCommand;

#[async_trait]
impl CommandHandler for PanickingCommand {
    async fn handle(&self, _bot: &Bot, _call: CommandCall<'_>) -> Result<()> {
        panic!("handler panicked")
    }
}

/// Records `"<topic>=<payload>"`
pub struct RecordingTopic(pub Calls);

#[async_trait]
impl TopicHandler for RecordingTopic {
    async fn handle(&self, _bot: &Bot, message: &BrokerMessage, _config: &PluginConfig) -> Result<()> {
        self.0
            .push(format!("{}={}", message.topic, message.payload_text()));
        Ok(())
    }
}

/// Records `"<label>:<text>"`
pub struct RecordingObserver {
    pub calls: Calls,
    pub label: &'static str,
}

#[async_trait]
impl Observer for RecordingObserver {
    async fn observe(&self, _bot: &Bot, _event: &InboundEvent, text: &str) -> Result<()> {
        self.calls.push(format!("{}:{}", self.label, text));
        Ok(())
    }
}

pub struct FailingObserver;

#[async_trait]
impl Observer for FailingObserver {
    async fn observe(&self, _bot: &Bot, _event: &InboundEvent, _text: &str) -> Result<()> {
        bail!("observer failed")
    }
}

/// Records the owning plugin name on every run
pub struct RecordingCron(pub Calls);

#[async_trait]
impl CronHandler for RecordingCron {
    async fn run(&self, _bot: &Bot, config: &PluginConfig) -> Result<()> {
        self.0.push(config.plugin().to_string());
        Ok(())
    }
}

// =============================================================================
// Wiring
// =============================================================================

pub fn broker_settings() -> BrokerSettings {
    BrokerSettings {
        address: BrokerAddress::new("broker.test", 1883),
        connect_timeout: Duration::from_secs(5),
        health_check_interval: Duration::from_secs(5),
        backoff: BackoffConfig::default(),
    }
}

pub fn plugin_config(name: &str, toml_src: &str) -> PluginConfig {
    PluginConfig::new(name, toml::from_str(toml_src).expect("valid TOML"))
}

pub fn text_event(room_id: &str, sender: &str, body: &str) -> InboundEvent {
    InboundEvent::text(room_id, sender, format!("$evt-{body}"), body)
}

/// A fully wired event loop around the mocks
pub struct Harness {
    pub chat: Arc<MockChat>,
    pub transport: Arc<MockTransport>,
    pub bridge: Arc<BrokerBridge>,
    pub bot: Bot,
    pub sinks: ChatSinks,
    pub event_loop: EventLoop,
}

impl Harness {
    pub fn new(registry: Registry) -> Self {
        Self::with_settings(registry, EventLoopSettings::default())
    }

    pub fn with_settings(registry: Registry, settings: EventLoopSettings) -> Self {
        let registry = Arc::new(registry);
        let chat = Arc::new(MockChat::new());
        chat.add_room(RoomInfo::new("!ops:example").with_alias("#ops:example").with_name("ops"));
        chat.add_room(
            RoomInfo::new("!general:example")
                .with_alias("#general:example")
                .with_name("general"),
        );
        let transport = Arc::new(MockTransport::new());

        let (sinks, receivers) = queues(64);
        let bridge = Arc::new(BrokerBridge::new(
            transport.clone(),
            Arc::clone(&registry),
            broker_settings(),
            sinks.events.clone(),
        ));
        let bot = Bot::new(
            chat.clone(),
            Arc::clone(&bridge),
            BotIdentity::new(BOT_ID, None),
        );
        let event_loop = EventLoop::new(bot.clone(), registry, settings, receivers);

        Self {
            chat,
            transport,
            bridge,
            bot,
            sinks,
            event_loop,
        }
    }

    pub async fn push(&self, event: InboundEvent) {
        self.sinks
            .events
            .send(horscht_core::LoopEvent::Chat(event))
            .await
            .expect("event queue open");
    }

    pub async fn push_invite(&self, room_id: &str) {
        self.sinks
            .invites
            .send(horscht_core::InviteEvent {
                room_id: room_id.to_string(),
                inviter: Some("@alice:example".to_string()),
            })
            .await
            .expect("invite queue open");
    }

    pub async fn push_broker(&self, topic: &str, payload: &str) {
        self.sinks
            .events
            .send(horscht_core::LoopEvent::Broker(BrokerMessage::new(
                topic,
                payload.as_bytes().to_vec(),
            )))
            .await
            .expect("event queue open");
    }
}
