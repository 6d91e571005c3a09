// ABOUTME: Ephemeral event types flowing through the event loop's queues.
// ABOUTME: Chat events and broker messages share one ordered queue; invites have their own.

/// Kind of a chat room message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Plain text message (the only kind commands are read from)
    Text,
    Notice,
    Emote,
    /// Anything else, carrying the platform's type name
    Other(String),
}

/// A chat-service event, consumed exactly once by the event loop.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub room_id: String,
    pub sender: String,
    pub event_id: String,
    pub kind: EventKind,
    /// Message body for message events
    pub body: Option<String>,
    /// Seconds since Unix epoch
    pub timestamp: i64,
}

impl InboundEvent {
    /// Build a text message event. Mostly useful for adapters and tests.
    pub fn text(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        event_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
            event_id: event_id.into(),
            kind: EventKind::Text,
            body: Some(body.into()),
            timestamp: 0,
        }
    }

    /// Body text if this is a plain text message.
    pub fn text_body(&self) -> Option<&str> {
        match self.kind {
            EventKind::Text => self.body.as_deref(),
            _ => None,
        }
    }
}

/// An invitation to a room. Triggers one join attempt and is then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteEvent {
    pub room_id: String,
    pub inviter: Option<String>,
}

/// A publish/subscribe message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Item type of the ordered event queue.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Chat(InboundEvent),
    Broker(BrokerMessage),
}
