// ABOUTME: Boundary traits the core depends on: the chat service and the broker transport.
// ABOUTME: Wire protocols live behind these; the core only sees rooms, events and topics.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::broker::BrokerLink;
use crate::error::{BrokerError, ChatError};
use crate::event::{InviteEvent, LoopEvent};

// =============================================================================
// Chat Service
// =============================================================================

/// Content that can be sent to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Bot-style notice (used for replies)
    Notice(String),
    /// Plain text message
    Text(String),
    /// Message with both plain text and HTML formatting
    Html { plain: String, html: String },
}

impl MessageContent {
    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice(text.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// HTML message whose plain fallback is the HTML itself.
    pub fn html(html: impl Into<String>) -> Self {
        let html = html.into();
        Self::Html {
            plain: html.clone(),
            html,
        }
    }

    /// The plain text rendering of this content.
    pub fn plain_text(&self) -> &str {
        match self {
            Self::Notice(text) | Self::Text(text) => text,
            Self::Html { plain, .. } => plain,
        }
    }
}

/// Snapshot of a joined room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Internal room id (e.g. `!abc:example.org`)
    pub id: String,
    /// Canonical public alias (e.g. `#ops:example.org`), if set
    pub canonical_alias: Option<String>,
    /// Human-readable room name, if set
    pub name: Option<String>,
}

impl RoomInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            canonical_alias: None,
            name: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.canonical_alias = Some(alias.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Address used for access control: the canonical alias if present, else the id.
    pub fn address(&self) -> &str {
        self.canonical_alias.as_deref().unwrap_or(&self.id)
    }
}

/// Queue senders a chat listener pushes into.
#[derive(Debug, Clone)]
pub struct ChatSinks {
    pub events: mpsc::Sender<LoopEvent>,
    pub invites: mpsc::Sender<InviteEvent>,
}

/// The chat service as seen by the core.
///
/// Implementations run their listener as an independent producer; the only
/// contract is that events arrive in `ChatSinks` in the order the service
/// delivered them.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// The bot's own account id
    fn user_id(&self) -> &str;

    /// Current display name on the server
    async fn display_name(&self) -> Result<Option<String>, ChatError>;

    async fn set_display_name(&self, name: &str) -> Result<(), ChatError>;

    /// Join a room. Must report `ChatError::RoomNotFound` for rooms that no longer exist.
    async fn join_room(&self, room_id: &str) -> Result<(), ChatError>;

    async fn send(&self, room_id: &str, content: MessageContent) -> Result<(), ChatError>;

    async fn send_read_receipt(&self, room_id: &str, event_id: &str) -> Result<(), ChatError>;

    /// Look up a joined room
    async fn room(&self, room_id: &str) -> Option<RoomInfo>;

    /// All joined rooms
    async fn rooms(&self) -> Vec<RoomInfo>;

    /// Account ids of the active members of a room
    async fn room_members(&self, room_id: &str) -> Result<Vec<String>, ChatError>;

    /// Run one sync pass without delivering message events.
    async fn listen_once(&self) -> Result<(), ChatError>;

    /// Start the background listener. Invites pending at start are delivered;
    /// message backlog from before the call is not.
    async fn start_listening(&self, sinks: ChatSinks) -> Result<(), ChatError>;

    /// Stop the background listener started by `start_listening`.
    async fn stop_listening(&self);
}

// =============================================================================
// Broker Transport
// =============================================================================

/// Where the broker lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A publish/subscribe client.
///
/// `connect` hands the transport a `BrokerLink` for that connection; the
/// transport delivers inbound messages and reports drops through it from its
/// own task.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establish a connection. Resolves once the broker acknowledged it.
    async fn connect(&self, address: &BrokerAddress, link: BrokerLink) -> Result<(), BrokerError>;

    /// Tear down the current connection, if any. Clears `is_connected`.
    async fn disconnect(&self);

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// What the transport believes about its connection
    fn is_connected(&self) -> bool;
}
