// ABOUTME: Error types at the core's boundaries: chat service, broker transport, plugin registry.
// ABOUTME: Plugin handlers themselves return anyhow::Result; these enums are for conditions callers branch on.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a chat service implementation.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The room does not exist (any more). Callers swallow this for invites and replies.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Chat client is not logged in")]
    NotLoggedIn,

    #[error("Chat request failed: {0}")]
    Request(String),
}

impl ChatError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::RoomNotFound(_))
    }
}

/// Failures reported by the broker bridge or its transport.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connect failed: {0}")]
    Connect(String),

    #[error("Broker connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Broker is not connected")]
    NotConnected,

    #[error("Broker bridge was shut down")]
    ShutDown,

    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),
}

/// Startup registration failures. All of them are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Plugin '{plugin}' is missing required parameter '{key}'")]
    MissingParameter { plugin: String, key: String },

    #[error("Plugin '{plugin}' has invalid parameter '{key}': {reason}")]
    InvalidParameter {
        plugin: String,
        key: String,
        reason: String,
    },

    #[error("Plugin '{plugin}' cron interval must be at least 1 second, got {secs}")]
    InvalidInterval { plugin: String, secs: i64 },

    #[error("Plugin '{plugin}' registers a {what} with an empty name")]
    EmptyName { plugin: String, what: &'static str },

    #[error("Unknown plugin '{0}'")]
    UnknownPlugin(String),
}
