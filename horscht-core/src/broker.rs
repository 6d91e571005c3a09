// ABOUTME: Broker bridge: connection state machine, topic subscription, routing and publishing.
// ABOUTME: Connect/shutdown are serialized; transport drop reports arrive through a generation-tagged BrokerLink.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::backoff::{BackoffConfig, BackoffState};
use crate::bot::Bot;
use crate::error::BrokerError;
use crate::event::{BrokerMessage, LoopEvent};
use crate::metrics;
use crate::registry::Registry;
use crate::traits::{BrokerAddress, BrokerTransport};

/// Connection state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The transport dropped an established connection
    Reconnecting,
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub address: BrokerAddress,
    /// Upper bound for one `connect()` attempt
    pub connect_timeout: Duration,
    /// How often the event loop's health check looks at the connection
    pub health_check_interval: Duration,
    pub backoff: BackoffConfig,
}

impl BrokerSettings {
    pub fn new(address: BrokerAddress) -> Self {
        Self {
            address,
            connect_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Result of one health check call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// Not due yet, waiting out a backoff delay, or shut down
    Skipped,
    Healthy,
    Reconnected,
    Failed,
}

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    generation: u64,
    shut_down: bool,
    lost_while_connecting: bool,
}

#[derive(Debug)]
struct Health {
    last_check: Option<Instant>,
    backoff: BackoffState,
}

/// Handle given to the transport for one connection attempt.
///
/// Inbound messages go into the event loop's ordered queue. Drop reports only
/// count while this link's connection is the current one.
#[derive(Debug, Clone)]
pub struct BrokerLink {
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    events: mpsc::Sender<LoopEvent>,
}

impl BrokerLink {
    /// Queue an inbound message for the event loop. Returns false if the loop is gone.
    pub async fn deliver(&self, message: BrokerMessage) -> bool {
        self.events.send(LoopEvent::Broker(message)).await.is_ok()
    }

    /// Report that the transport lost this connection.
    pub fn connection_lost(&self, reason: &str) {
        let mut shared = self.shared.lock();
        if shared.shut_down || shared.generation != self.generation {
            tracing::debug!(generation = self.generation, reason, "Ignoring drop report from stale connection");
            return;
        }
        match shared.state {
            ConnectionState::Connected => {
                tracing::warn!(reason, "Broker connection lost");
                shared.state = ConnectionState::Reconnecting;
            }
            ConnectionState::Connecting => {
                tracing::warn!(reason, "Broker connection lost while connecting");
                shared.lost_while_connecting = true;
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
        }
    }

    /// Whether this link belongs to the bridge's current connection
    pub fn is_current(&self) -> bool {
        let shared = self.shared.lock();
        !shared.shut_down && shared.generation == self.generation
    }
}

/// Keeps the broker connection alive and routes its messages to topic handlers.
pub struct BrokerBridge {
    transport: Arc<dyn BrokerTransport>,
    registry: Arc<Registry>,
    settings: BrokerSettings,
    events: mpsc::Sender<LoopEvent>,
    shared: Arc<Mutex<Shared>>,
    health: Mutex<Health>,
    op_lock: tokio::sync::Mutex<()>,
}

impl BrokerBridge {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        registry: Arc<Registry>,
        settings: BrokerSettings,
        events: mpsc::Sender<LoopEvent>,
    ) -> Self {
        let backoff = BackoffState::new(settings.backoff.clone());
        Self {
            transport,
            registry,
            settings,
            events,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                generation: 0,
                shut_down: false,
                lost_while_connecting: false,
            })),
            health: Mutex::new(Health {
                last_check: None,
                backoff,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Connect (or reconnect) and subscribe to every registered topic.
    ///
    /// Waits at most `connect_timeout` for the transport handshake and all
    /// subscriptions together. On failure the bridge
    /// is left `Disconnected` and the health check retries later.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let _op = self.op_lock.lock().await;

        let (generation, previous) = {
            let mut shared = self.shared.lock();
            if shared.shut_down {
                return Err(BrokerError::ShutDown);
            }
            let previous = shared.state;
            shared.generation += 1;
            shared.state = ConnectionState::Connecting;
            shared.lost_while_connecting = false;
            (shared.generation, previous)
        };

        if previous == ConnectionState::Reconnecting || self.transport.is_connected() {
            tracing::debug!(?previous, "Forcing clean disconnect before connecting");
            self.transport.disconnect().await;
        }

        tracing::info!(address = %self.settings.address, generation, "Connecting to broker");
        let link = BrokerLink {
            shared: Arc::clone(&self.shared),
            generation,
            events: self.events.clone(),
        };

        // Handshake and subscriptions share one deadline.
        let timeout = self.settings.connect_timeout;
        let attempt = async {
            self.transport
                .connect(&self.settings.address, link)
                .await?;
            self.subscribe_all().await
        };
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(timeout)),
        };

        let result = result.and_then(|()| {
            let mut shared = self.shared.lock();
            if shared.lost_while_connecting {
                return Err(BrokerError::ConnectionLost(
                    "dropped during connect".to_string(),
                ));
            }
            shared.state = ConnectionState::Connected;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.health.lock().backoff.record_success();
                metrics::record_broker_connect(true);
                tracing::info!(
                    address = %self.settings.address,
                    topics = self.registry.topics().len(),
                    "Broker connected"
                );
                Ok(())
            }
            Err(e) => {
                self.transport.disconnect().await;
                self.shared.lock().state = ConnectionState::Disconnected;
                let delay = self.health.lock().backoff.record_failure(Instant::now());
                metrics::record_broker_connect(false);
                tracing::warn!(error = %e, retry_in = ?delay, "Broker connect failed");
                Err(e)
            }
        }
    }

    async fn subscribe_all(&self) -> Result<(), BrokerError> {
        for topic in self.registry.topics() {
            self.transport.subscribe(&topic.topic).await?;
            tracing::debug!(topic = %topic.topic, owner = %topic.owner, "Subscribed");
        }
        Ok(())
    }

    /// Periodic connection supervision, called by the event loop every iteration.
    ///
    /// Runs at most once per `health_check_interval`; while a backoff delay is
    /// pending no reconnect is attempted.
    pub async fn health_check(&self, now: Instant) -> HealthCheck {
        {
            let mut health = self.health.lock();
            let due = health
                .last_check
                .is_none_or(|last| now.saturating_duration_since(last) >= self.settings.health_check_interval);
            if !due || !health.backoff.ready(now) {
                return HealthCheck::Skipped;
            }
            health.last_check = Some(now);
        }

        {
            let mut shared = self.shared.lock();
            if shared.shut_down {
                return HealthCheck::Skipped;
            }
            if shared.state == ConnectionState::Connected {
                if self.transport.is_connected() {
                    return HealthCheck::Healthy;
                }
                tracing::warn!("Transport reports disconnected, reconnecting");
                shared.state = ConnectionState::Reconnecting;
            }
        }

        match self.connect().await {
            Ok(()) => HealthCheck::Reconnected,
            Err(_) => HealthCheck::Failed,
        }
    }

    /// Route a broker message to its topic handler. Returns false for unknown topics.
    ///
    /// Handler errors propagate to the caller.
    pub async fn dispatch(&self, bot: &Bot, message: &BrokerMessage) -> Result<bool> {
        let Some(spec) = self.registry.topic_for(&message.topic) else {
            tracing::debug!(topic = %message.topic, "No handler for topic, dropping message");
            metrics::record_broker_message(false);
            return Ok(false);
        };
        metrics::record_broker_message(true);
        tracing::debug!(topic = %message.topic, owner = %spec.owner, "Dispatching broker message");
        spec.handler.handle(bot, message, &spec.config).await?;
        Ok(true)
    }

    /// Best-effort publish. Failures are logged and returned, never retried.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.is_connected() {
            tracing::warn!(topic, "Broker not connected, dropping outbound message");
            return Err(BrokerError::NotConnected);
        }
        match self.transport.publish(topic, payload).await {
            Ok(()) => {
                tracing::debug!(topic, bytes = payload.len(), "Published");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "Publish failed");
                Err(e)
            }
        }
    }

    /// Disconnect for good. Later `connect()` calls fail with `ShutDown`.
    pub async fn shutdown(&self) {
        let _op = self.op_lock.lock().await;
        {
            let mut shared = self.shared.lock();
            if shared.shut_down {
                return;
            }
            shared.shut_down = true;
            shared.generation += 1;
        }
        self.transport.disconnect().await;
        self.shared.lock().state = ConnectionState::Disconnected;
        tracing::info!("Broker bridge shut down");
    }
}

impl std::fmt::Debug for BrokerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBridge")
            .field("address", &self.settings.address)
            .field("state", &self.state())
            .finish()
    }
}
