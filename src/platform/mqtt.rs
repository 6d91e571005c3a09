// ABOUTME: MQTT implementation of the core BrokerTransport trait using rumqttc.
// ABOUTME: One poll task per connection feeds publishes into the BrokerLink and reports drops.

use async_trait::async_trait;
use horscht_core::{BrokerAddress, BrokerError, BrokerLink, BrokerMessage, BrokerTransport};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// One live connection: the request handle plus its poll task.
struct Session {
    client: AsyncClient,
    poll_task: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

/// MQTT transport. Holds no session until the bridge connects it.
pub struct MqttTransport {
    client_id: String,
    keep_alive: Duration,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>, keep_alive: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive,
            session: Mutex::new(None),
        }
    }

    fn options(&self, address: &BrokerAddress) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &address.host, address.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options
    }

    fn client(&self) -> Result<AsyncClient, BrokerError> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(BrokerError::NotConnected)
    }

    fn close_session(&self) {
        if let Some(session) = self.session.lock().take() {
            session.connected.store(false, Ordering::SeqCst);
            // Best effort; the poll task is aborted right after.
            let _ = session.client.try_disconnect();
            session.poll_task.abort();
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("client_id", &self.client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&self, address: &BrokerAddress, link: BrokerLink) -> Result<(), BrokerError> {
        self.close_session();

        let (client, eventloop) = AsyncClient::new(self.options(address), REQUEST_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let (ack_tx, ack_rx) = oneshot::channel();
        let poll_task = tokio::spawn(poll(eventloop, link, Arc::clone(&connected), ack_tx));

        *self.session.lock() = Some(Session {
            client,
            poll_task,
            connected,
        });

        match ack_rx.await {
            Ok(Ok(())) => {
                tracing::info!(broker = %address, client_id = %self.client_id, "MQTT connected");
                Ok(())
            }
            Ok(Err(reason)) => {
                self.close_session();
                Err(BrokerError::Connect(reason))
            }
            Err(_) => {
                self.close_session();
                Err(BrokerError::Connect("poll task ended before acknowledgement".to_string()))
            }
        }
    }

    async fn disconnect(&self) {
        self.close_session();
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client()?
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.connected.load(Ordering::SeqCst))
    }
}

/// Drive the event loop until the connection fails.
///
/// The first ConnAck (or error) answers `ack`; later errors are drop reports.
async fn poll(
    mut eventloop: EventLoop,
    link: BrokerLink,
    connected: Arc<AtomicBool>,
    ack: oneshot::Sender<Result<(), String>>,
) {
    let mut ack = Some(ack);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                let result = if connack.code == ConnectReturnCode::Success {
                    connected.store(true, Ordering::SeqCst);
                    Ok(())
                } else {
                    Err(format!("broker refused connection: {:?}", connack.code))
                };
                let refused = result.is_err();
                if let Some(tx) = ack.take() {
                    let _ = tx.send(result);
                }
                if refused {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, bytes = publish.payload.len(), "MQTT message");
                let message = BrokerMessage::new(publish.topic.clone(), publish.payload.to_vec());
                if !link.deliver(message).await {
                    tracing::debug!("Event loop gone, stopping MQTT poll task");
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                match ack.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e.to_string()));
                    }
                    None => link.connection_lost(&e.to_string()),
                }
                return;
            }
        }
    }
}
