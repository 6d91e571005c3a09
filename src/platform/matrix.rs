// ABOUTME: Matrix implementation of the core ChatService trait on top of matrix-sdk.
// ABOUTME: Converts sync events into core events and runs the sync loop as a background producer.

use async_trait::async_trait;
use horscht_core::{
    BackoffConfig, BackoffState, ChatError, ChatService, ChatSinks, EventKind, InboundEvent,
    InviteEvent, LoopEvent, MessageContent, RoomInfo,
};
use matrix_sdk::{
    config::SyncSettings,
    event_handler::EventHandlerHandle,
    room::Room,
    ruma::{
        api::client::{error::ErrorKind, receipt::create_receipt::v3::ReceiptType},
        events::{
            receipt::ReceiptThread,
            room::{
                member::StrippedRoomMemberEvent,
                message::{MessageType, RoomMessageEventContent, SyncRoomMessageEvent},
            },
        },
        OwnedEventId, OwnedRoomId,
    },
    Client, RoomMemberships, RoomState,
};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Background listener state owned by the service between start and stop.
struct Listener {
    handlers: Vec<EventHandlerHandle>,
    sync_task: JoinHandle<()>,
}

/// ChatService backed by a logged-in matrix-sdk client.
pub struct MatrixChatService {
    client: Client,
    user_id: String,
    listener: Mutex<Option<Listener>>,
}

impl MatrixChatService {
    /// Wrap a logged-in client.
    pub fn new(client: Client) -> Result<Self, ChatError> {
        let user_id = client.user_id().ok_or(ChatError::NotLoggedIn)?.to_string();
        Ok(Self {
            client,
            user_id,
            listener: Mutex::new(None),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn joined_room(&self, room_id: &str) -> Result<Room, ChatError> {
        let id = parse_room_id(room_id)?;
        self.client
            .get_room(&id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))
    }

    fn register_invite_handler(&self, sinks: &ChatSinks) -> EventHandlerHandle {
        let invites = sinks.invites.clone();
        self.client.add_event_handler(
            move |ev: StrippedRoomMemberEvent, client: Client, room: Room| {
                let invites = invites.clone();
                async move {
                    if client.user_id().is_none_or(|me| ev.state_key != me) {
                        return;
                    }
                    if room.state() != RoomState::Invited {
                        return;
                    }
                    let invite = InviteEvent {
                        room_id: room.room_id().to_string(),
                        inviter: Some(ev.sender.to_string()),
                    };
                    tracing::debug!(room_id = %invite.room_id, inviter = ?invite.inviter, "Invite received");
                    if invites.send(invite).await.is_err() {
                        tracing::warn!("Invite queue receiver dropped");
                    }
                }
            },
        )
    }

    fn register_message_handler(&self, sinks: &ChatSinks) -> EventHandlerHandle {
        let events = sinks.events.clone();
        self.client
            .add_event_handler(move |event: SyncRoomMessageEvent, room: Room| {
                let events = events.clone();
                async move {
                    // Only original events, not redactions
                    let Some(original) = event.as_original() else {
                        return;
                    };
                    let (kind, body) = kind_and_body(&original.content.msgtype);
                    let millis: u64 = original.origin_server_ts.0.into();
                    let inbound = InboundEvent {
                        room_id: room.room_id().to_string(),
                        sender: original.sender.to_string(),
                        event_id: original.event_id.to_string(),
                        kind,
                        body,
                        timestamp: (millis / 1000) as i64,
                    };
                    if events.send(LoopEvent::Chat(inbound)).await.is_err() {
                        tracing::warn!("Event queue receiver dropped");
                    }
                }
            })
    }
}

impl fmt::Debug for MatrixChatService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixChatService")
            .field("user_id", &self.user_id)
            .field("listening", &self.listener.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl ChatService for MatrixChatService {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn display_name(&self) -> Result<Option<String>, ChatError> {
        self.client
            .account()
            .get_display_name()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))
    }

    async fn set_display_name(&self, name: &str) -> Result<(), ChatError> {
        self.client
            .account()
            .set_display_name(Some(name))
            .await
            .map_err(|e| ChatError::Request(e.to_string()))
    }

    async fn join_room(&self, room_id: &str) -> Result<(), ChatError> {
        let id = parse_room_id(room_id)?;
        self.client
            .join_room_by_id(&id)
            .await
            .map_err(|e| chat_error(e, room_id))?;
        tracing::info!(room_id, "Joined room");
        Ok(())
    }

    async fn send(&self, room_id: &str, content: MessageContent) -> Result<(), ChatError> {
        let room = self.joined_room(room_id)?;
        let msg_content = match content {
            MessageContent::Notice(text) => RoomMessageEventContent::notice_plain(text),
            MessageContent::Text(text) => RoomMessageEventContent::text_plain(text),
            MessageContent::Html { plain, html } => RoomMessageEventContent::text_html(plain, html),
        };
        room.send(msg_content)
            .await
            .map_err(|e| chat_error(e, room_id))?;
        Ok(())
    }

    async fn send_read_receipt(&self, room_id: &str, event_id: &str) -> Result<(), ChatError> {
        let room = self.joined_room(room_id)?;
        let event_id: OwnedEventId = event_id
            .parse()
            .map_err(|e| ChatError::Request(format!("Invalid event ID {event_id}: {e}")))?;
        room.send_single_receipt(ReceiptType::Read, ReceiptThread::Unthreaded, event_id)
            .await
            .map_err(|e| chat_error(e, room_id))
    }

    async fn room(&self, room_id: &str) -> Option<RoomInfo> {
        let room = self.joined_room(room_id).ok()?;
        Some(room_info(&room))
    }

    async fn rooms(&self) -> Vec<RoomInfo> {
        self.client.joined_rooms().iter().map(room_info).collect()
    }

    async fn room_members(&self, room_id: &str) -> Result<Vec<String>, ChatError> {
        let room = self.joined_room(room_id)?;
        let members = room
            .members(RoomMemberships::ACTIVE)
            .await
            .map_err(|e| chat_error(e, room_id))?;
        Ok(members.iter().map(|m| m.user_id().to_string()).collect())
    }

    async fn listen_once(&self) -> Result<(), ChatError> {
        self.client
            .sync_once(SyncSettings::default().timeout(SYNC_TIMEOUT))
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        Ok(())
    }

    async fn start_listening(&self, sinks: ChatSinks) -> Result<(), ChatError> {
        self.stop_listening().await;

        // Backlog from the initial sync is never delivered.
        let initial = self
            .client
            .sync_once(SyncSettings::default().timeout(SYNC_TIMEOUT))
            .await
            .map_err(|e| ChatError::Request(format!("Initial sync failed: {e}")))?;
        tracing::info!("Initial sync complete");

        for room in self.client.invited_rooms() {
            let invite = InviteEvent {
                room_id: room.room_id().to_string(),
                inviter: None,
            };
            if let Err(e) = sinks.invites.try_send(invite) {
                tracing::warn!(room_id = %room.room_id(), error = %e, "Could not queue pending invite");
            }
        }

        let handlers = vec![
            self.register_invite_handler(&sinks),
            self.register_message_handler(&sinks),
        ];
        let sync_task = tokio::spawn(sync_loop(self.client.clone(), initial.next_batch));

        *self.listener.lock() = Some(Listener {
            handlers,
            sync_task,
        });
        Ok(())
    }

    async fn stop_listening(&self) {
        let Some(listener) = self.listener.lock().take() else {
            return;
        };
        listener.sync_task.abort();
        for handle in listener.handlers {
            self.client.remove_event_handler(handle);
        }
        tracing::info!("Matrix listener stopped");
    }
}

/// Keep syncing from `token`, backing off on errors.
async fn sync_loop(client: Client, mut token: String) {
    let mut backoff = BackoffState::new(BackoffConfig::default());
    loop {
        let settings = SyncSettings::default()
            .timeout(SYNC_TIMEOUT)
            .token(token.clone());
        match client.sync_once(settings).await {
            Ok(response) => {
                backoff.record_success();
                token = response.next_batch;
            }
            Err(e) => {
                let delay = backoff.record_failure(tokio::time::Instant::now());
                tracing::warn!(
                    error = %e,
                    failures = backoff.consecutive_failures(),
                    retry_in = ?delay,
                    "Sync failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn parse_room_id(room_id: &str) -> Result<OwnedRoomId, ChatError> {
    room_id
        .parse()
        .map_err(|e| ChatError::Request(format!("Invalid room ID {room_id}: {e}")))
}

fn chat_error(err: matrix_sdk::Error, room_id: &str) -> ChatError {
    match err.client_api_error_kind() {
        Some(ErrorKind::NotFound) => ChatError::RoomNotFound(room_id.to_string()),
        _ => ChatError::Request(err.to_string()),
    }
}

fn room_info(room: &Room) -> RoomInfo {
    RoomInfo {
        id: room.room_id().to_string(),
        canonical_alias: room.canonical_alias().map(|a| a.to_string()),
        name: room.name(),
    }
}

/// Map a message type to the core's event kind and body.
fn kind_and_body(msgtype: &MessageType) -> (EventKind, Option<String>) {
    match msgtype {
        MessageType::Text(text) => (EventKind::Text, Some(text.body.clone())),
        MessageType::Notice(notice) => (EventKind::Notice, Some(notice.body.clone())),
        MessageType::Emote(emote) => (EventKind::Emote, Some(emote.body.clone())),
        other => (EventKind::Other(other.msgtype().to_string()), Some(other.body().to_string())),
    }
}
