// ABOUTME: The single consumer: drains chat/broker events, invites, cron ticks and broker health in fixed order.
// ABOUTME: Every plugin call runs inside a boundary that logs errors and panics and keeps the loop going.

use anyhow::{Context, Result};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bot::Bot;
use crate::error::ChatError;
use crate::event::{BrokerMessage, InboundEvent, InviteEvent, LoopEvent};
use crate::metrics;
use crate::registry::Registry;
use crate::router::{CommandRouter, RouteOutcome, DEFAULT_HELP_TRIGGER};
use crate::scheduler::{Scheduler, DEFAULT_WRAP_BASE};
use crate::traits::ChatSinks;

/// Default reply when the bot is addressed but nothing matched
pub const DEFAULT_MENTION_REPLY: &str = "Don't mess with me, buddy. Try !help instead.";

/// Event loop tuning
#[derive(Debug, Clone)]
pub struct EventLoopSettings {
    /// Timer wake-up quantum
    pub tick: Duration,
    pub help_trigger: String,
    /// Reply when mentioned without a command; `None` disables it
    pub mention_reply: Option<String>,
    /// Lower bound for the scheduler's wrap threshold
    pub cron_wrap: u64,
}

impl Default for EventLoopSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            help_trigger: DEFAULT_HELP_TRIGGER.to_string(),
            mention_reply: Some(DEFAULT_MENTION_REPLY.to_string()),
            cron_wrap: DEFAULT_WRAP_BASE,
        }
    }
}

/// Receiving ends of the two queues, owned by the event loop
#[derive(Debug)]
pub struct QueueReceivers {
    pub events: mpsc::Receiver<LoopEvent>,
    pub invites: mpsc::Receiver<InviteEvent>,
}

/// Create the bounded event and invite queues.
pub fn queues(capacity: usize) -> (ChatSinks, QueueReceivers) {
    let (events_tx, events_rx) = mpsc::channel(capacity);
    let (invites_tx, invites_rx) = mpsc::channel(capacity);
    (
        ChatSinks {
            events: events_tx,
            invites: invites_tx,
        },
        QueueReceivers {
            events: events_rx,
            invites: invites_rx,
        },
    )
}

/// What woke the loop
enum Wake {
    Event(LoopEvent),
    Invite(InviteEvent),
    Tick,
}

/// The single consumer and the only caller of plugin code.
pub struct EventLoop {
    bot: Bot,
    registry: Arc<Registry>,
    router: CommandRouter,
    scheduler: Scheduler,
    settings: EventLoopSettings,
    events: mpsc::Receiver<LoopEvent>,
    invites: mpsc::Receiver<InviteEvent>,
}

impl EventLoop {
    pub fn new(
        bot: Bot,
        registry: Arc<Registry>,
        settings: EventLoopSettings,
        receivers: QueueReceivers,
    ) -> Self {
        let router = CommandRouter::new(Arc::clone(&registry), settings.help_trigger.clone());
        let scheduler = Scheduler::new(registry.crons().to_vec(), settings.cron_wrap, Instant::now());
        Self {
            bot,
            registry,
            router,
            scheduler,
            settings,
            events: receivers.events,
            invites: receivers.invites,
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Attempts an initial broker connect (failure is left to the health check),
    /// starts the chat listener, then loops. On exit the listener is stopped
    /// and the broker bridge shut down.
    pub async fn run(mut self, sinks: ChatSinks, shutdown: CancellationToken) -> Result<()> {
        if let Err(e) = self.bot.broker().connect().await {
            tracing::warn!(error = %e, "Initial broker connect failed, health check will retry");
        }

        if let Err(e) = self.bot.chat().start_listening(sinks).await {
            self.bot.broker().shutdown().await;
            return Err(e).context("Failed to start chat listener");
        }

        tracing::info!(
            plugins = ?self.registry.plugin_names(),
            commands = self.registry.commands().len(),
            topics = self.registry.topics().len(),
            crons = self.registry.crons().len(),
            "Event loop started"
        );

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = self.events.recv() => Wake::Event(event),
                Some(invite) = self.invites.recv() => Wake::Invite(invite),
                _ = ticker.tick() => Wake::Tick,
            };
            self.iterate(wake).await;
        }

        tracing::info!("Shutting down event loop");
        self.bot.chat().stop_listening().await;
        self.bot.broker().shutdown().await;
        Ok(())
    }

    /// One iteration without a pending wake-up item.
    pub async fn run_once(&mut self) {
        self.iterate(Wake::Tick).await;
    }

    /// events -> invites -> cron -> broker health
    async fn iterate(&mut self, wake: Wake) {
        let (first_event, first_invite) = match wake {
            Wake::Event(event) => (Some(event), None),
            Wake::Invite(invite) => (None, Some(invite)),
            Wake::Tick => (None, None),
        };

        if let Some(event) = first_event {
            self.handle_event(event).await;
        }
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }

        if let Some(invite) = first_invite {
            self.handle_invite(invite).await;
        }
        while let Ok(invite) = self.invites.try_recv() {
            self.handle_invite(invite).await;
        }

        self.run_cron().await;

        self.bot.broker().health_check(Instant::now()).await;
    }

    async fn handle_event(&self, event: LoopEvent) {
        match event {
            LoopEvent::Chat(event) => {
                metrics::record_event_received("chat");
                self.handle_chat(event).await;
            }
            LoopEvent::Broker(message) => {
                metrics::record_event_received("broker");
                self.handle_broker(message).await;
            }
        }
    }

    async fn handle_chat(&self, event: InboundEvent) {
        if let Err(e) = self
            .bot
            .chat()
            .send_read_receipt(&event.room_id, &event.event_id)
            .await
        {
            tracing::debug!(event_id = %event.event_id, error = %e, "Read receipt failed");
        }

        let Some(text) = event.text_body() else {
            return;
        };
        if event.sender == self.bot.user_id() {
            return;
        }

        for observer in self.registry.observers() {
            guarded("observer", &observer.owner, observer.handler.observe(&self.bot, &event, text))
                .await;
        }

        let outcome = guarded("command", "router", self.router.route(&self.bot, &event, text)).await;

        if outcome == Some(RouteOutcome::NotMatched) && self.bot.mentions(text) {
            if let Some(reply) = self.settings.mention_reply.as_deref() {
                guarded("mention", "core", self.bot.reply(&event, reply)).await;
            }
        }
    }

    async fn handle_broker(&self, message: BrokerMessage) {
        guarded("topic", &message.topic, self.bot.broker().dispatch(&self.bot, &message)).await;
    }

    async fn handle_invite(&self, invite: InviteEvent) {
        tracing::info!(room_id = %invite.room_id, inviter = ?invite.inviter, "Invited to room");
        match self.bot.chat().join_room(&invite.room_id).await {
            Ok(()) => {
                metrics::record_invite("joined");
                tracing::info!(room_id = %invite.room_id, "Joined room");
            }
            Err(ChatError::RoomNotFound(_)) => {
                metrics::record_invite("not_found");
                tracing::info!(room_id = %invite.room_id, "Invited to nonexistent room, ignoring");
            }
            Err(e) => {
                metrics::record_invite("failed");
                tracing::warn!(room_id = %invite.room_id, error = %e, "Failed to join room");
            }
        }
    }

    async fn run_cron(&mut self) {
        let due = self.scheduler.advance(Instant::now());
        for task in due {
            tracing::debug!(
                plugin = %task.owner_name,
                elapsed = self.scheduler.elapsed_seconds(),
                "Cron task due"
            );
            metrics::record_cron_fired(&task.owner_name);
            guarded("cron", &task.owner_name, task.handler.run(&self.bot, &task.config)).await;
        }
    }
}

/// Run one plugin invocation; log failures and panics instead of propagating them.
async fn guarded<T, F>(role: &'static str, owner: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            metrics::record_handler_failure(role);
            tracing::error!(role, owner, error = %format!("{e:#}"), "Handler failed");
            None
        }
        Err(panic) => {
            metrics::record_handler_failure(role);
            tracing::error!(role, owner, panic = %panic_message(&*panic), "Handler panicked");
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
