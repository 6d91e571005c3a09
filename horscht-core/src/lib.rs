// ABOUTME: Platform-agnostic core of the horscht chat bot.
// ABOUTME: Plugin registry, access control, command routing, cron scheduling, broker bridge and event loop.

pub mod acl;
pub mod backoff;
pub mod bot;
pub mod broker;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod traits;

pub use acl::{AccessControl, AccessRule};
pub use backoff::{BackoffConfig, BackoffState};
pub use bot::{localpart, Bot, BotIdentity};
pub use broker::{BrokerBridge, BrokerLink, BrokerSettings, ConnectionState, HealthCheck};
pub use error::{BrokerError, ChatError, RegistryError};
pub use event::{BrokerMessage, EventKind, InboundEvent, InviteEvent, LoopEvent};
pub use event_loop::{queues, EventLoop, EventLoopSettings, QueueReceivers, DEFAULT_MENTION_REPLY};
pub use registry::{
    CommandCall, CommandHandler, CommandSpec, CronHandler, CronSpec, Observer, ObserverSpec,
    Plugin, PluginConfig, Registry, TopicHandler, TopicSpec,
};
pub use router::{CommandMatch, CommandRouter, RouteOutcome, DEFAULT_HELP_TRIGGER};
pub use scheduler::{Scheduler, DEFAULT_WRAP_BASE};
pub use traits::{BrokerAddress, BrokerTransport, ChatService, ChatSinks, MessageContent, RoomInfo};
