// ABOUTME: Command matching, access checks, dispatch and help generation for chat messages.
// ABOUTME: First accepted match in registration order wins; help lists only commands the caller may use.

use anyhow::Result;
use std::sync::Arc;

use crate::bot::{Bot, BotIdentity};
use crate::event::InboundEvent;
use crate::metrics;
use crate::registry::{CommandCall, CommandSpec, Registry};

/// Default literal that requests the help listing
pub const DEFAULT_HELP_TRIGGER: &str = "!help";

/// A command found in a message
#[derive(Debug, Clone)]
pub struct CommandMatch<'r> {
    pub spec: &'r CommandSpec,
    /// Whitespace-separated words after the matched token
    pub args: Vec<String>,
}

impl CommandMatch<'_> {
    /// The registered token that matched
    pub fn token(&self) -> &str {
        &self.spec.name
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(|s| s.as_str())
    }
}

/// What `route` did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A command handler ran
    Dispatched(String),
    /// A command matched but the caller may not use it
    Denied(String),
    /// The help listing was sent
    Help,
    NotMatched,
}

impl RouteOutcome {
    /// True iff a command was matched and dispatched
    pub fn is_dispatched(&self) -> bool {
        matches!(self, RouteOutcome::Dispatched(_))
    }
}

/// Routes chat text to command handlers.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    registry: Arc<Registry>,
    help_trigger: String,
}

impl CommandRouter {
    pub fn new(registry: Arc<Registry>, help_trigger: impl Into<String>) -> Self {
        Self {
            registry,
            help_trigger: help_trigger.into(),
        }
    }

    pub fn help_trigger(&self) -> &str {
        &self.help_trigger
    }

    /// Find the first command accepted for `text`.
    ///
    /// A token found at position 0 is always accepted. A token found later in
    /// the text is accepted only if the bot was mentioned.
    pub fn find_command(&self, text: &str, identity: &BotIdentity) -> Option<CommandMatch<'_>> {
        let mut mentioned = None;
        for spec in self.registry.commands() {
            let Some(found) = spec.matcher.find(text) else {
                continue;
            };
            let accepted = found.start() == 0
                || *mentioned.get_or_insert_with(|| identity.mentioned_in(text));
            if accepted {
                let args = text[found.end()..]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                return Some(CommandMatch { spec, args });
            }
        }
        None
    }

    /// Route one text message: dispatch a command, send help, or do nothing.
    ///
    /// Errors from the command handler propagate to the caller.
    pub async fn route(&self, bot: &Bot, event: &InboundEvent, text: &str) -> Result<RouteOutcome> {
        if let Some(found) = self.find_command(text, bot.identity()) {
            let token = found.token().to_string();
            let room_address = bot.room_address(&event.room_id).await;
            let access = self.registry.access();

            if !access.allowed(&token, &event.sender, &room_address) {
                tracing::info!(
                    command = %token,
                    sender = %event.sender,
                    room = %room_address,
                    "Command denied"
                );
                metrics::record_command_denied(&token);
                return Ok(RouteOutcome::Denied(token));
            }

            tracing::info!(
                command = %token,
                owner = %found.spec.owner,
                sender = %event.sender,
                args = ?found.args,
                "Dispatching command"
            );
            metrics::record_command_dispatched(&token);
            let call = CommandCall {
                event,
                token: &token,
                args: &found.args,
                config: &found.spec.config,
            };
            found.spec.handler.handle(bot, call).await?;
            return Ok(RouteOutcome::Dispatched(token));
        }

        if text.starts_with(&self.help_trigger) {
            let room_address = bot.room_address(&event.room_id).await;
            let help = self.help_text(&event.sender, &room_address);
            bot.reply(event, &help).await?;
            return Ok(RouteOutcome::Help);
        }

        Ok(RouteOutcome::NotMatched)
    }

    /// `"<command>: <help>"` for every command the caller may use, in registration order.
    pub fn help_lines(&self, user_id: &str, room_address: &str) -> Vec<String> {
        let access = self.registry.access();
        self.registry
            .commands()
            .iter()
            .filter(|spec| access.allowed(&spec.name, user_id, room_address))
            .map(|spec| format!("{}: {}", spec.name, spec.help_text))
            .collect()
    }

    pub fn help_text(&self, user_id: &str, room_address: &str) -> String {
        let lines = self.help_lines(user_id, room_address);
        if lines.is_empty() {
            "No commands available here.".to_string()
        } else {
            lines.join("\n")
        }
    }
}
