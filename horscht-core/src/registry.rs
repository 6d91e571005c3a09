// ABOUTME: Plugin registry: commands, broker topics, observers and cron tasks, built once at startup.
// ABOUTME: Defines the four role-tagged handler traits and the Plugin descriptor plugins are built from.

use anyhow::Result;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::acl::{AccessControl, AccessRule};
use crate::bot::Bot;
use crate::error::RegistryError;
use crate::event::{BrokerMessage, InboundEvent};

// =============================================================================
// Handler Traits
// =============================================================================

/// Everything a command handler gets about the invocation.
#[derive(Debug, Clone, Copy)]
pub struct CommandCall<'a> {
    /// The chat event that carried the command
    pub event: &'a InboundEvent,
    /// The registered command token that matched (e.g. `!status`)
    pub token: &'a str,
    /// Whitespace-separated words following the token
    pub args: &'a [String],
    /// The owning plugin's configuration
    pub config: &'a PluginConfig,
}

/// Handles a chat command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()>;
}

/// Handles a message published on a subscribed broker topic.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, bot: &Bot, message: &BrokerMessage, config: &PluginConfig) -> Result<()>;
}

/// Sees every inbound text message, whether or not it was a command.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn observe(&self, bot: &Bot, event: &InboundEvent, text: &str) -> Result<()>;
}

/// Periodic task fired by the scheduler.
#[async_trait]
pub trait CronHandler: Send + Sync {
    async fn run(&self, bot: &Bot, config: &PluginConfig) -> Result<()>;
}

// =============================================================================
// Plugin Configuration
// =============================================================================

/// Read-only view of a plugin's `[plugins.<name>]` table.
#[derive(Clone)]
pub struct PluginConfig {
    plugin: Arc<str>,
    table: Arc<toml::Table>,
}

impl PluginConfig {
    pub fn new(plugin: &str, table: toml::Table) -> Self {
        Self {
            plugin: Arc::from(plugin),
            table: Arc::new(table),
        }
    }

    pub fn empty(plugin: &str) -> Self {
        Self::new(plugin, toml::Table::new())
    }

    /// Name of the plugin this section belongs to
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn table(&self) -> &toml::Table {
        &self.table
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.table.get(key).and_then(|v| v.as_str())
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.str(key).unwrap_or(default)
    }

    /// A required string parameter.
    pub fn require_str(&self, key: &str) -> Result<&str, RegistryError> {
        match self.table.get(key) {
            None => Err(self.missing(key)),
            Some(toml::Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(self.invalid(key, "expected a non-empty string")),
        }
    }

    pub fn integer(&self, key: &str) -> Result<Option<i64>, RegistryError> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::Integer(n)) => Ok(Some(*n)),
            Some(_) => Err(self.invalid(key, "expected an integer")),
        }
    }

    /// An optional list of strings. `Some(vec![])` is distinct from absent.
    pub fn str_list(&self, key: &str) -> Result<Option<Vec<String>>, RegistryError> {
        let Some(value) = self.table.get(key) else {
            return Ok(None);
        };
        let array = value
            .as_array()
            .ok_or_else(|| self.invalid(key, "expected a list of strings"))?;
        array
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(key, "expected a list of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Access rule from `allowed_rooms` / `allowed_users`.
    pub fn access_rule(&self) -> Result<AccessRule, RegistryError> {
        let mut rule = AccessRule::new();
        if let Some(rooms) = self.str_list("allowed_rooms")? {
            rule = rule.rooms(rooms);
        }
        if let Some(users) = self.str_list("allowed_users")? {
            rule = rule.users(users);
        }
        Ok(rule)
    }

    /// Required cron interval from `secs`.
    pub fn cron_secs(&self) -> Result<u64, RegistryError> {
        let secs = self.integer("secs")?.ok_or_else(|| self.missing("secs"))?;
        if secs < 1 {
            return Err(RegistryError::InvalidInterval {
                plugin: self.plugin.to_string(),
                secs,
            });
        }
        Ok(secs as u64)
    }

    fn missing(&self, key: &str) -> RegistryError {
        RegistryError::MissingParameter {
            plugin: self.plugin.to_string(),
            key: key.to_string(),
        }
    }

    fn invalid(&self, key: &str, reason: &str) -> RegistryError {
        RegistryError::InvalidParameter {
            plugin: self.plugin.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("plugin", &self.plugin)
            .field("keys", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Registered Specs
// =============================================================================

/// A registered command
#[derive(Clone)]
pub struct CommandSpec {
    /// Literal trigger token, e.g. `!status`
    pub name: String,
    /// Case-insensitive matcher for the token anywhere in a message
    pub matcher: Regex,
    pub handler: Arc<dyn CommandHandler>,
    pub help_text: String,
    pub owner: String,
    pub config: PluginConfig,
}

/// A registered broker topic
#[derive(Clone)]
pub struct TopicSpec {
    /// Subscription path, possibly with `+` / `#` wildcards
    pub topic: String,
    pub handler: Arc<dyn TopicHandler>,
    pub help_text: String,
    pub owner: String,
    pub config: PluginConfig,
}

/// A registered passive observer
#[derive(Clone)]
pub struct ObserverSpec {
    pub handler: Arc<dyn Observer>,
    pub owner: String,
}

/// A registered cron task
#[derive(Clone)]
pub struct CronSpec {
    pub interval_seconds: u64,
    pub handler: Arc<dyn CronHandler>,
    pub owner_name: String,
    pub config: PluginConfig,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

impl fmt::Debug for TopicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicSpec")
            .field("topic", &self.topic)
            .field("owner", &self.owner)
            .finish()
    }
}

impl fmt::Debug for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSpec")
            .field("interval_seconds", &self.interval_seconds)
            .field("owner_name", &self.owner_name)
            .finish()
    }
}

// =============================================================================
// Plugin Descriptor
// =============================================================================

struct CommandEntry {
    name: String,
    help_text: String,
    handler: Arc<dyn CommandHandler>,
}

struct TopicEntry {
    topic: String,
    help_text: String,
    handler: Arc<dyn TopicHandler>,
}

struct CronEntry {
    secs: i64,
    handler: Arc<dyn CronHandler>,
}

/// What one plugin contributes. Every role is optional.
pub struct Plugin {
    name: String,
    config: PluginConfig,
    commands: Vec<CommandEntry>,
    topics: Vec<TopicEntry>,
    observers: Vec<Arc<dyn Observer>>,
    cron: Option<CronEntry>,
}

impl Plugin {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            name: config.plugin().to_string(),
            config,
            commands: Vec::new(),
            topics: Vec::new(),
            observers: Vec::new(),
            cron: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn command(
        mut self,
        name: impl Into<String>,
        help_text: impl Into<String>,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        self.commands.push(CommandEntry {
            name: name.into(),
            help_text: help_text.into(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn topic(
        mut self,
        topic: impl Into<String>,
        help_text: impl Into<String>,
        handler: impl TopicHandler + 'static,
    ) -> Self {
        self.topics.push(TopicEntry {
            topic: topic.into(),
            help_text: help_text.into(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn observer(mut self, handler: impl Observer + 'static) -> Self {
        self.observers.push(Arc::new(handler));
        self
    }

    /// Cron task with an explicit interval.
    pub fn cron_every(mut self, secs: i64, handler: impl CronHandler + 'static) -> Self {
        self.cron = Some(CronEntry {
            secs,
            handler: Arc::new(handler),
        });
        self
    }

    /// Cron task whose interval comes from the plugin's `secs` parameter.
    pub fn cron(self, handler: impl CronHandler + 'static) -> Result<Self, RegistryError> {
        let secs = self.config.cron_secs()?;
        Ok(self.cron_every(secs as i64, handler))
    }

    pub fn has_cron(&self) -> bool {
        self.cron.is_some()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// All registered plugin entries. Read-only once the event loop starts.
#[derive(Default)]
pub struct Registry {
    commands: Vec<CommandSpec>,
    command_index: HashMap<String, usize>,
    topics: Vec<TopicSpec>,
    topic_index: HashMap<String, usize>,
    observers: Vec<ObserverSpec>,
    crons: Vec<CronSpec>,
    access: AccessControl,
    plugins: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register everything a plugin contributes.
    ///
    /// The descriptor is validated completely before anything is inserted, so
    /// a failing plugin leaves the registry untouched.
    pub fn register(&mut self, plugin: Plugin) -> Result<(), RegistryError> {
        let Plugin {
            name,
            config,
            commands,
            topics,
            observers,
            cron,
        } = plugin;

        let rule = config.access_rule()?;

        let mut command_specs = Vec::with_capacity(commands.len());
        for entry in commands {
            if entry.name.trim().is_empty() {
                return Err(RegistryError::EmptyName {
                    plugin: name.clone(),
                    what: "command",
                });
            }
            let matcher = RegexBuilder::new(&regex::escape(&entry.name))
                .case_insensitive(true)
                .build()
                .map_err(|e| RegistryError::InvalidParameter {
                    plugin: name.clone(),
                    key: entry.name.clone(),
                    reason: e.to_string(),
                })?;
            command_specs.push(CommandSpec {
                name: entry.name,
                matcher,
                handler: entry.handler,
                help_text: entry.help_text,
                owner: name.clone(),
                config: config.clone(),
            });
        }

        let mut topic_specs = Vec::with_capacity(topics.len());
        for entry in topics {
            if entry.topic.trim().is_empty() {
                return Err(RegistryError::EmptyName {
                    plugin: name.clone(),
                    what: "topic",
                });
            }
            topic_specs.push(TopicSpec {
                topic: entry.topic,
                handler: entry.handler,
                help_text: entry.help_text,
                owner: name.clone(),
                config: config.clone(),
            });
        }

        let cron_spec = match cron {
            Some(entry) if entry.secs < 1 => {
                return Err(RegistryError::InvalidInterval {
                    plugin: name,
                    secs: entry.secs,
                })
            }
            Some(entry) => Some(CronSpec {
                interval_seconds: entry.secs as u64,
                handler: entry.handler,
                owner_name: name.clone(),
                config: config.clone(),
            }),
            None => None,
        };

        // Validated; from here on nothing fails.
        for spec in command_specs {
            self.access.set_rule(&spec.name, rule.clone());
            self.insert_command(spec);
        }
        for spec in topic_specs {
            self.insert_topic(spec);
        }
        self.observers
            .extend(observers.into_iter().map(|handler| ObserverSpec {
                handler,
                owner: name.clone(),
            }));
        if let Some(spec) = cron_spec {
            self.crons.push(spec);
        }

        tracing::info!(plugin = %name, "Plugin registered");
        self.plugins.push(name);
        Ok(())
    }

    fn insert_command(&mut self, spec: CommandSpec) {
        let key = spec.name.to_lowercase();
        match self.command_index.get(&key) {
            Some(&index) => {
                tracing::warn!(
                    command = %spec.name,
                    previous_owner = %self.commands[index].owner,
                    owner = %spec.owner,
                    "Command registered twice, last registration wins"
                );
                self.commands[index] = spec;
            }
            None => {
                self.command_index.insert(key, self.commands.len());
                self.commands.push(spec);
            }
        }
    }

    fn insert_topic(&mut self, spec: TopicSpec) {
        match self.topic_index.get(&spec.topic) {
            Some(&index) => {
                tracing::warn!(
                    topic = %spec.topic,
                    previous_owner = %self.topics[index].owner,
                    owner = %spec.owner,
                    "Topic registered twice, last registration wins"
                );
                self.topics[index] = spec;
            }
            None => {
                self.topic_index.insert(spec.topic.clone(), self.topics.len());
                self.topics.push(spec);
            }
        }
    }

    /// Commands in registration order
    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.command_index
            .get(&name.to_lowercase())
            .map(|&i| &self.commands[i])
    }

    /// Topics in registration order
    pub fn topics(&self) -> &[TopicSpec] {
        &self.topics
    }

    /// Subscription paths for every registered topic
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.topic.clone()).collect()
    }

    /// Find the handler for a received topic: exact match first, then wildcard subscriptions.
    pub fn topic_for(&self, topic: &str) -> Option<&TopicSpec> {
        if let Some(&index) = self.topic_index.get(topic) {
            return Some(&self.topics[index]);
        }
        self.topics
            .iter()
            .find(|spec| is_wildcard(&spec.topic) && topic_matches(&spec.topic, topic))
    }

    pub fn observers(&self) -> &[ObserverSpec] {
        &self.observers
    }

    pub fn crons(&self) -> &[CronSpec] {
        &self.crons
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    /// Names of registered plugins in registration order
    pub fn plugin_names(&self) -> &[String] {
        &self.plugins
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.plugins)
            .field("commands", &self.commands)
            .field("topics", &self.topics)
            .field("observers", &self.observers.len())
            .field("crons", &self.crons)
            .finish()
    }
}

fn is_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

/// MQTT topic filter matching: `+` matches one level, a trailing `#` the rest.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if topic_levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    topic_levels.next().is_none()
}
