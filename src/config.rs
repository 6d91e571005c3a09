// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields, provides defaults, and keeps plugin sections as raw tables
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bot: BotConfig,
    /// `[plugins.<name>]` sections; a present section enables that plugin
    #[serde(default)]
    pub plugins: BTreeMap<String, toml::Table>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub home_server: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Desired display name; defaults to the localpart of `user_id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

// Custom Debug impl to redact sensitive fields
impl std::fmt::Debug for MatrixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixConfig")
            .field("home_server", &self.home_server)
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("device_name", &self.device_name)
            .field("display_name", &self.display_name)
            .field("store_path", &self.store_path)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_health_check_secs")]
    pub health_check_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout_secs(),
            keep_alive_secs: default_keep_alive_secs(),
            health_check_secs: default_health_check_secs(),
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_help_trigger")]
    pub help_trigger: String,
    /// Reply when mentioned without a command; empty disables it
    #[serde(default = "default_mention_reply")]
    pub mention_reply: String,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_cron_wrap")]
    pub cron_wrap: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            help_trigger: default_help_trigger(),
            mention_reply: default_mention_reply(),
            tick_millis: default_tick_millis(),
            queue_capacity: default_queue_capacity(),
            restart_delay_secs: default_restart_delay_secs(),
            cron_wrap: default_cron_wrap(),
        }
    }
}

impl BotConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn mention_reply(&self) -> Option<String> {
        Some(self.mention_reply.clone()).filter(|r| !r.is_empty())
    }
}

fn default_device_name() -> String {
    "horscht".to_string()
}

fn default_store_path() -> String {
    paths::store_dir().to_string_lossy().to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "horscht".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_health_check_secs() -> u64 {
    5
}

fn default_help_trigger() -> String {
    horscht_core::DEFAULT_HELP_TRIGGER.to_string()
}

fn default_mention_reply() -> String {
    horscht_core::DEFAULT_MENTION_REPLY.to_string()
}

fn default_tick_millis() -> u64 {
    250
}

fn default_queue_capacity() -> usize {
    256
}

fn default_restart_delay_secs() -> u64 {
    60
}

fn default_cron_wrap() -> u64 {
    horscht_core::DEFAULT_WRAP_BASE
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. HORSCHT_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/horscht/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("HORSCHT_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration, using `explicit` if given and searching otherwise.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::find_config_file().context(
                "No config file found (tried HORSCHT_CONFIG_PATH, ./config.toml and the XDG config dir)",
            )?,
        };
        tracing::info!(path = %path.display(), "Loading configuration from file");

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default search locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("MATRIX_HOME_SERVER") {
            self.matrix.home_server = val;
        }
        if let Ok(val) = std::env::var("MATRIX_USER_ID") {
            self.matrix.user_id = val;
        }
        if let Ok(val) = std::env::var("MATRIX_PASSWORD") {
            self.matrix.password = Some(val);
        }
        if let Ok(val) = std::env::var("MATRIX_ACCESS_TOKEN") {
            self.matrix.access_token = Some(val);
        }
        if let Ok(val) = std::env::var("MATRIX_DEVICE_NAME") {
            self.matrix.device_name = val;
        }
        if let Ok(val) = std::env::var("MQTT_HOST") {
            self.mqtt.host = val;
        }
        if let Ok(val) = std::env::var("MQTT_PORT") {
            self.mqtt.port = val
                .parse()
                .with_context(|| format!("MQTT_PORT must be a valid port number, got: {}", val))?;
        }
        Ok(())
    }

    /// Validate required fields and value ranges
    pub fn validate(&self) -> Result<()> {
        if self.matrix.home_server.trim().is_empty() {
            anyhow::bail!(
                "matrix.home_server is required (set in config.toml or MATRIX_HOME_SERVER env var)"
            );
        }
        let user_id = self.matrix.user_id.trim();
        if user_id.is_empty() {
            anyhow::bail!(
                "matrix.user_id is required (set in config.toml or MATRIX_USER_ID env var)"
            );
        }
        if !user_id.starts_with('@') || !user_id.contains(':') {
            anyhow::bail!("Invalid Matrix user ID: {}", user_id);
        }
        if self.matrix.password.is_none() && self.matrix.access_token.is_none() {
            anyhow::bail!("Either matrix.password or matrix.access_token is required");
        }
        if self.mqtt.host.trim().is_empty() {
            anyhow::bail!("mqtt.host must not be empty");
        }
        if self.mqtt.connect_timeout_secs == 0 {
            anyhow::bail!("mqtt.connect_timeout_secs must be at least 1");
        }
        if self.mqtt.health_check_secs == 0 {
            anyhow::bail!("mqtt.health_check_secs must be at least 1");
        }
        if self.bot.tick_millis == 0 {
            anyhow::bail!("bot.tick_millis must be at least 1");
        }
        if self.bot.queue_capacity == 0 {
            anyhow::bail!("bot.queue_capacity must be at least 1");
        }
        if self.bot.help_trigger.trim().is_empty() {
            anyhow::bail!("bot.help_trigger must not be empty");
        }
        Ok(())
    }
}
