// ABOUTME: Space status commands: !status reads the public SpaceAPI JSON, !setstatus is a stub.
// ABOUTME: The status document is fetched on every call with a cache-busting query.

use anyhow::{Context, Result};
use async_trait::async_trait;
use horscht_core::{Bot, CommandCall, CommandHandler, Plugin, PluginConfig, RegistryError};
use serde_json::Value;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    let url = config.require_str("url")?.to_string();
    let http = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| RegistryError::InvalidParameter {
            plugin: config.plugin().to_string(),
            key: "url".to_string(),
            reason: e.to_string(),
        })?;

    Ok(Plugin::new(config)
        .command(
            "!status",
            "Find out whether the space is open right now.",
            GetStatus { http, url },
        )
        .command(
            "!setstatus",
            "Set the space status in case someone forgot the switch. (Not implemented.)",
            SetStatus,
        ))
}

struct GetStatus {
    http: reqwest::Client,
    url: String,
}

impl GetStatus {
    async fn fetch(&self) -> Result<bool> {
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        let doc: Value = self
            .http
            .get(&self.url)
            .query(&[("t", stamp)])
            .send()
            .await
            .context("Status request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Status response is not JSON")?;
        is_open(&doc)
    }
}

#[async_trait]
impl CommandHandler for GetStatus {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        match self.fetch().await {
            Ok(open) => bot.reply_html(call.event, &status_html(open)).await,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Could not fetch space status");
                bot.reply(call.event, "Space status is unavailable right now.")
                    .await
            }
        }
    }
}

struct SetStatus;

#[async_trait]
impl CommandHandler for SetStatus {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        let which = call.args.first().map(String::as_str).unwrap_or_default();
        bot.reply(call.event, &format!("Setting status to {which}. Not."))
            .await
    }
}

/// `state.open` of a SpaceAPI document
fn is_open(doc: &Value) -> Result<bool> {
    doc.pointer("/state/open")
        .and_then(Value::as_bool)
        .context("Status document has no boolean state.open")
}

fn status_html(open: bool) -> String {
    let status = if open {
        r#"<span style="color:green">open</span>"#
    } else {
        r#"<span style="color:red">closed</span>"#
    };
    format!("<h2>The space is {status}.</h2>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::*;
    use horscht_core::RoomInfo;
    use serde_json::json;

    #[test]
    fn test_is_open_reads_state_open() {
        assert!(is_open(&json!({"state": {"open": true}})).unwrap());
        assert!(!is_open(&json!({"state": {"open": false}})).unwrap());
        assert!(is_open(&json!({"state": {}})).is_err());
        assert!(is_open(&json!({"state": {"open": "yes"}})).is_err());
    }

    #[test]
    fn test_status_html() {
        assert!(status_html(true).contains("color:green\">open<"));
        assert!(status_html(false).contains("color:red\">closed<"));
        assert!(status_html(false).starts_with("<h2>"));
    }

    #[test]
    fn test_url_is_required() {
        let err = plugin(config("spacestatus", "")).err().unwrap();
        assert_eq!(
            err,
            RegistryError::MissingParameter {
                plugin: "spacestatus".into(),
                key: "url".into()
            }
        );
        assert!(plugin(config("spacestatus", r#"url = "http://localhost/status.json""#)).is_ok());
    }

    #[tokio::test]
    async fn test_setstatus_acknowledges_without_changing_anything() {
        let t = TestBot::new(vec![RoomInfo::new("!ops:example.org")]).await;
        let cfg = config("spacestatus", "");
        let event = text_event("!ops:example.org", "@alice:example.org", "!setstatus open");
        let args = words("open");

        SetStatus
            .handle(&t.bot, call(&event, "!setstatus", &args, &cfg))
            .await
            .unwrap();

        assert_eq!(t.chat.sent_to("!ops:example.org"), vec!["Setting status to open. Not."]);
    }

    #[tokio::test]
    async fn test_unreachable_status_url_replies_unavailable() {
        let t = TestBot::new(vec![RoomInfo::new("!ops:example.org")]).await;
        let cfg = config("spacestatus", "");
        let event = text_event("!ops:example.org", "@alice:example.org", "!status");
        let handler = GetStatus {
            http: reqwest::Client::new(),
            // port 9 (discard) on loopback refuses connections
            url: "http://127.0.0.1:9/status.json".to_string(),
        };

        handler
            .handle(&t.bot, call(&event, "!status", &[], &cfg))
            .await
            .unwrap();

        assert_eq!(
            t.chat.sent_to("!ops:example.org"),
            vec!["Space status is unavailable right now."]
        );
    }
}
