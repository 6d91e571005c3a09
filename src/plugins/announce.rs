// ABOUTME: Broker-to-room announcements configured as routes: a topic, target rooms and a format.
// ABOUTME: "forward" posts the payload as HTML; "event" renders a calendar reminder JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use horscht_core::{
    Bot, BrokerMessage, Plugin, PluginConfig, RegistryError, RoomInfo, TopicHandler,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::escape_html;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Forward,
    Event,
}

/// One `[[plugins.announce.routes]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub topic: String,
    /// Room names, aliases or ids to post into
    pub rooms: Vec<String>,
    #[serde(default = "default_format")]
    pub format: Format,
    /// Only post when the rendered message contains this
    #[serde(default)]
    pub contains: Option<String>,
    /// Never post when the rendered message contains this
    #[serde(default)]
    pub excludes: Option<String>,
}

fn default_format() -> Format {
    Format::Forward
}

impl Route {
    fn accepts(&self, message: &str) -> bool {
        self.contains.as_deref().is_none_or(|c| message.contains(c))
            && self.excludes.as_deref().is_none_or(|e| !message.contains(e))
    }

    fn targets(&self, room: &RoomInfo) -> bool {
        self.rooms.iter().any(|wanted| {
            room.name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
                || room.canonical_alias.as_deref() == Some(wanted.as_str())
                || room.id == *wanted
        })
    }
}

/// Calendar reminder as published by the calendar watcher
#[derive(Debug, Clone, Deserialize)]
struct CalendarEvent {
    summary: String,
    #[serde(default)]
    description: Option<String>,
    event_start: String,
    time_left_to_event: String,
}

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    let routes = parse_routes(&config)?;
    let hidden = config.str_list("hide_description")?.unwrap_or_default();

    let mut by_topic: BTreeMap<String, Vec<Route>> = BTreeMap::new();
    for route in routes {
        by_topic.entry(route.topic.clone()).or_default().push(route);
    }

    let mut plugin = Plugin::new(config);
    for (topic, routes) in by_topic {
        let help = format!("Announces messages from {topic}");
        plugin = plugin.topic(
            topic,
            help,
            Announce {
                routes,
                hidden: hidden.clone(),
            },
        );
    }
    Ok(plugin)
}

fn parse_routes(config: &PluginConfig) -> Result<Vec<Route>, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidParameter {
        plugin: config.plugin().to_string(),
        key: "routes".to_string(),
        reason,
    };
    let Some(value) = config.get("routes") else {
        return Err(RegistryError::MissingParameter {
            plugin: config.plugin().to_string(),
            key: "routes".to_string(),
        });
    };
    let routes: Vec<Route> = value
        .clone()
        .try_into()
        .map_err(|e: toml::de::Error| invalid(e.message().to_string()))?;
    if let Some(route) = routes.iter().find(|r| r.topic.trim().is_empty()) {
        return Err(invalid(format!("route to {:?} has an empty topic", route.rooms)));
    }
    Ok(routes)
}

struct Announce {
    routes: Vec<Route>,
    hidden: Vec<String>,
}

impl Announce {
    fn render(&self, route: &Route, message: &BrokerMessage) -> Result<String> {
        match route.format {
            Format::Forward => Ok(message.payload_text()),
            Format::Event => {
                let event: CalendarEvent = serde_json::from_slice(&message.payload)
                    .context("Calendar reminder payload is not valid JSON")?;
                Ok(render_event(&event, &self.hidden))
            }
        }
    }
}

#[async_trait]
impl TopicHandler for Announce {
    async fn handle(&self, bot: &Bot, message: &BrokerMessage, _config: &PluginConfig) -> Result<()> {
        let rooms = bot.rooms().await;
        let mut last_error = None;
        let mut rendered = 0;
        for route in &self.routes {
            let html = match self.render(route, message) {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!(topic = %message.topic, rooms = ?route.rooms, error = %format!("{e:#}"), "Skipping route");
                    last_error = Some(e);
                    continue;
                }
            };
            rendered += 1;
            if !route.accepts(&html) {
                tracing::debug!(topic = %message.topic, rooms = ?route.rooms, "Route filter rejected message");
                continue;
            }
            for room in rooms.iter().filter(|r| route.targets(r)) {
                tracing::info!(topic = %message.topic, room_id = %room.id, "Announcing");
                if let Err(e) = bot.send_html(&room.id, &html).await {
                    tracing::warn!(room_id = %room.id, error = %e, "Announcement failed");
                }
            }
        }
        match last_error {
            Some(e) if rendered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

fn render_event(event: &CalendarEvent, hidden: &[String]) -> String {
    let description = event
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty() && !hidden.iter().any(|h| d.contains(h.as_str())));
    let mut html = format!("<b>Reminder: {}</b>", escape_html(&event.summary));
    if let Some(description) = description {
        html.push_str(&format!(" ({})", escape_html(description)));
    }
    html.push_str(&format!(
        "<br/>{}<br/><i>({} left)</i>",
        escape_html(&format_start(&event.event_start)),
        escape_html(&event.time_left_to_event)
    ));
    html
}

/// Local "dd.mm.yyyy HH:MM" for RFC 3339 or naive timestamps; anything else verbatim.
fn format_start(start: &str) -> String {
    const OUT: &str = "%d.%m.%Y %H:%M";
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(start) {
        return dt.with_timezone(&chrono::Local).format(OUT).to_string();
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(start, pattern) {
            return dt.format(OUT).to_string();
        }
    }
    start.to_string()
}
