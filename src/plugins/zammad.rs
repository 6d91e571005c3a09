// ABOUTME: Cron plugin that announces new Zammad tickets sent to one address into a chat room.
// ABOUTME: Polls unread online notifications over the REST API and remembers seen ids in a file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use horscht_core::{Bot, CronHandler, Plugin, PluginConfig, RegistryError};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use super::escape_html;

const DEFAULT_SEEN_FILE: &str = "seen_ids";
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    let url = config.require_str("url")?.trim_end_matches('/').to_string();
    let token = config.require_str("token")?.to_string();
    let room = config.require_str("room")?.to_string();
    let addr = config.require_str("addr")?.to_string();
    let seen = SeenIds::new(config.str_or("seen_file", DEFAULT_SEEN_FILE));
    let http = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| RegistryError::InvalidParameter {
            plugin: config.plugin().to_string(),
            key: "url".to_string(),
            reason: e.to_string(),
        })?;

    let poller = TicketPoller {
        source: Box::new(ZammadApi {
            http,
            url: url.clone(),
            token,
        }),
        seen,
        room,
        addr,
        ticket_url: url,
    };
    Plugin::new(config).cron(poller)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: u64,
    /// Ticket id
    pub o_id: u64,
    pub seen: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

/// Where tickets come from
#[async_trait]
trait TicketSource: Send + Sync {
    async fn notifications(&self) -> Result<Vec<Notification>>;
    /// First article of a ticket
    async fn first_article(&self, ticket_id: u64) -> Result<Option<Article>>;
}

struct ZammadApi {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl ZammadApi {
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.url);
        self.http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Response from {url} is not the expected JSON"))
    }
}

#[async_trait]
impl TicketSource for ZammadApi {
    async fn notifications(&self) -> Result<Vec<Notification>> {
        self.get("/api/v1/online_notifications").await
    }

    async fn first_article(&self, ticket_id: u64) -> Result<Option<Article>> {
        let articles: Vec<Article> = self
            .get(&format!("/api/v1/ticket_articles/by_ticket/{ticket_id}"))
            .await?;
        Ok(articles.into_iter().next())
    }
}

/// Notification ids already announced, one per line
#[derive(Debug)]
struct SeenIds {
    path: PathBuf,
}

impl SeenIds {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeSet<u64>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn save(&self, ids: &BTreeSet<u64>) -> Result<()> {
        let content = ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

struct TicketPoller {
    source: Box<dyn TicketSource>,
    seen: SeenIds,
    /// Display name of the room to post into
    room: String,
    /// Only tickets sent to this address are announced
    addr: String,
    ticket_url: String,
}

impl TicketPoller {
    /// Announce unseen tickets; returns how many were sent.
    async fn check(&self, bot: &Bot) -> Result<usize> {
        let mut seen = self.seen.load()?;
        let unread: Vec<_> = self
            .source
            .notifications()
            .await?
            .into_iter()
            .filter(|n| !n.seen)
            .collect();

        let mut sent = 0;
        for notification in unread {
            if seen.contains(&notification.id) {
                continue;
            }
            let Some(article) = self.source.first_article(notification.o_id).await? else {
                continue;
            };
            if article.to.as_deref() != Some(self.addr.as_str()) {
                continue;
            }
            let Some(room) = bot.find_room_by_name(&self.room).await else {
                tracing::warn!(room = %self.room, "Zammad room not joined, will retry");
                break;
            };
            let html = self.render(notification.o_id, &article);
            if let Err(e) = bot.send_html(&room.id, &html).await {
                tracing::warn!(room_id = %room.id, error = %e, "Could not announce Zammad ticket, will retry");
                break;
            }
            tracing::info!(ticket_id = notification.o_id, room_id = %room.id, "Announced Zammad ticket");
            seen.insert(notification.id);
            sent += 1;
        }

        self.seen.save(&seen)?;
        Ok(sent)
    }

    fn render(&self, ticket_id: u64, article: &Article) -> String {
        let link = format!("{}/#ticket/zoom/{ticket_id}", self.ticket_url);
        format!(
            "<b>New Zammad ticket from:</b> <i>{}</i><br>\"{}\"<br>URL: <a href=\"{link}\">{link}</a>",
            escape_html(article.from.as_deref().unwrap_or("unknown")),
            escape_html(article.subject.as_deref().unwrap_or("")),
            link = escape_html(&link),
        )
    }
}

#[async_trait]
impl CronHandler for TicketPoller {
    async fn run(&self, bot: &Bot, _config: &PluginConfig) -> Result<()> {
        let sent = self.check(bot).await?;
        if sent > 0 {
            tracing::debug!(sent, "Zammad check done");
        }
        Ok(())
    }
}
