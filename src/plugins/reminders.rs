// ABOUTME: Weekly recurring reminders per room, managed with !reminder and sent by a cron task.
// ABOUTME: Reminders persist in a JSON file; the cron task catches up on minutes it missed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDateTime, Timelike, Weekday};
use horscht_core::{
    Bot, CommandCall, CommandHandler, CronHandler, Plugin, PluginConfig, RegistryError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::escape_html;

const DEFAULT_FILE: &str = "reminders.json";
/// How far back the first check after startup looks
const FIRST_CHECK_LOOKBACK_MINUTES: i64 = 5;

const USAGE: &str = "📅 <b>Create a recurring reminder</b><br><br>\
<b>Usage:</b> <code>!reminder &lt;weekday&gt; &lt;HH:MM&gt; &lt;message&gt;</code><br><br>\
<b>Examples:</b><br>\
• <code>!reminder monday 09:00 Team meeting in the lounge</code><br>\
• <code>!reminder freitag 17:30 Weekend!</code><br><br>\
<b>Weekdays:</b> monday … sunday or montag … sonntag<br>\
<b>Time:</b> HH:MM (24 hours)<br><br>\
<b>More:</b><br>\
• <code>!reminder list</code> shows this room's reminders<br>\
• <code>!reminder delete &lt;number&gt;</code> deletes one";

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    let store = Arc::new(ReminderStore::new(config.str_or("file", DEFAULT_FILE)));
    Plugin::new(config)
        .command(
            "!reminder",
            "Weekly reminders for this room (!reminder <weekday> <HH:MM> <message>, list, delete <n>)",
            ReminderCommand {
                store: Arc::clone(&store),
            },
        )
        .cron(ReminderCron::new(store))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: u32,
    /// Days from Monday
    pub weekday: u32,
    pub weekday_name: String,
    pub hour: u32,
    pub minute: u32,
    pub time_str: String,
    pub message: String,
    pub room_id: String,
    pub room_alias: String,
    pub creator: String,
    pub created_at: String,
}

impl Reminder {
    fn fires_at(&self, at: NaiveDateTime) -> bool {
        at.weekday().num_days_from_monday() == self.weekday
            && at.hour() == self.hour
            && at.minute() == self.minute
    }
}

/// JSON file holding every reminder of every room
#[derive(Debug)]
pub struct ReminderStore {
    path: PathBuf,
}

impl ReminderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Reminder>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    pub fn save(&self, reminders: &[Reminder]) -> Result<()> {
        let json = serde_json::to_string_pretty(reminders)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// German or English weekday name
fn parse_weekday(name: &str) -> Option<Weekday> {
    let day = match name.to_lowercase().as_str() {
        "montag" | "monday" => Weekday::Mon,
        "dienstag" | "tuesday" => Weekday::Tue,
        "mittwoch" | "wednesday" => Weekday::Wed,
        "donnerstag" | "thursday" => Weekday::Thu,
        "freitag" | "friday" => Weekday::Fri,
        "samstag" | "saturday" => Weekday::Sat,
        "sonntag" | "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

/// "HH:MM" in 24-hour format
fn parse_time(text: &str) -> Option<(u32, u32)> {
    let (hour, minute) = text.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

// =============================================================================
// Command
// =============================================================================

struct ReminderCommand {
    store: Arc<ReminderStore>,
}

impl ReminderCommand {
    async fn create(&self, bot: &Bot, call: &CommandCall<'_>) -> Result<()> {
        let [day, time, words @ ..] = call.args else {
            return bot.reply_html(call.event, USAGE).await;
        };
        if words.is_empty() {
            return bot.reply_html(call.event, USAGE).await;
        }
        let Some(weekday) = parse_weekday(day) else {
            let reply = format!(
                "❌ Unknown weekday: <b>{}</b><br>Use monday … sunday or montag … sonntag",
                escape_html(day)
            );
            return bot.reply_html(call.event, &reply).await;
        };
        let Some((hour, minute)) = parse_time(time) else {
            let reply = format!(
                "❌ Invalid time: <b>{}</b><br>Use HH:MM, e.g. 14:30",
                escape_html(time)
            );
            return bot.reply_html(call.event, &reply).await;
        };

        let mut reminders = self.store.load()?;
        let reminder = Reminder {
            id: reminders.iter().map(|r| r.id).max().unwrap_or(0) + 1,
            weekday: weekday.num_days_from_monday(),
            weekday_name: capitalize(day),
            hour,
            minute,
            time_str: format!("{hour:02}:{minute:02}"),
            message: words.join(" "),
            room_id: call.event.room_id.clone(),
            room_alias: bot.room_address(&call.event.room_id).await,
            creator: call.event.sender.clone(),
            created_at: chrono::Local::now().to_rfc3339(),
        };
        reminders.push(reminder.clone());
        self.store.save(&reminders)?;
        tracing::info!(
            id = reminder.id,
            room_id = %reminder.room_id,
            weekday = %reminder.weekday_name,
            time = %reminder.time_str,
            "Reminder created"
        );

        let reply = format!(
            "✅ <b>Reminder created!</b><br><br>\
             📅 <b>Weekday:</b> {day}<br>\
             🕐 <b>Time:</b> {time}<br>\
             💬 <b>Message:</b> {message}<br>\
             👤 <b>Created by:</b> {creator}<br><br>\
             It will be sent every {day} at {time} in this room.",
            day = escape_html(&reminder.weekday_name),
            time = reminder.time_str,
            message = escape_html(&reminder.message),
            creator = escape_html(&reminder.creator),
        );
        bot.reply_html(call.event, &reply).await
    }

    async fn list(&self, bot: &Bot, call: &CommandCall<'_>) -> Result<()> {
        let reminders = self.store.load()?;
        let mine: Vec<_> = reminders
            .iter()
            .filter(|r| r.room_id == call.event.room_id)
            .collect();
        if mine.is_empty() {
            return bot
                .reply_html(
                    call.event,
                    "📅 No reminders for this room.<br><br>Create one with \
                     <code>!reminder &lt;weekday&gt; &lt;HH:MM&gt; &lt;message&gt;</code>",
                )
                .await;
        }

        let mut reply = String::from("📅 <b>Reminders for this room:</b><br><br>");
        for r in mine {
            reply.push_str(&format!(
                "<b>#{}</b> - {} at {}<br>💬 {}<br>👤 Created by: {}<br><br>",
                r.id,
                escape_html(&r.weekday_name),
                r.time_str,
                escape_html(&r.message),
                escape_html(&r.creator)
            ));
        }
        reply.push_str("<b>Tip:</b> <code>!reminder delete &lt;number&gt;</code> deletes a reminder.");
        bot.reply_html(call.event, &reply).await
    }

    async fn delete(&self, bot: &Bot, call: &CommandCall<'_>) -> Result<()> {
        let Some(raw) = call.args.get(1) else {
            return bot
                .reply_html(
                    call.event,
                    "❌ Which reminder? Example: <code>!reminder delete 1</code><br><br>\
                     <code>!reminder list</code> shows all reminders.",
                )
                .await;
        };
        let Ok(id) = raw.parse::<u32>() else {
            return bot
                .reply_html(call.event, "❌ Invalid reminder number. Please give a number.")
                .await;
        };

        let mut reminders = self.store.load()?;
        let room_id = &call.event.room_id;
        let Some(index) = reminders
            .iter()
            .position(|r| r.id == id && &r.room_id == room_id)
        else {
            let reply = format!("❌ Reminder #{id} not found in this room.");
            return bot.reply_html(call.event, &reply).await;
        };
        let removed = reminders.remove(index);
        self.store.save(&reminders)?;
        tracing::info!(id, room_id = %room_id, by = %call.event.sender, "Reminder deleted");

        let reply = format!(
            "✅ <b>Reminder deleted!</b><br><br>\
             📅 <b>Weekday:</b> {}<br>\
             🕐 <b>Time:</b> {}<br>\
             💬 <b>Message:</b> {}",
            escape_html(&removed.weekday_name),
            removed.time_str,
            escape_html(&removed.message)
        );
        bot.reply_html(call.event, &reply).await
    }
}

#[async_trait]
impl CommandHandler for ReminderCommand {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        match call.args.first().map(|a| a.to_lowercase()).as_deref() {
            Some("list") => self.list(bot, &call).await,
            Some("delete") => self.delete(bot, &call).await,
            _ => self.create(bot, &call).await,
        }
    }
}

// =============================================================================
// Cron
// =============================================================================

struct ReminderCron {
    store: Arc<ReminderStore>,
    last_check: Mutex<Option<NaiveDateTime>>,
}

impl ReminderCron {
    fn new(store: Arc<ReminderStore>) -> Self {
        Self {
            store,
            last_check: Mutex::new(None),
        }
    }

    /// Send every reminder due in the minutes since the last check, up to `now`.
    ///
    /// Minutes are inclusive of `now`'s minute and exclusive of the last
    /// check's, so each due minute is handled by exactly one check.
    async fn check_at(&self, bot: &Bot, now: NaiveDateTime) -> Result<usize> {
        let end = truncate_to_minute(now);
        let start = match *self.last_check.lock() {
            Some(last) => truncate_to_minute(last) + Duration::minutes(1),
            None => truncate_to_minute(now - Duration::minutes(FIRST_CHECK_LOOKBACK_MINUTES)),
        };

        let reminders = self.store.load()?;
        *self.last_check.lock() = Some(now);

        let mut sent = 0;
        let mut minute = start;
        while minute <= end {
            for reminder in reminders.iter().filter(|r| r.fires_at(minute)) {
                if bot.room(&reminder.room_id).await.is_none() {
                    tracing::debug!(id = reminder.id, room_id = %reminder.room_id, "Reminder room not joined, skipping");
                    continue;
                }
                let late = (now - minute).num_minutes();
                let html = render_reminder(reminder, (minute < end && late > 0).then_some(late));
                match bot.send_html(&reminder.room_id, &html).await {
                    Ok(()) => {
                        sent += 1;
                        tracing::info!(id = reminder.id, at = %minute, "Reminder sent");
                    }
                    Err(e) => {
                        tracing::warn!(id = reminder.id, room_id = %reminder.room_id, error = %e, "Reminder send failed")
                    }
                }
            }
            minute += Duration::minutes(1);
        }
        Ok(sent)
    }
}

#[async_trait]
impl CronHandler for ReminderCron {
    async fn run(&self, bot: &Bot, _config: &PluginConfig) -> Result<()> {
        self.check_at(bot, chrono::Local::now().naive_local()).await?;
        Ok(())
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn render_reminder(reminder: &Reminder, late_minutes: Option<i64>) -> String {
    let delay = late_minutes
        .map(|m| format!(" (delayed by {m} min)"))
        .unwrap_or_default();
    format!(
        "🔔 <b>Reminder{delay}</b><br><br>{}<br><br><i>Created by {}</i>",
        escape_html(&reminder.message),
        escape_html(&reminder.creator)
    )
}
