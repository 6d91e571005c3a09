// ABOUTME: !quote sends text as an HTML blockquote into another joined room, found by name.
// ABOUTME: Replies with usage or "not found" instead of sending when it can't.

use anyhow::Result;
use async_trait::async_trait;
use horscht_core::{Bot, CommandCall, CommandHandler, Plugin, PluginConfig, RegistryError};

use super::escape_html;

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    Ok(Plugin::new(config).command(
        "!quote",
        "Send the given text as a quote into a room (!quote <room> <text>)",
        Quote,
    ))
}

struct Quote;

#[async_trait]
impl CommandHandler for Quote {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        let [room_name, words @ ..] = call.args else {
            return bot.reply(call.event, "Please give a room name and a text.").await;
        };
        if words.is_empty() {
            return bot.reply(call.event, "Please give a room name and a text.").await;
        }

        let Some(room) = bot.find_room_by_name(room_name).await else {
            return bot
                .reply(call.event, &format!("Room {room_name} not found."))
                .await;
        };

        let html = format!("<blockquote>{}</blockquote>", escape_html(&words.join(" ")));
        tracing::info!(from = %call.event.room_id, to = %room.id, "Quoting into room");
        bot.send_html(&room.id, &html).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::*;
    use horscht_core::RoomInfo;

    async fn bot() -> TestBot {
        TestBot::new(vec![
            RoomInfo::new("!ops:example.org").with_name("ops"),
            RoomInfo::new("!lounge:example.org").with_name("Lounge"),
        ])
        .await
    }

    #[tokio::test]
    async fn test_quote_goes_to_named_room() {
        let t = bot().await;
        let cfg = config("quote", "");
        let event = text_event("!ops:example.org", "@alice:example.org", "!quote lounge pizza <now>");
        let args = words("lounge pizza <now>");

        Quote.handle(&t.bot, call(&event, "!quote", &args, &cfg)).await.unwrap();

        assert_eq!(
            t.chat.sent_to("!lounge:example.org"),
            vec!["<blockquote>pizza &lt;now&gt;</blockquote>"]
        );
        assert!(t.chat.sent_to("!ops:example.org").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_room_replies_not_found() {
        let t = bot().await;
        let cfg = config("quote", "");
        let event = text_event("!ops:example.org", "@alice:example.org", "!quote attic hello");
        let args = words("attic hello");

        Quote.handle(&t.bot, call(&event, "!quote", &args, &cfg)).await.unwrap();

        assert_eq!(t.chat.sent_to("!ops:example.org"), vec!["Room attic not found."]);
    }

    #[tokio::test]
    async fn test_missing_text_replies_usage_and_sends_nothing_else() {
        let t = bot().await;
        let cfg = config("quote", "");
        for body in ["", "lounge"] {
            let event = text_event("!ops:example.org", "@alice:example.org", body);
            let args = words(body);
            Quote.handle(&t.bot, call(&event, "!quote", &args, &cfg)).await.unwrap();
        }

        assert_eq!(
            t.chat.sent_to("!ops:example.org"),
            vec!["Please give a room name and a text."; 2]
        );
        assert!(t.chat.sent_to("!lounge:example.org").is_empty());
    }
}
