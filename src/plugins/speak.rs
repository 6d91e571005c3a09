// ABOUTME: !talk publishes "<sender>#<text>" to the speech topic on the broker.
// ABOUTME: Whatever listens on that topic reads the text out loud in the space.

use anyhow::Result;
use async_trait::async_trait;
use horscht_core::{localpart, Bot, CommandCall, CommandHandler, Plugin, PluginConfig, RegistryError};

const DEFAULT_TOPIC: &str = "space/bernd/speak/chat";

pub fn plugin(config: PluginConfig) -> Result<Plugin, RegistryError> {
    let topic = config.str_or("topic", DEFAULT_TOPIC).to_string();
    Ok(Plugin::new(config).command("!talk", "Make Bernd speak.", Talk { topic }))
}

struct Talk {
    topic: String,
}

#[async_trait]
impl CommandHandler for Talk {
    async fn handle(&self, bot: &Bot, call: CommandCall<'_>) -> Result<()> {
        if call.args.is_empty() {
            return bot.reply(call.event, "Usage: !talk <text>").await;
        }
        let payload = format!("{}#{}", localpart(&call.event.sender), call.args.join(" "));
        tracing::info!(topic = %self.topic, sender = %call.event.sender, "Publishing speech request");
        bot.publish(&self.topic, payload).await?;
        Ok(())
    }
}
