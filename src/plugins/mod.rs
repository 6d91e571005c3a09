// ABOUTME: Compiled-in plugins and the static table that enables them from config sections.
// ABOUTME: build_registry turns `[plugins.<name>]` tables into a populated Registry.

pub mod announce;
pub mod quote;
pub mod reminders;
pub mod spacestatus;
pub mod speak;
pub mod vote;
pub mod zammad;

#[cfg(test)]
pub(crate) mod testing;

use horscht_core::{Plugin, PluginConfig, Registry, RegistryError};
use std::collections::BTreeMap;

/// Builds a plugin descriptor from its configuration section.
pub type PluginBuilder = fn(PluginConfig) -> Result<Plugin, RegistryError>;

/// Every plugin this binary knows, in registration order.
pub const PLUGINS: &[(&str, PluginBuilder)] = &[
    ("spacestatus", spacestatus::plugin),
    ("speak", speak::plugin),
    ("quote", quote::plugin),
    ("announce", announce::plugin),
    ("reminders", reminders::plugin),
    ("vote", vote::plugin),
    ("zammad", zammad::plugin),
];

/// Register every plugin that has a configuration section.
///
/// Unknown section names and invalid plugin parameters are fatal.
pub fn build_registry(sections: &BTreeMap<String, toml::Table>) -> Result<Registry, RegistryError> {
    if let Some(unknown) = sections
        .keys()
        .find(|name| !PLUGINS.iter().any(|(known, _)| known == name))
    {
        return Err(RegistryError::UnknownPlugin(unknown.clone()));
    }

    let mut registry = Registry::new();
    for (name, build) in PLUGINS {
        let Some(table) = sections.get(*name) else {
            tracing::debug!(plugin = name, "Plugin not configured, skipping");
            continue;
        };
        let plugin = build(PluginConfig::new(name, table.clone()))?;
        registry.register(plugin)?;
    }

    tracing::info!(
        plugins = ?registry.plugin_names(),
        commands = registry.commands().len(),
        topics = registry.topics().len(),
        crons = registry.crons().len(),
        "Plugin registry built"
    );
    Ok(registry)
}

/// Escape text for inclusion in an HTML message body.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
