// ABOUTME: Root library module of the horscht binary crate
// ABOUTME: Config, Matrix and MQTT adapters, and the compiled-in plugins

pub mod config;
pub mod matrix_client;
pub mod paths;
pub mod platform;
pub mod plugins;
