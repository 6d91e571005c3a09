// ABOUTME: Concrete adapters behind the core's boundary traits.
// ABOUTME: Matrix for the chat service, MQTT for the broker transport.

pub mod matrix;
pub mod mqtt;

pub use matrix::MatrixChatService;
pub use mqtt::MqttTransport;
