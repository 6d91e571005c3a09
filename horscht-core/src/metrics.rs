// ABOUTME: Counters for dispatch, scheduling and broker activity via the metrics facade.
// ABOUTME: Nothing is exported unless the binary installs a recorder.

use metrics::counter;

pub const EVENTS_RECEIVED_TOTAL: &str = "horscht_events_received_total";
pub const COMMANDS_DISPATCHED_TOTAL: &str = "horscht_commands_dispatched_total";
pub const COMMANDS_DENIED_TOTAL: &str = "horscht_commands_denied_total";
pub const HANDLER_FAILURES_TOTAL: &str = "horscht_handler_failures_total";
pub const CRON_FIRED_TOTAL: &str = "horscht_cron_fired_total";
pub const BROKER_MESSAGES_TOTAL: &str = "horscht_broker_messages_total";
pub const BROKER_CONNECTS_TOTAL: &str = "horscht_broker_connects_total";
pub const INVITES_TOTAL: &str = "horscht_invites_total";

/// Record an event taken off a queue ("chat" or "broker")
pub fn record_event_received(source: &'static str) {
    counter!(EVENTS_RECEIVED_TOTAL, "source" => source).increment(1);
}

pub fn record_command_dispatched(command: &str) {
    counter!(COMMANDS_DISPATCHED_TOTAL, "command" => command.to_string()).increment(1);
}

pub fn record_command_denied(command: &str) {
    counter!(COMMANDS_DENIED_TOTAL, "command" => command.to_string()).increment(1);
}

/// Record a handler that returned an error or panicked
pub fn record_handler_failure(role: &'static str) {
    counter!(HANDLER_FAILURES_TOTAL, "role" => role).increment(1);
}

pub fn record_cron_fired(owner: &str) {
    counter!(CRON_FIRED_TOTAL, "plugin" => owner.to_string()).increment(1);
}

/// Record an inbound broker message, `routed` if a topic handler existed
pub fn record_broker_message(routed: bool) {
    let outcome = if routed { "routed" } else { "dropped" };
    counter!(BROKER_MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_broker_connect(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(BROKER_CONNECTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record an invite outcome ("joined", "not_found", "failed")
pub fn record_invite(outcome: &'static str) {
    counter!(INVITES_TOTAL, "outcome" => outcome).increment(1);
}
