//! Hub instrumentation.
//!
//! Records through the `metrics` facade; the binary decides whether an
//! exporter is installed.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const MESSAGES_TOTAL: &str = "switchboard_messages_total";
    pub const MESSAGES_BYTES: &str = "switchboard_messages_bytes";
    pub const MESSAGES_DISCARDED: &str = "switchboard_messages_discarded_total";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
}

/// Record a registered client.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record an unregistered client.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message crossing the socket.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a message dropped on a full outbound buffer.
pub fn record_discard() {
    counter!(names::MESSAGES_DISCARDED).increment(1);
}

/// Record a connection error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
