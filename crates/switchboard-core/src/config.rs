//! Hub configuration.

use crate::error::HubError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use switchboard_transport::Frame;

/// Frame type used for outbound payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Send payloads as text frames.
    #[default]
    Text,
    /// Send payloads as binary frames.
    Binary,
}

impl MessageKind {
    /// Wrap a payload in a frame of this kind.
    #[must_use]
    pub fn frame(self, payload: Bytes) -> Frame {
        match self {
            Self::Text => Frame::Text(payload),
            Self::Binary => Frame::Binary(payload),
        }
    }
}

/// What a synchronous send does when a client's outbound buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Drop the message and keep the client connected.
    #[default]
    Drop,
    /// Drop the message and disconnect the client.
    Disconnect,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of each client's outbound buffer.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Capacity of the shared inbound envelope queue.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Maximum inbound payload size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Time allowed for a single write in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,

    /// Time allowed between pongs in milliseconds.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Ping interval in milliseconds. Must be below `pong_wait_ms`.
    #[serde(default = "default_ping_period")]
    pub ping_period_ms: u64,

    /// Frame type for outbound payloads.
    #[serde(default)]
    pub message_kind: MessageKind,

    /// Full-buffer policy for synchronous sends.
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Hosts allowed to upgrade; `*` allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_inbound_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    512
}

fn default_write_wait() -> u64 {
    10_000 // 10 seconds
}

fn default_pong_wait() -> u64 {
    60_000 // 60 seconds
}

fn default_ping_period() -> u64 {
    default_pong_wait() * 9 / 10
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            inbound_capacity: default_inbound_capacity(),
            max_message_size: default_max_message_size(),
            write_wait_ms: default_write_wait(),
            pong_wait_ms: default_pong_wait(),
            ping_period_ms: default_ping_period(),
            message_kind: MessageKind::default(),
            backpressure: BackpressurePolicy::default(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl HubConfig {
    /// Write deadline.
    #[must_use]
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Read deadline, refreshed on every pong.
    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Heartbeat interval.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    /// Whether an upgrade request for `host` passes the origin policy.
    #[must_use]
    pub fn is_origin_allowed(&self, host: Option<&str>) -> bool {
        self.allowed_origins.iter().any(|allowed| {
            allowed == "*" || host.is_some_and(|host| allowed.eq_ignore_ascii_case(host))
        })
    }

    /// Check the configuration for values the pumps cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.outbound_capacity == 0 {
            return Err(HubError::InvalidConfig("outbound_capacity must be > 0"));
        }
        if self.inbound_capacity == 0 {
            return Err(HubError::InvalidConfig("inbound_capacity must be > 0"));
        }
        if self.ping_period_ms == 0 {
            return Err(HubError::InvalidConfig("ping_period_ms must be > 0"));
        }
        if self.ping_period_ms >= self.pong_wait_ms {
            return Err(HubError::InvalidConfig(
                "ping_period_ms must be less than pong_wait_ms",
            ));
        }
        Ok(())
    }
}
