//! Transport abstraction traits for Switchboard.
//!
//! A connection is split once into a reader half and a writer half so that
//! the inbound and outbound pumps can run as independent tasks. Only the
//! outbound pump ever holds the writer.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Close code sent when the peer finished normally.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent when the peer is going away (page navigation, shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Reserved close code meaning the close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Reserved close code meaning the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Unique identifier for a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random client ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single frame on a duplex connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload.
    Text(Bytes),
    /// Binary payload.
    Binary(Bytes),
    /// Transport-level ping.
    Ping(Bytes),
    /// Transport-level pong.
    Pong(Bytes),
    /// Close frame with an optional status code.
    Close(Option<u16>),
}

impl Frame {
    /// Payload of a data frame, `None` for control frames.
    #[must_use]
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Self::Text(data) | Self::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Whether this is a ping, pong or close frame.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.data().is_none()
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write deadline elapsed.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Peer sent a payload above the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the offending payload.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Peer closed with a status code outside the expected set.
    #[error("Unexpected close: code {0}")]
    UnexpectedClose(u16),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Whether a close code ends a session without it being worth reporting.
#[must_use]
pub fn is_expected_close(code: Option<u16>) -> bool {
    matches!(
        code,
        None | Some(CLOSE_NORMAL | CLOSE_GOING_AWAY | CLOSE_NO_STATUS | CLOSE_ABNORMAL)
    )
}

/// The read half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` once the stream has ended.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// The write half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush and close the underlying socket.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted duplex connection, not yet split.
pub trait Connection: Send {
    /// Split into independently owned read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
