//! Message types for Switchboard.
//!
//! [`Envelope`] carries inbound payloads from a client to the hub loop;
//! [`MessageSource`] describes what a send call delivers.

use crate::error::BoxError;
use bytes::Bytes;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use switchboard_transport::ClientId;
use tracing::error;

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An inbound payload tagged with the client it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending client.
    pub client_id: ClientId,
    /// Normalized payload.
    pub payload: Bytes,
    /// Timestamp (ms) when the payload was read.
    pub received_at: u64,
}

impl Envelope {
    /// Create a new envelope stamped with the current time.
    #[must_use]
    pub fn new(client_id: ClientId, payload: impl Into<Bytes>) -> Self {
        Self {
            client_id,
            payload: payload.into(),
            received_at: now_millis(),
        }
    }

    /// Payload as UTF-8, if it is valid.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Lazily invoked message generator.
pub type Generator = Box<dyn FnOnce() -> Result<Bytes, BoxError> + Send>;

/// What a send call delivers.
pub enum MessageSource {
    /// A precomputed payload.
    Payload(Bytes),
    /// A generator run on the first match.
    Generator(Generator),
}

impl MessageSource {
    /// Wrap a precomputed payload.
    #[must_use]
    pub fn payload(payload: impl Into<Bytes>) -> Self {
        Self::Payload(payload.into())
    }

    /// Wrap a generator.
    #[must_use]
    pub fn generator<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<Bytes, BoxError> + Send + 'static,
    {
        Self::Generator(Box::new(f))
    }
}

impl fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload(payload) => f.debug_tuple("Payload").field(payload).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Resolves a [`MessageSource`] at most once per send call.
pub(crate) enum MessageCache {
    Pending(MessageSource),
    Ready(Bytes),
    Failed,
}

impl MessageCache {
    pub(crate) fn new(source: MessageSource) -> Self {
        Self::Pending(source)
    }

    /// Get the message, generating it on the first call.
    ///
    /// A failed generation is logged once; every later call returns `None`.
    pub(crate) fn resolve(&mut self) -> Option<Bytes> {
        match std::mem::replace(self, Self::Failed) {
            Self::Ready(payload) | Self::Pending(MessageSource::Payload(payload)) => {
                *self = Self::Ready(payload.clone());
                Some(payload)
            }
            Self::Pending(MessageSource::Generator(generate)) => match generate() {
                Ok(payload) => {
                    *self = Self::Ready(payload.clone());
                    Some(payload)
                }
                Err(e) => {
                    error!(error = %e, "Failed to generate message");
                    None
                }
            },
            Self::Failed => None,
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}
