//! Per-client outbound buffer.
//!
//! Many send callers push concurrently; only the client's outbound pump
//! drains. The hub closes the buffer on teardown by dropping the sender,
//! after which the pump sees the remaining messages and then end-of-stream.

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Reasons a non-blocking push can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    /// The buffer is at capacity.
    #[error("Outbound buffer full")]
    Full,
    /// The buffer was closed by the hub.
    #[error("Outbound buffer closed")]
    Closed,
}

/// Bounded, closable queue of outbound payloads.
#[derive(Debug)]
pub struct OutboundBuffer {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    capacity: usize,
}

impl OutboundBuffer {
    /// Create a buffer and the receiver its pump drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                sender: Mutex::new(Some(tx)),
                capacity,
            },
            rx,
        )
    }

    /// Push without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] at capacity and [`PushError::Closed`]
    /// once the buffer has been closed or its receiver dropped.
    pub fn try_push(&self, payload: Bytes) -> Result<(), PushError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(PushError::Closed)?;
        sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Clone the sender for a task that waits for capacity.
    ///
    /// Returns `None` once the buffer is closed.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.sender.lock().clone()
    }

    /// Close the buffer.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    /// Whether the buffer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
