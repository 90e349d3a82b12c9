//! In-process connection pair.
//!
//! [`MemoryConnection`] behaves like an accepted socket while the matching
//! [`MemoryPeer`] plays the remote client. Useful for driving the pumps
//! without a network.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Connection, Frame, FrameReader, FrameWriter, TransportError};

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::Receiver<Result<Frame, TransportError>>,
    outbound: mpsc::Sender<Frame>,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    to_server: Option<mpsc::Sender<Result<Frame, TransportError>>>,
    from_server: mpsc::Receiver<Frame>,
}

impl MemoryConnection {
    /// Create a connected pair whose directions each buffer `capacity` frames.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, MemoryPeer) {
        let (to_server, inbound) = mpsc::channel(capacity);
        let (outbound, from_server) = mpsc::channel(capacity);
        (
            Self { inbound, outbound },
            MemoryPeer {
                to_server: Some(to_server),
                from_server,
            },
        )
    }
}

impl Connection for MemoryConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (
            Box::new(MemoryReader {
                inbound: self.inbound,
            }),
            Box::new(MemoryWriter {
                outbound: Some(self.outbound),
            }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

struct MemoryReader {
    inbound: mpsc::Receiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        self.inbound.recv().await.transpose()
    }
}

struct MemoryWriter {
    outbound: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver a frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the server dropped its reader.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match &self.to_server {
            Some(tx) => tx
                .send(Ok(frame))
                .await
                .map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Make the server's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server dropped its reader.
    pub async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        match &self.to_server {
            Some(tx) => tx
                .send(Err(error))
                .await
                .map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// End the stream as seen by the server's reader.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server closed its writer.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_server.try_recv().ok()
    }
}
