//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the split [`Connection`] model.
//! axum answers transport pings on its own, so the reader only surfaces them.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::traits::{Connection, Frame, FrameReader, FrameWriter, TransportError};

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            socket,
            remote_addr,
        }
    }
}

impl Connection for WebSocketConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WebSocketReader { stream }),
            Box::new(WebSocketWriter {
                sink,
                closed: false,
            }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Read half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(Some(from_message(message))),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Write half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let message = into_message(frame)?;
        trace!("Writing WebSocket frame");
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }
}

fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(Bytes::from(text)),
        Message::Binary(data) => Frame::Binary(Bytes::from(data)),
        Message::Ping(data) => Frame::Ping(Bytes::from(data)),
        Message::Pong(data) => Frame::Pong(Bytes::from(data)),
        Message::Close(frame) => Frame::Close(frame.map(|f| f.code)),
    }
}

fn into_message(frame: Frame) -> Result<Message, TransportError> {
    Ok(match frame {
        Frame::Text(data) => Message::Text(
            String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::SendFailed(format!("Invalid UTF-8 text: {e}")))?,
        ),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
        Frame::Ping(data) => Message::Ping(data.to_vec()),
        Frame::Pong(data) => Message::Pong(data.to_vec()),
        Frame::Close(code) => Message::Close(code.map(|code| CloseFrame {
            code,
            reason: Cow::Borrowed(""),
        })),
    })
}
