//! # switchboard-transport
//!
//! Transport abstraction layer for the Switchboard connection hub.
//!
//! Every transport hands the hub a [`Connection`] which is split once into a
//! [`FrameReader`] and a [`FrameWriter`]:
//!
//! - **WebSocket** - upgraded axum sockets
//! - **Memory** - in-process pairs for tests and embedding
//!
//! ```rust,ignore
//! use switchboard_transport::{Connection, Frame};
//!
//! async fn echo(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         if !frame.is_control() {
//!             let _ = writer.send(frame).await;
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{
    is_expected_close, ClientId, Connection, Frame, FrameReader, FrameWriter, TransportError,
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_NO_STATUS,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
