//! # switchboard-core
//!
//! Connection hub for the Switchboard realtime server.
//!
//! This crate provides the building blocks:
//!
//! - **Hub** - Registry of live clients and the loop that owns it
//! - **Client** - One connection and its inbound/outbound pump pair
//! - **Send** - Filtered fan-out with lazy message generation
//! - **Attributes** - Typed per-client metadata that filters match on
//! - **Handler** - Per-route hooks for attributes, welcome messages and events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  envelope  ┌─────────────┐  dispatch  ┌─────────────┐
//! │ inbound pump│───────────▶│  Hub loop   │───────────▶│   Handler   │
//! └─────────────┘            └─────────────┘            └─────────────┘
//!                                   │ registry
//!                                   ▼
//! ┌─────────────┐   filter   ┌─────────────┐   drain    ┌─────────────┐
//! │  Hub::send  │───────────▶│  outbound   │───────────▶│outbound pump│
//! └─────────────┘            │   buffer    │            └─────────────┘
//!                            └─────────────┘
//! ```

pub mod attributes;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod outbound;
pub mod registry;
pub mod routes;
pub mod send;

#[cfg(test)]
mod testing;

pub use attributes::{AttributeError, AttributeValue, Attributes};
pub use client::{Client, SocketClient};
pub use config::{BackpressurePolicy, HubConfig, MessageKind};
pub use error::{BoxError, HubError};
pub use filter::Filter;
pub use handler::{ClientContext, Handler, RequestMeta};
pub use hub::{ClientInfo, Hub, HubLoop, HubStats};
pub use message::{Envelope, MessageSource};
pub use outbound::{OutboundBuffer, PushError};
pub use registry::ClientRegistry;
pub use send::{DeliveryMode, SendContext, SendReport, SendRequest};
pub use switchboard_transport::ClientId;
