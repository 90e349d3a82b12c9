//! Hub errors.

use switchboard_transport::ClientId;
use thiserror::Error;

/// Boxed error returned by user hooks and message generators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// No registered client has the requested ID.
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),

    /// The send context expired before all deliveries were attempted.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A client with the same ID is already registered.
    #[error("Duplicate client: {0}")]
    DuplicateClient(ClientId),

    /// The hub loop has shut down.
    #[error("Hub is closed")]
    HubClosed,

    /// The handshake was rejected before the upgrade.
    #[error("Handshake rejected: {0}")]
    Handshake(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
