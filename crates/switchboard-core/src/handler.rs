//! Per-route handler configuration.
//!
//! A [`Handler`] bundles the optional hooks a route runs for each accepted
//! client. Hooks are called from the hub loop and the pumps, so they should
//! return quickly and hand long work to a spawned task.

use crate::attributes::Attributes;
use crate::error::BoxError;
use crate::hub::Hub;
use crate::message::Envelope;
use axum::http::{HeaderMap, Uri};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard_transport::{ClientId, TransportError};
use tokio_util::sync::CancellationToken;

/// Derives a client's attributes from the upgrade request.
pub type AttributesFn = Arc<dyn Fn(&Hub, &RequestMeta) -> Result<Attributes, BoxError> + Send + Sync>;
/// Produces payloads queued right after registration.
pub type WelcomeFn = Arc<dyn Fn(&ClientContext) -> Result<Vec<Bytes>, BoxError> + Send + Sync>;
/// Connect/disconnect notification.
pub type LifecycleFn = Arc<dyn Fn(&ClientContext) + Send + Sync>;
/// Per-connection error notification.
pub type ErrorFn = Arc<dyn Fn(&ClientContext, &TransportError) + Send + Sync>;
/// Incoming message handler.
pub type IncomingFn = Arc<dyn Fn(&ClientContext, &Envelope) + Send + Sync>;

/// Metadata captured from the request that opened a connection.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Request URI including the query string.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Peer address, when the server exposes connect info.
    pub remote_addr: Option<SocketAddr>,
}

impl RequestMeta {
    /// Capture request metadata.
    #[must_use]
    pub fn new(uri: Uri, headers: HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            uri,
            headers,
            remote_addr,
        }
    }

    /// Header value as a string, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw (undecoded) value of the first query parameter named `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.uri.query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }
}

/// Everything a hook knows about the client it is called for.
#[derive(Clone)]
pub struct ClientContext {
    /// The owning hub.
    pub hub: Hub,
    /// Client ID.
    pub id: ClientId,
    /// Client attributes.
    pub attributes: Arc<Attributes>,
    /// The request that opened the connection.
    pub request: Arc<RequestMeta>,
    /// Cancelled when the client is torn down.
    pub lifecycle: CancellationToken,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Hooks for one route. Every hook is optional.
#[derive(Clone, Default)]
pub struct Handler {
    /// Runs before the upgrade; an error rejects the handshake.
    pub client_attributes: Option<AttributesFn>,
    /// Runs after registration; the payloads are queued in order.
    pub welcome_messages: Option<WelcomeFn>,
    /// Runs after registration.
    pub on_connect: Option<LifecycleFn>,
    /// Runs once the client has been removed.
    pub on_disconnect: Option<LifecycleFn>,
    /// Receives transport errors instead of the hub log.
    pub on_error: Option<ErrorFn>,
    /// Receives every envelope from the client.
    pub on_incoming_message: Option<IncomingFn>,
}

impl Handler {
    /// Create a handler with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attribute hook.
    #[must_use]
    pub fn with_client_attributes<F>(mut self, f: F) -> Self
    where
        F: Fn(&Hub, &RequestMeta) -> Result<Attributes, BoxError> + Send + Sync + 'static,
    {
        self.client_attributes = Some(Arc::new(f));
        self
    }

    /// Set the welcome hook.
    #[must_use]
    pub fn with_welcome_messages<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientContext) -> Result<Vec<Bytes>, BoxError> + Send + Sync + 'static,
    {
        self.welcome_messages = Some(Arc::new(f));
        self
    }

    /// Set the connect hook.
    #[must_use]
    pub fn with_on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientContext) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Set the disconnect hook.
    #[must_use]
    pub fn with_on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientContext) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Set the error hook.
    #[must_use]
    pub fn with_on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientContext, &TransportError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the incoming message hook.
    #[must_use]
    pub fn with_on_incoming_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientContext, &Envelope) + Send + Sync + 'static,
    {
        self.on_incoming_message = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("client_attributes", &self.client_attributes.is_some())
            .field("welcome_messages", &self.welcome_messages.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_incoming_message", &self.on_incoming_message.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        let request = RequestMeta::new(
            "/ws?room=lobby&admin&name=ann".parse().unwrap(),
            HeaderMap::new(),
            None,
        );
        assert_eq!(request.query_param("room"), Some("lobby"));
        assert_eq!(request.query_param("admin"), Some(""));
        assert_eq!(request.query_param("name"), Some("ann"));
        assert_eq!(request.query_param("missing"), None);
        assert_eq!(RequestMeta::default().query_param("room"), None);
    }

    #[test]
    fn test_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user", "ann".parse().unwrap());
        let request = RequestMeta::new(Uri::default(), headers, None);
        assert_eq!(request.header("x-user"), Some("ann"));
        assert_eq!(request.header("x-missing"), None);
    }

    #[test]
    fn test_handler_debug_lists_hooks() {
        let handler = Handler::new().with_on_connect(|_| {});
        let rendered = format!("{handler:?}");
        assert!(rendered.contains("on_connect: true"));
        assert!(rendered.contains("on_error: false"));
    }
}
