//! HTTP upgrade endpoint.
//!
//! [`Hub::handle`] mounts a WebSocket route that applies the origin policy,
//! runs the attribute hook, upgrades, and hands the socket to the hub.

use crate::attributes::Attributes;
use crate::error::HubError;
use crate::handler::{Handler, RequestMeta};
use crate::hub::Hub;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard_transport::WebSocketConnection;
use tracing::{debug, warn};

#[derive(Clone)]
struct UpgradeState {
    hub: Hub,
    handler: Arc<Handler>,
}

impl Hub {
    /// Build a router serving WebSocket upgrades at `pattern`.
    ///
    /// `Handler::default()` accepts connections with no attributes and no
    /// hooks. Merge the result into the application's router.
    #[must_use]
    pub fn handle(&self, pattern: &str, handler: Handler) -> Router {
        let state = UpgradeState {
            hub: self.clone(),
            handler: Arc::new(handler),
        };
        Router::new()
            .route(pattern, get(upgrade_handler))
            .with_state(state)
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn upgrade_handler(
    State(state): State<UpgradeState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let UpgradeState { hub, handler } = state;

    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    if !hub.config().is_origin_allowed(host) {
        debug!(host = ?host, "Rejecting upgrade from disallowed origin");
        return error_response(StatusCode::FORBIDDEN, "origin not allowed".to_string());
    }

    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let request = RequestMeta::new(uri, headers, remote_addr);

    let attributes = match &handler.client_attributes {
        Some(client_attributes) => match client_attributes(&hub, &request) {
            Ok(attributes) => attributes,
            Err(e) => {
                let rejected =
                    HubError::Handshake(format!("could not get required attributes ({e})"));
                debug!(error = %rejected, "Rejecting upgrade");
                return error_response(StatusCode::BAD_REQUEST, rejected.to_string());
            }
        },
        None => Attributes::new(),
    };

    // Headroom so oversized payloads reach the inbound pump's own check.
    let frame_limit = hub.config().max_message_size.saturating_mul(2);

    ws.max_message_size(frame_limit)
        .on_upgrade(move |socket| async move {
            let connection = WebSocketConnection::new(socket, remote_addr);
            if let Err(e) = hub.accept(Box::new(connection), handler, request, attributes) {
                warn!(error = %e, "Dropping upgraded connection");
            }
        })
}
