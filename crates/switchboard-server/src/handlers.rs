//! HTTP routes and the demo chat handler.
//!
//! Clients join a room through the `room` query parameter and everything they
//! send is relayed to that room. Lines typed on stdin go to every client.

use crate::config::Config;
use crate::metrics;
use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use switchboard_core::{
    Attributes, Filter, Handler, Hub, RequestMeta, SendContext, SendRequest,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Room used when the client does not ask for one.
const DEFAULT_ROOM: &str = "lobby";
/// Deadline for a stdin broadcast.
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.host, config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = Hub::spawn(config.hub.clone(), shutdown.clone())?;

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/clients", get(clients_handler))
        .with_state(hub.clone())
        .merge(hub.handle(&config.websocket_path, chat_handler()));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Switchboard listening on {}{}", addr, config.websocket_path);

    tokio::spawn(broadcast_stdin(hub.clone(), shutdown.clone()));
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await?;

    hub_task.await?;
    info!("Server stopped");
    Ok(())
}

/// The demo handler: rooms from the query string, relay within the room.
pub fn chat_handler() -> Handler {
    Handler::new()
        .with_client_attributes(|_, request: &RequestMeta| {
            let room = request.query_param("room").unwrap_or(DEFAULT_ROOM);
            if room.is_empty() {
                return Err("room must not be empty".into());
            }
            let mut attributes = Attributes::new().set_string("room", room);
            if let Some(name) = request.query_param("name") {
                attributes = attributes.set_string("name", name);
            }
            Ok(attributes)
        })
        .with_welcome_messages(|ctx| {
            let welcome = json!({ "msg": format!("Welcome, {}", ctx.id) });
            Ok(vec![Bytes::from(welcome.to_string())])
        })
        .with_on_connect(|ctx| {
            info!(client = %ctx.id, attributes = %ctx.attributes, "Client connected");
        })
        .with_on_disconnect(|ctx| {
            info!(client = %ctx.id, "Client disconnected");
        })
        .with_on_incoming_message(|ctx, envelope| {
            let Ok(room) = ctx.attributes.get_string("room") else {
                return;
            };
            debug!(client = %ctx.id, room, size = envelope.payload.len(), "Relaying message");

            let request = SendRequest::message(envelope.payload.clone())
                .with_filter(Filter::matching("room", room));
            if let Err(e) = ctx.hub.send(&SendContext::new(), request) {
                warn!(client = %ctx.id, error = %e, "Relay failed");
            }
        })
}

/// Broadcast every stdin line to all clients as `{"received": line}`.
async fn broadcast_stdin(hub: Hub, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Could not read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        info!("Broadcasting {}", line);

        let payload = json!({ "received": line }).to_string();
        let ctx = SendContext::with_timeout(BROADCAST_TIMEOUT);
        match hub.send_with_filter_sync(&ctx, Filter::all(), payload) {
            Ok(report) => debug!(delivered = report.delivered, dropped = report.dropped, "Broadcast done"),
            Err(e) => error!("Broadcast failed: {}", e),
        }
    }
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Could not listen for Ctrl-C: {}", e),
    }
    shutdown.cancel();
}

/// Health check handler.
async fn health_handler(State(hub): State<Hub>) -> impl IntoResponse {
    let stats = hub.stats();
    Json(json!({
        "status": "healthy",
        "clients": stats.clients,
        "message_handlers": stats.message_handlers,
        "discarded_messages": stats.discarded_messages,
    }))
}

/// Registered clients and their attributes.
async fn clients_handler(State(hub): State<Hub>) -> impl IntoResponse {
    Json(hub.clients())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Uri};

    fn request(uri: &str) -> RequestMeta {
        RequestMeta::new(uri.parse::<Uri>().unwrap(), HeaderMap::new(), None)
    }

    #[tokio::test]
    async fn test_chat_attributes() {
        let (hub, _) = Hub::new(Default::default(), CancellationToken::new()).unwrap();
        let handler = chat_handler();
        let hook = handler.client_attributes.unwrap();

        let attrs = hook(&hub, &request("/ws?room=attic&name=ann")).unwrap();
        assert_eq!(attrs.get_string("room").unwrap(), "attic");
        assert_eq!(attrs.get_string("name").unwrap(), "ann");

        let attrs = hook(&hub, &request("/ws")).unwrap();
        assert_eq!(attrs.get_string("room").unwrap(), DEFAULT_ROOM);
        assert!(attrs.get_string("name").is_err());

        assert!(hook(&hub, &request("/ws?room=")).is_err());
    }

    #[test]
    fn test_chat_handler_hooks() {
        let handler = chat_handler();
        assert!(handler.welcome_messages.is_some());
        assert!(handler.on_incoming_message.is_some());
        assert!(handler.on_error.is_none());
    }
}
