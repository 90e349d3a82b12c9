//! The hub: client registry plus the loop that owns its mutations.
//!
//! [`Hub`] is a cheap cloneable handle. Registration, unregistration and
//! inbound dispatch are serialized through [`HubLoop::run`]; send callers
//! read the registry concurrently.

use crate::attributes::Attributes;
use crate::client::{Client, SocketClient};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::handler::{Handler, IncomingFn, RequestMeta};
use crate::message::Envelope;
use crate::metrics;
use crate::outbound::PushError;
use crate::registry::ClientRegistry;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use switchboard_transport::{ClientId, Connection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Registry mutations, in the order they were requested.
pub(crate) enum HubEvent {
    Register(Arc<dyn Client>),
    Unregister(ClientId),
}

/// A registered incoming-message handler.
#[derive(Clone)]
struct DispatchEntry {
    client: Arc<dyn Client>,
    on_message: IncomingFn,
}

/// Outcome of a single non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// Buffer full; counted as a discard.
    Discarded,
    /// Buffer already closed.
    Closed,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered clients.
    pub clients: usize,
    /// Clients with an incoming-message handler.
    pub message_handlers: usize,
    /// Messages dropped on full outbound buffers since start.
    pub discarded_messages: u64,
}

/// A registered client as reported by [`Hub::clients`].
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Client ID.
    pub id: String,
    /// Client attributes.
    pub attributes: Attributes,
}

pub(crate) struct HubInner {
    pub(crate) registry: ClientRegistry,
    dispatch: DashMap<ClientId, DispatchEntry>,
    events: mpsc::UnboundedSender<HubEvent>,
    inbound: mpsc::Sender<Envelope>,
    discarded: AtomicU64,
    pub(crate) config: HubConfig,
    shutdown: CancellationToken,
}

/// Handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    pub(crate) inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub and the loop that drives it.
    ///
    /// Nothing happens until [`HubLoop::run`] is polled. Cancelling
    /// `shutdown` stops the loop and tears down every client.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: HubConfig,
        shutdown: CancellationToken,
    ) -> Result<(Self, HubLoop), HubError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);

        let hub = Self {
            inner: Arc::new(HubInner {
                registry: ClientRegistry::new(),
                dispatch: DashMap::new(),
                events: events_tx,
                inbound: inbound_tx,
                discarded: AtomicU64::new(0),
                config,
                shutdown,
            }),
        };
        let hub_loop = HubLoop {
            hub: hub.clone(),
            events: events_rx,
            inbound: inbound_rx,
        };
        Ok((hub, hub_loop))
    }

    /// Create a hub and spawn its loop on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `config` fails validation.
    pub fn spawn(
        config: HubConfig,
        shutdown: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), HubError> {
        let (hub, hub_loop) = Self::new(config, shutdown)?;
        let handle = tokio::spawn(hub_loop.run());
        Ok((hub, handle))
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Wrap an accepted connection in a client and register it.
    ///
    /// The client gets a fresh ID and a lifecycle token derived from the
    /// hub's shutdown token.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has shut down.
    pub fn accept(
        &self,
        connection: Box<dyn Connection>,
        handler: Arc<Handler>,
        request: RequestMeta,
        attributes: Attributes,
    ) -> Result<ClientId, HubError> {
        let id = ClientId::generate();
        debug!(
            client = %id,
            remote = ?connection.remote_addr(),
            attributes = %attributes,
            "Accepting connection"
        );
        let client = SocketClient::new(
            id.clone(),
            connection,
            attributes,
            request,
            handler,
            self.inner.shutdown.child_token(),
            self.inner.config.outbound_capacity,
        );
        self.register(Arc::new(client))?;
        Ok(id)
    }

    /// Queue a client for registration.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has shut down.
    pub fn register(&self, client: Arc<dyn Client>) -> Result<(), HubError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(HubError::HubClosed);
        }
        self.inner
            .events
            .send(HubEvent::Register(client))
            .map_err(|_| HubError::HubClosed)
    }

    /// Queue a client for removal. Unknown or already removed IDs are ignored.
    pub fn unregister(&self, id: ClientId) {
        if self.inner.events.send(HubEvent::Unregister(id)).is_err() {
            trace!("Hub loop gone, ignoring unregister");
        }
    }

    /// Stop the hub loop and tear down every client.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Whether the hub has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            clients: self.inner.registry.len(),
            message_handlers: self.inner.dispatch.len(),
            discarded_messages: self.discarded_messages(),
        }
    }

    /// Snapshot of the registered clients, sorted by ID.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .inner
            .registry
            .snapshot()
            .iter()
            .map(|client| ClientInfo {
                id: client.id().to_string(),
                attributes: Attributes::clone(client.attributes()),
            })
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    /// Messages dropped on full outbound buffers since start.
    #[must_use]
    pub fn discarded_messages(&self) -> u64 {
        self.inner.discarded.load(Ordering::Relaxed)
    }

    pub(crate) fn inbound_sender(&self) -> &mpsc::Sender<Envelope> {
        &self.inner.inbound
    }

    /// Push a payload without waiting.
    pub(crate) fn deliver(&self, client: &dyn Client, payload: Bytes) -> Delivery {
        match client.outbound().try_push(payload) {
            Ok(()) => Delivery::Delivered,
            Err(PushError::Full) => {
                self.inner.discarded.fetch_add(1, Ordering::Relaxed);
                metrics::record_discard();
                warn!(client = %client.id(), "Outbound buffer full, discarding message");
                Delivery::Discarded
            }
            Err(PushError::Closed) => {
                trace!(client = %client.id(), "Outbound buffer closed, dropping message");
                Delivery::Closed
            }
        }
    }

    /// Close a removed client's buffer, cancel it and notify its handler.
    fn teardown(&self, client: &Arc<dyn Client>) {
        client.outbound().close();
        client.cancel();
        self.inner.dispatch.remove(client.id());
        metrics::record_disconnection();

        match &client.handler().on_disconnect {
            Some(on_disconnect) => on_disconnect(&client.context(self)),
            None => debug!(client = %client.id(), "Client disconnected"),
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The task that owns registry mutations and inbound dispatch.
pub struct HubLoop {
    hub: Hub,
    events: mpsc::UnboundedReceiver<HubEvent>,
    inbound: mpsc::Receiver<Envelope>,
}

impl HubLoop {
    /// Run until the hub's shutdown token is cancelled.
    pub async fn run(mut self) {
        info!("Hub loop started");
        let shutdown = self.hub.inner.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.shutdown();
                    break;
                }
                Some(event) = self.events.recv() => match event {
                    HubEvent::Register(client) => self.register(client),
                    HubEvent::Unregister(id) => self.unregister(&id),
                },
                Some(envelope) = self.inbound.recv() => self.dispatch(envelope),
                else => break,
            }
        }

        info!("Hub loop stopped");
    }

    fn register(&self, client: Arc<dyn Client>) {
        let hub = &self.hub;
        let id = client.id().clone();

        if hub.inner.registry.contains(&id) {
            let rejected = HubError::DuplicateClient(id.clone());
            warn!(error = %rejected, "Rejecting registration");
            client.outbound().close();
            client.cancel();
            return;
        }

        let handler = Arc::clone(client.handler());
        let ctx = client.context(hub);

        // Welcome payloads go in before anything else can reach the buffer.
        if let Some(welcome) = &handler.welcome_messages {
            match welcome(&ctx) {
                Ok(payloads) => {
                    for payload in payloads {
                        hub.deliver(client.as_ref(), payload);
                    }
                }
                Err(e) => error!(client = %id, error = %e, "Failed to generate welcome messages"),
            }
        }

        hub.inner.registry.insert(Arc::clone(&client));
        metrics::record_connection();
        Arc::clone(&client).run(hub.clone());

        if let Some(on_message) = &handler.on_incoming_message {
            hub.inner.dispatch.insert(
                id.clone(),
                DispatchEntry {
                    client: Arc::clone(&client),
                    on_message: Arc::clone(on_message),
                },
            );
        }

        match &handler.on_connect {
            Some(on_connect) => on_connect(&ctx),
            None => debug!(client = %id, attributes = %client.attributes(), "Client connected"),
        }
    }

    fn unregister(&self, id: &ClientId) {
        match self.hub.inner.registry.remove(id) {
            Some(client) => self.hub.teardown(&client),
            None => trace!(client = %id, "Client already unregistered"),
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        let entry = self
            .hub
            .inner
            .dispatch
            .get(&envelope.client_id)
            .map(|entry| entry.value().clone());

        match entry {
            Some(entry) => {
                let ctx = entry.client.context(&self.hub);
                (entry.on_message)(&ctx, &envelope);
            }
            None => trace!(client = %envelope.client_id, "No message handler, dropping envelope"),
        }
    }

    fn shutdown(&mut self) {
        let clients = self.hub.inner.registry.drain();
        info!(clients = clients.len(), "Hub shutting down");
        for client in &clients {
            self.hub.teardown(client);
        }
        self.hub.inner.dispatch.clear();

        // Registrations queued before the cancel never reached the registry.
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            if let HubEvent::Register(client) = event {
                debug!(client = %client.id(), "Dropping pending registration");
                client.outbound().close();
                client.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, MockClient};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn spawn_hub() -> (Hub, CancellationToken, JoinHandle<()>) {
        let shutdown = CancellationToken::new();
        let (hub, handle) = Hub::spawn(HubConfig::default(), shutdown.clone()).unwrap();
        (hub, shutdown, handle)
    }

    #[tokio::test]
    async fn test_register_runs_client_and_sends_welcome() {
        let (hub, _shutdown, _) = spawn_hub();
        let connected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connected);
        let handler = Handler::new()
            .with_welcome_messages(|ctx| {
                Ok(vec![
                    Bytes::from(format!("hello {}", ctx.id)),
                    Bytes::from_static(b"second"),
                ])
            })
            .with_on_connect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let client = MockClient::with_handler("c1", Attributes::new(), 4, handler);

        hub.register(client.clone()).unwrap();
        eventually(|| hub.stats().clients == 1).await;

        assert_eq!(client.runs(), 1);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.read_all(),
            vec![Bytes::from_static(b"hello c1"), Bytes::from_static(b"second")]
        );
    }

    #[tokio::test]
    async fn test_welcome_overflow_is_discarded() {
        let (hub, _shutdown, _) = spawn_hub();
        let handler = Handler::new().with_welcome_messages(|_| {
            Ok(vec![Bytes::from_static(b"1"), Bytes::from_static(b"2"), Bytes::from_static(b"3")])
        });
        let client = MockClient::with_handler("c1", Attributes::new(), 2, handler);

        hub.register(client.clone()).unwrap();
        eventually(|| hub.stats().clients == 1).await;

        assert_eq!(client.read_all().len(), 2);
        assert_eq!(hub.discarded_messages(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (hub, _shutdown, _) = spawn_hub();
        let first = MockClient::new("c1", Attributes::new(), 4);
        let second = MockClient::new("c1", Attributes::new(), 4);

        hub.register(first.clone()).unwrap();
        hub.register(second.clone()).unwrap();
        eventually(|| second.is_cancelled()).await;

        assert_eq!(hub.stats().clients, 1);
        assert!(!first.is_cancelled());
        assert_eq!(second.runs(), 0);
        assert!(second.outbound().is_closed());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (hub, _shutdown, _) = spawn_hub();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        let handler = Handler::new().with_on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let client = MockClient::with_handler("c1", Attributes::new(), 4, handler);

        hub.register(client.clone()).unwrap();
        hub.unregister(ClientId::new("c1"));
        hub.unregister(ClientId::new("c1"));
        hub.unregister(ClientId::new("unknown"));
        eventually(|| client.is_cancelled()).await;
        // One more round trip through the loop.
        let marker = MockClient::new("marker", Attributes::new(), 1);
        hub.register(marker.clone()).unwrap();
        eventually(|| marker.runs() == 1).await;

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(client.outbound().is_closed());
        assert_eq!(hub.stats().clients, 1);
    }

    #[tokio::test]
    async fn test_dispatch_to_incoming_handler() {
        let (hub, _shutdown, _) = spawn_hub();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = Handler::new().with_on_incoming_message(move |ctx, envelope| {
            assert_eq!(ctx.id, envelope.client_id);
            sink.lock().push(envelope.text().unwrap_or_default().to_string());
        });
        hub.register(MockClient::with_handler("c1", Attributes::new(), 4, handler))
            .unwrap();
        hub.register(MockClient::new("c2", Attributes::new(), 4))
            .unwrap();
        eventually(|| hub.stats().clients == 2).await;
        assert_eq!(hub.stats().message_handlers, 1);

        let inbound = hub.inbound_sender();
        inbound.send(Envelope::new(ClientId::new("c2"), "dropped")).await.unwrap();
        inbound.send(Envelope::new(ClientId::new("c1"), "first")).await.unwrap();
        inbound.send(Envelope::new(ClientId::new("c1"), "second")).await.unwrap();
        eventually(|| seen.lock().len() == 2).await;

        assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_clients() {
        let (hub, shutdown, handle) = spawn_hub();
        let clients: Vec<_> = (0..3)
            .map(|i| MockClient::new(&format!("c{i}"), Attributes::new(), 4))
            .collect();
        for client in &clients {
            hub.register(client.clone()).unwrap();
        }
        eventually(|| hub.stats().clients == 3).await;

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(hub.stats().clients, 0);
        for client in &clients {
            assert!(client.is_cancelled());
            assert!(client.outbound().is_closed());
        }
        assert!(matches!(
            hub.register(MockClient::new("late", Attributes::new(), 1)),
            Err(HubError::HubClosed)
        ));
    }

    #[tokio::test]
    async fn test_pending_registration_closed_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (hub, handle) = Hub::spawn(HubConfig::default(), shutdown.clone()).unwrap();
        let client = MockClient::new("c1", Attributes::new(), 4);

        // The loop has not been polled yet, so the event is still queued.
        hub.register(client.clone()).unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        assert!(client.is_cancelled());
        assert!(client.outbound().is_closed());
        assert_eq!(client.runs(), 0);
        assert_eq!(hub.stats().clients, 0);
    }

    #[test]
    fn test_new_rejects_zero_outbound_capacity() {
        let config = HubConfig {
            outbound_capacity: 0,
            ..HubConfig::default()
        };
        assert!(matches!(
            Hub::new(config, CancellationToken::new()),
            Err(HubError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_new_rejects_zero_ping_period() {
        let config = HubConfig {
            ping_period_ms: 0,
            ..HubConfig::default()
        };
        assert!(matches!(
            Hub::new(config, CancellationToken::new()),
            Err(HubError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_clients_snapshot() {
        let (hub, _shutdown, _) = spawn_hub();
        hub.register(MockClient::new("b", Attributes::new().set_string("room", "x"), 1))
            .unwrap();
        hub.register(MockClient::new("a", Attributes::new(), 1))
            .unwrap();
        eventually(|| hub.stats().clients == 2).await;

        let clients = hub.clients();
        assert_eq!(clients[0].id, "a");
        assert_eq!(clients[1].id, "b");
        let json = serde_json::to_value(&clients[1]).unwrap();
        assert_eq!(json["attributes"]["room"], "x");
    }
}
