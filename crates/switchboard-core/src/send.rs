//! Filtered fan-out.
//!
//! A send walks the registry, evaluates the filter against each client's ID
//! and attributes, and pushes the (lazily generated) payload into every
//! matching outbound buffer. Synchronous delivery never waits: a full buffer
//! drops the message. Asynchronous delivery spawns one task per match that
//! waits for room until the caller's context or the client goes away.

use crate::client::Client;
use crate::config::BackpressurePolicy;
use crate::error::{BoxError, HubError};
use crate::filter::Filter;
use crate::hub::{Delivery, Hub};
use crate::message::{MessageCache, MessageSource};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use switchboard_transport::ClientId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How matched clients are handed the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Non-blocking push; full buffers drop the message.
    #[default]
    Sync,
    /// One task per match that waits for buffer capacity.
    Async,
}

/// A single send call: what to deliver, to whom, and how.
#[derive(Debug)]
pub struct SendRequest {
    filter: Filter,
    source: MessageSource,
    mode: DeliveryMode,
}

impl SendRequest {
    /// Send a fixed payload to every client.
    #[must_use]
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self::from_source(MessageSource::payload(payload))
    }

    /// Send a payload produced on the first match.
    #[must_use]
    pub fn generate<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<Bytes, BoxError> + Send + 'static,
    {
        Self::from_source(MessageSource::generator(f))
    }

    /// Send from an existing source.
    #[must_use]
    pub fn from_source(source: MessageSource) -> Self {
        Self {
            filter: Filter::all(),
            source,
            mode: DeliveryMode::Sync,
        }
    }

    /// Restrict delivery to clients matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Deliver asynchronously.
    #[must_use]
    pub fn asynchronous(self) -> Self {
        self.with_mode(DeliveryMode::Async)
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }
}

impl From<Bytes> for MessageSource {
    fn from(payload: Bytes) -> Self {
        Self::Payload(payload)
    }
}

impl From<&'static str> for MessageSource {
    fn from(payload: &'static str) -> Self {
        Self::Payload(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<String> for MessageSource {
    fn from(payload: String) -> Self {
        Self::Payload(Bytes::from(payload))
    }
}

impl From<Vec<u8>> for MessageSource {
    fn from(payload: Vec<u8>) -> Self {
        Self::Payload(Bytes::from(payload))
    }
}

/// Cancellation and deadline for a send call.
///
/// Clones share cancellation.
#[derive(Debug, Clone, Default)]
pub struct SendContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SendContext {
    /// A context that never expires on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Expire at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Tie the context to an existing token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancel the context and every clone of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or past its deadline.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

/// What a send call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendReport {
    /// Clients that matched the filter.
    pub matched: usize,
    /// Payloads pushed into a buffer.
    pub delivered: usize,
    /// Payloads dropped on full or closed buffers.
    pub dropped: usize,
    /// Asynchronous delivery tasks started.
    pub spawned: usize,
    /// Whether the generator failed.
    pub generation_failed: bool,
}

impl Hub {
    /// Deliver a message to every client matching the request's filter.
    ///
    /// The message is generated at most once, on the first match. A failed
    /// generation is logged and nothing is delivered.
    ///
    /// Asynchronous requests must be made from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DeadlineExceeded`] if `ctx` finishes during a
    /// synchronous send. Deliveries made before that stand.
    pub fn send(&self, ctx: &SendContext, request: SendRequest) -> Result<SendReport, HubError> {
        let SendRequest {
            filter,
            source,
            mode,
        } = request;
        let disconnect_on_overflow = self.config().backpressure == BackpressurePolicy::Disconnect;

        let mut cache = MessageCache::new(source);
        let mut report = SendReport::default();
        let mut overflowed = Vec::new();

        let result = self.inner.registry.for_each_matching(&filter, |client| {
            report.matched += 1;
            if mode == DeliveryMode::Sync && ctx.is_done() {
                return Err(HubError::DeadlineExceeded);
            }
            let Some(payload) = cache.resolve() else {
                return Ok(());
            };

            match mode {
                DeliveryMode::Sync => match self.deliver(client.as_ref(), payload) {
                    Delivery::Delivered => report.delivered += 1,
                    Delivery::Discarded => {
                        report.dropped += 1;
                        if disconnect_on_overflow {
                            overflowed.push(client.id().clone());
                        }
                    }
                    Delivery::Closed => report.dropped += 1,
                },
                DeliveryMode::Async => {
                    if spawn_delivery(client, payload, ctx.clone()) {
                        report.spawned += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
            }
            Ok(())
        });

        report.generation_failed = cache.is_failed();
        for id in overflowed {
            warn!(client = %id, "Disconnecting slow client");
            self.unregister(id);
        }
        result?;

        trace!(
            matched = report.matched,
            delivered = report.delivered,
            dropped = report.dropped,
            spawned = report.spawned,
            "Send complete"
        );
        Ok(report)
    }

    /// Synchronous send to clients matching `filter`.
    ///
    /// # Errors
    ///
    /// See [`Hub::send`].
    pub fn send_with_filter_sync(
        &self,
        ctx: &SendContext,
        filter: Filter,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        self.send(
            ctx,
            SendRequest::from_source(message.into()).with_filter(filter),
        )
    }

    /// Asynchronous send to clients matching `filter`.
    ///
    /// # Errors
    ///
    /// See [`Hub::send`].
    pub fn send_with_filter_async(
        &self,
        ctx: &SendContext,
        filter: Filter,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        self.send(
            ctx,
            SendRequest::from_source(message.into())
                .with_filter(filter)
                .asynchronous(),
        )
    }

    /// Synchronous send to clients whose boolean attribute `key` is set.
    ///
    /// # Errors
    ///
    /// See [`Hub::send`].
    pub fn send_to_all_with_flag_sync(
        &self,
        ctx: &SendContext,
        key: &str,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        self.send_with_filter_sync(ctx, Filter::flag(key), message)
    }

    /// Asynchronous send to clients whose boolean attribute `key` is set.
    ///
    /// # Errors
    ///
    /// See [`Hub::send`].
    pub fn send_to_all_with_flag_async(
        &self,
        ctx: &SendContext,
        key: &str,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        self.send_with_filter_async(ctx, Filter::flag(key), message)
    }

    /// Synchronous send to clients whose string attribute `key` equals `value`.
    ///
    /// # Errors
    ///
    /// See [`Hub::send`].
    pub fn send_to_all_with_match_sync(
        &self,
        ctx: &SendContext,
        key: &str,
        value: &str,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        self.send_with_filter_sync(ctx, Filter::matching(key, value), message)
    }

    /// Asynchronous send to clients whose string attribute `key` equals `value`.
    ///
    /// # Errors
    ///
    /// See [`Hub::send`].
    pub fn send_to_all_with_match_async(
        &self,
        ctx: &SendContext,
        key: &str,
        value: &str,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        self.send_with_filter_async(ctx, Filter::matching(key, value), message)
    }

    /// Synchronous send to one client.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ClientNotFound`] if no client has `id`, otherwise
    /// see [`Hub::send`].
    pub fn send_to_client_sync(
        &self,
        ctx: &SendContext,
        id: &ClientId,
        message: impl Into<MessageSource>,
    ) -> Result<SendReport, HubError> {
        let report = self.send_with_filter_sync(ctx, Filter::client(id.clone()), message)?;
        if report.matched == 0 {
            return Err(HubError::ClientNotFound(id.clone()));
        }
        Ok(report)
    }

    /// Number of clients matching `filter`.
    #[must_use]
    pub fn count_clients_with_filter(&self, filter: &Filter) -> usize {
        self.inner.registry.count_matching(filter)
    }
}

/// Start a task that waits for room in the client's buffer.
///
/// Returns `false` if the buffer is already closed.
fn spawn_delivery(client: &Arc<dyn Client>, payload: Bytes, ctx: SendContext) -> bool {
    let Some(sender) = client.outbound().sender() else {
        return false;
    };
    let lifecycle = client.lifecycle().clone();
    let id = client.id().clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = lifecycle.cancelled() => trace!(client = %id, "Client gone, abandoning send"),
            () = ctx.done() => debug!(client = %id, "Send context done, abandoning send"),
            sent = sender.send(payload) => {
                if sent.is_err() {
                    trace!(client = %id, "Outbound buffer closed during send");
                }
            }
        }
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::config::HubConfig;
    use crate::testing::{eventually, MockClient};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn hub_with(config: HubConfig, clients: &[&Arc<MockClient>]) -> Hub {
        let (hub, _) = Hub::spawn(config, CancellationToken::new()).unwrap();
        for client in clients {
            let client: Arc<dyn Client> = Arc::<MockClient>::clone(*client);
            hub.register(client).unwrap();
        }
        let expected = clients.len();
        eventually(|| hub.stats().clients == expected).await;
        hub
    }

    fn scenario_clients() -> (Arc<MockClient>, Arc<MockClient>) {
        (
            MockClient::new(
                "c1",
                Attributes::new().set_string("k", "a").set_bool("flag", true),
                8,
            ),
            MockClient::new("c2", Attributes::new().set_string("k", "b"), 8),
        )
    }

    #[tokio::test]
    async fn test_filters_isolate_clients() {
        let (c1, c2) = scenario_clients();
        let hub = hub_with(HubConfig::default(), &[&c1, &c2]).await;
        let ctx = SendContext::new();

        hub.send_to_all_with_match_sync(&ctx, "k", "a", "msg1").unwrap();
        hub.send_to_all_with_flag_sync(&ctx, "flag", "msg2").unwrap();
        hub.send_to_client_sync(&ctx, &ClientId::new("c1"), "msg3")
            .unwrap();

        assert_eq!(
            c1.read_all(),
            vec![
                Bytes::from_static(b"msg1"),
                Bytes::from_static(b"msg2"),
                Bytes::from_static(b"msg3"),
            ]
        );
        assert!(c2.read_all().is_empty());
    }

    #[tokio::test]
    async fn test_generator_runs_once_per_send() {
        let clients: Vec<_> = (0..5)
            .map(|i| MockClient::new(&format!("c{i}"), Attributes::new(), 4))
            .collect();
        let refs: Vec<_> = clients.iter().collect();
        let hub = hub_with(HubConfig::default(), &refs).await;
        let ctx = SendContext::new();

        for (filter, expected) in [
            (Filter::new(|_, _| false), 0),
            (Filter::client("c3"), 1),
            (Filter::all(), 5),
        ] {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let request = SendRequest::generate(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"generated"))
            })
            .with_filter(filter);

            let report = hub.send(&ctx, request).unwrap();
            assert_eq!(report.delivered, expected);
            assert_eq!(calls.load(Ordering::SeqCst), usize::from(expected > 0));
        }
    }

    #[tokio::test]
    async fn test_generation_failure_delivers_nothing() {
        let (c1, c2) = scenario_clients();
        let hub = hub_with(HubConfig::default(), &[&c1, &c2]).await;

        let report = hub
            .send(
                &SendContext::new(),
                SendRequest::generate(|| Err("no payload".into())),
            )
            .unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 0);
        assert!(report.generation_failed);
        assert!(c1.read_all().is_empty());
        assert!(c2.read_all().is_empty());
    }

    #[tokio::test]
    async fn test_full_buffer_discards() {
        let c1 = MockClient::new("c1", Attributes::new(), 3);
        let hub = hub_with(HubConfig::default(), &[&c1]).await;
        let ctx = SendContext::new();
        let id = ClientId::new("c1");

        for _ in 0..5 {
            hub.send_to_client_sync(&ctx, &id, "msg1").unwrap();
        }
        assert_eq!(hub.discarded_messages(), 2);

        assert_eq!(c1.read_one(), Some(Bytes::from_static(b"msg1")));
        let report = hub.send_to_client_sync(&ctx, &id, "msg2").unwrap();
        assert_eq!(report.delivered, 1);

        assert_eq!(
            c1.read_all(),
            vec![
                Bytes::from_static(b"msg1"),
                Bytes::from_static(b"msg1"),
                Bytes::from_static(b"msg2"),
            ]
        );
        assert_eq!(hub.discarded_messages(), 2);
        assert_eq!(hub.stats().clients, 1);
    }

    #[tokio::test]
    async fn test_disconnect_policy_unregisters_slow_client() {
        let c1 = MockClient::new("c1", Attributes::new(), 1);
        let config = HubConfig {
            backpressure: BackpressurePolicy::Disconnect,
            ..HubConfig::default()
        };
        let hub = hub_with(config, &[&c1]).await;
        let ctx = SendContext::new();

        hub.send_with_filter_sync(&ctx, Filter::all(), "one").unwrap();
        let report = hub.send_with_filter_sync(&ctx, Filter::all(), "two").unwrap();
        assert_eq!(report.dropped, 1);

        eventually(|| hub.stats().clients == 0).await;
        assert!(c1.is_cancelled());
        assert_eq!(hub.discarded_messages(), 1);
    }

    #[tokio::test]
    async fn test_send_to_missing_client() {
        let hub = hub_with(HubConfig::default(), &[]).await;
        let err = hub
            .send_to_client_sync(&SendContext::new(), &ClientId::new("ghost"), "hi")
            .unwrap_err();
        assert!(matches!(err, HubError::ClientNotFound(id) if id.as_str() == "ghost"));
    }

    #[tokio::test]
    async fn test_expired_context_stops_sync_send() {
        let (c1, c2) = scenario_clients();
        let hub = hub_with(HubConfig::default(), &[&c1, &c2]).await;
        let ctx = SendContext::new();
        ctx.cancel();

        let err = hub
            .send_with_filter_sync(&ctx, Filter::all(), "late")
            .unwrap_err();
        assert!(matches!(err, HubError::DeadlineExceeded));
        assert!(c1.read_all().is_empty());
        assert!(c2.read_all().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_mid_send_keeps_earlier_deliveries() {
        let (c1, c2) = scenario_clients();
        let hub = hub_with(HubConfig::default(), &[&c1, &c2]).await;
        let ctx = SendContext::new();
        let expire = ctx.clone();

        // The context expires while the first match is being served.
        let request = SendRequest::generate(move || {
            expire.cancel();
            Ok(Bytes::from_static(b"partial"))
        });
        let err = hub.send(&ctx, request).unwrap_err();
        assert!(matches!(err, HubError::DeadlineExceeded));

        let mut received = c1.read_all();
        received.extend(c2.read_all());
        assert_eq!(received, vec![Bytes::from_static(b"partial")]);
    }

    #[tokio::test]
    async fn test_async_send_waits_for_capacity() {
        let c1 = MockClient::new("c1", Attributes::new(), 1);
        let hub = hub_with(HubConfig::default(), &[&c1]).await;
        let ctx = SendContext::with_timeout(Duration::from_secs(5));

        hub.send_with_filter_sync(&ctx, Filter::all(), "first").unwrap();
        let report = hub
            .send_with_filter_async(&ctx, Filter::all(), "second")
            .unwrap();
        assert_eq!(report.spawned, 1);

        assert_eq!(c1.read_one(), Some(Bytes::from_static(b"first")));
        eventually(|| {
            c1.read_one()
                .is_some_and(|payload| payload == Bytes::from_static(b"second"))
        })
        .await;
        assert_eq!(hub.discarded_messages(), 0);
    }

    #[tokio::test]
    async fn test_async_send_abandoned_on_cancel() {
        let c1 = MockClient::new("c1", Attributes::new(), 1);
        let hub = hub_with(HubConfig::default(), &[&c1]).await;
        let ctx = SendContext::new();

        hub.send_to_all_with_flag_sync(&ctx, "missing", "nobody").unwrap();
        hub.send_with_filter_sync(&ctx, Filter::all(), "first").unwrap();
        hub.send_with_filter_async(&ctx, Filter::all(), "second")
            .unwrap();
        ctx.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(c1.read_one(), Some(Bytes::from_static(b"first")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c1.read_one(), None);
    }

    #[tokio::test]
    async fn test_count_clients_with_filter() {
        let (c1, c2) = scenario_clients();
        let hub = hub_with(HubConfig::default(), &[&c1, &c2]).await;

        assert_eq!(hub.count_clients_with_filter(&Filter::all()), 2);
        assert_eq!(hub.count_clients_with_filter(&Filter::flag("flag")), 1);
        assert_eq!(
            hub.count_clients_with_filter(&Filter::matching("k", "c")),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_deadline() {
        let ctx = SendContext::with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());
        ctx.done().await;
        assert!(ctx.is_done());
    }
}
