//! Test double for [`Client`].

use crate::attributes::Attributes;
use crate::client::Client;
use crate::handler::{Handler, RequestMeta};
use crate::hub::Hub;
use crate::outbound::OutboundBuffer;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchboard_transport::ClientId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A client with no socket. Payloads pile up in its receiver.
pub struct MockClient {
    id: ClientId,
    attributes: Arc<Attributes>,
    request: Arc<RequestMeta>,
    handler: Arc<Handler>,
    outbound: OutboundBuffer,
    lifecycle: CancellationToken,
    received: Mutex<mpsc::Receiver<Bytes>>,
    runs: AtomicUsize,
}

impl MockClient {
    pub fn new(id: &str, attributes: Attributes, capacity: usize) -> Arc<Self> {
        Self::with_handler(id, attributes, capacity, Handler::new())
    }

    pub fn with_handler(
        id: &str,
        attributes: Attributes,
        capacity: usize,
        handler: Handler,
    ) -> Arc<Self> {
        let (outbound, receiver) = OutboundBuffer::new(capacity);
        Arc::new(Self {
            id: ClientId::new(id),
            attributes: Arc::new(attributes),
            request: Arc::new(RequestMeta::default()),
            handler: Arc::new(handler),
            outbound,
            lifecycle: CancellationToken::new(),
            received: Mutex::new(receiver),
            runs: AtomicUsize::new(0),
        })
    }

    /// Next queued payload, if any.
    pub fn read_one(&self) -> Option<Bytes> {
        self.received.lock().try_recv().ok()
    }

    /// Drain every queued payload.
    pub fn read_all(&self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.read_one()).collect()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

impl Client for MockClient {
    fn id(&self) -> &ClientId {
        &self.id
    }

    fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    fn outbound(&self) -> &OutboundBuffer {
        &self.outbound
    }

    fn lifecycle(&self) -> &CancellationToken {
        &self.lifecycle
    }

    fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    fn request(&self) -> &Arc<RequestMeta> {
        &self.request
    }

    fn run(self: Arc<Self>, _hub: Hub) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds, panicking after about a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("condition not met in time");
}
