//! Connected clients and their pump pair.
//!
//! Each [`SocketClient`] runs two tasks: the inbound pump reads frames and
//! forwards envelopes to the hub, the outbound pump is the only writer and
//! also owns the heartbeat. Either pump exiting asks the hub to unregister
//! the client; the hub ignores the second request.

use crate::attributes::Attributes;
use crate::config::MessageKind;
use crate::handler::{ClientContext, Handler, RequestMeta};
use crate::hub::Hub;
use crate::message::Envelope;
use crate::metrics;
use crate::outbound::OutboundBuffer;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use switchboard_transport::{
    is_expected_close, ClientId, Connection, Frame, FrameReader, FrameWriter, TransportError,
};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Application-level keep-alive request.
const PING: &[u8] = b"PING";
/// Application-level keep-alive reply.
const PONG: &[u8] = b"PONG";

/// A client as seen by the hub.
///
/// The hub only needs identity, attributes, the outbound buffer and the
/// lifecycle token; `run` starts whatever drives the connection.
pub trait Client: Send + Sync {
    /// Client ID.
    fn id(&self) -> &ClientId;

    /// Attributes fixed at accept time.
    fn attributes(&self) -> &Arc<Attributes>;

    /// Outbound buffer drained by the client's writer.
    fn outbound(&self) -> &OutboundBuffer;

    /// Token cancelled when the client is torn down.
    fn lifecycle(&self) -> &CancellationToken;

    /// Hooks configured for the route the client came in on.
    fn handler(&self) -> &Arc<Handler>;

    /// The request that opened the connection.
    fn request(&self) -> &Arc<RequestMeta>;

    /// Start driving the connection. Called once, by the hub loop.
    fn run(self: Arc<Self>, hub: Hub);

    /// Cancel the lifecycle token.
    fn cancel(&self) {
        self.lifecycle().cancel();
    }

    /// Build the context passed to hooks.
    fn context(&self, hub: &Hub) -> ClientContext {
        ClientContext {
            hub: hub.clone(),
            id: self.id().clone(),
            attributes: Arc::clone(self.attributes()),
            request: Arc::clone(self.request()),
            lifecycle: self.lifecycle().clone(),
        }
    }
}

/// Replace newlines with spaces and trim surrounding whitespace.
pub(crate) fn normalize_payload(data: &[u8]) -> Bytes {
    let start = data.iter().position(|b| !b.is_ascii_whitespace());
    let end = data.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => data[start..=end]
            .iter()
            .map(|&b| if b == b'\n' { b' ' } else { b })
            .collect::<Vec<u8>>()
            .into(),
        _ => Bytes::new(),
    }
}

/// A client backed by a transport connection.
pub struct SocketClient {
    id: ClientId,
    attributes: Arc<Attributes>,
    request: Arc<RequestMeta>,
    handler: Arc<Handler>,
    outbound: OutboundBuffer,
    lifecycle: CancellationToken,
    /// Taken by `run`.
    parts: Mutex<Option<(Box<dyn Connection>, mpsc::Receiver<Bytes>)>>,
}

impl SocketClient {
    /// Wrap an accepted connection.
    #[must_use]
    pub fn new(
        id: ClientId,
        connection: Box<dyn Connection>,
        attributes: Attributes,
        request: RequestMeta,
        handler: Arc<Handler>,
        lifecycle: CancellationToken,
        outbound_capacity: usize,
    ) -> Self {
        let (outbound, receiver) = OutboundBuffer::new(outbound_capacity);
        Self {
            id,
            attributes: Arc::new(attributes),
            request: Arc::new(request),
            handler,
            outbound,
            lifecycle,
            parts: Mutex::new(Some((connection, receiver))),
        }
    }

    fn report_error(&self, hub: &Hub, error: TransportError) {
        metrics::record_error(error_type(&error));
        match &self.handler.on_error {
            Some(on_error) => on_error(&self.context(hub), &error),
            None => warn!(client = %self.id, error = %error, "Connection error"),
        }
    }

    async fn read_pump(self: Arc<Self>, hub: Hub, mut reader: Box<dyn FrameReader>) {
        let config = hub.config();
        let pong_wait = config.pong_wait();
        let max_message_size = config.max_message_size;
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let result = tokio::select! {
                () = self.lifecycle.cancelled() => break,
                result = time::timeout_at(deadline, reader.recv()) => result,
            };

            let frame = match result {
                Err(_) => {
                    self.report_error(&hub, TransportError::Timeout);
                    break;
                }
                Ok(Err(e)) => {
                    self.report_error(&hub, e);
                    break;
                }
                Ok(Ok(None)) => {
                    debug!(client = %self.id, "Stream ended");
                    break;
                }
                Ok(Ok(Some(frame))) => frame,
            };

            let data = match frame {
                Frame::Text(data) | Frame::Binary(data) => data,
                Frame::Pong(_) => {
                    deadline = Instant::now() + pong_wait;
                    continue;
                }
                Frame::Ping(_) => continue,
                Frame::Close(code) => {
                    if is_expected_close(code) {
                        debug!(client = %self.id, code = ?code, "Peer closed");
                    } else if let Some(code) = code {
                        self.report_error(&hub, TransportError::UnexpectedClose(code));
                    }
                    break;
                }
            };

            if data.len() > max_message_size {
                self.report_error(
                    &hub,
                    TransportError::MessageTooLarge {
                        size: data.len(),
                        max: max_message_size,
                    },
                );
                break;
            }
            metrics::record_message(data.len(), "inbound");

            let payload = normalize_payload(&data);
            if payload.as_ref() == PING {
                if let Err(e) = self.outbound.try_push(Bytes::from_static(PONG)) {
                    debug!(client = %self.id, error = %e, "Could not queue PONG");
                }
                continue;
            }

            let envelope = Envelope::new(self.id.clone(), payload);
            trace!(client = %self.id, size = envelope.payload.len(), "Forwarding envelope");
            tokio::select! {
                () = self.lifecycle.cancelled() => break,
                sent = hub.inbound_sender().send(envelope) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        drop(reader);
        hub.unregister(self.id.clone());
        debug!(client = %self.id, "Inbound pump stopped");
    }

    async fn write_pump(
        self: Arc<Self>,
        hub: Hub,
        mut writer: Box<dyn FrameWriter>,
        mut outbound: mpsc::Receiver<Bytes>,
    ) {
        let config = hub.config();
        let write_wait = config.write_wait();
        let ping_period = config.ping_period();
        let kind = config.message_kind;

        let mut heartbeat = time::interval_at(Instant::now() + ping_period, ping_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                biased;
                message = outbound.recv() => match message {
                    Some(payload) => kind.frame(payload),
                    None => {
                        // The hub closed the buffer.
                        self.finish(writer.as_mut(), &mut outbound, kind, write_wait).await;
                        break;
                    }
                },
                _ = heartbeat.tick() => Frame::Ping(Bytes::new()),
                () = self.lifecycle.cancelled() => {
                    // A pending async delivery can keep the receiver open after teardown.
                    if self.outbound.is_closed() {
                        self.finish(writer.as_mut(), &mut outbound, kind, write_wait).await;
                    }
                    break;
                }
            };

            if let Err(e) = write_frame(writer.as_mut(), frame, write_wait).await {
                self.report_error(&hub, e);
                break;
            }
        }

        if let Err(e) = writer.close().await {
            trace!(client = %self.id, error = %e, "Close after shutdown");
        }
        hub.unregister(self.id.clone());
        debug!(client = %self.id, "Outbound pump stopped");
    }

    /// Flush what is already queued, then send the close frame.
    async fn finish(
        &self,
        writer: &mut dyn FrameWriter,
        outbound: &mut mpsc::Receiver<Bytes>,
        kind: MessageKind,
        write_wait: Duration,
    ) {
        while let Ok(payload) = outbound.try_recv() {
            if let Err(e) = write_frame(&mut *writer, kind.frame(payload), write_wait).await {
                debug!(client = %self.id, error = %e, "Could not flush outbound buffer");
                return;
            }
        }
        if let Err(e) = write_frame(writer, Frame::Close(None), write_wait).await {
            debug!(client = %self.id, error = %e, "Could not send close frame");
        }
    }
}

async fn write_frame(
    writer: &mut dyn FrameWriter,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), TransportError> {
    let size = frame.data().map(Bytes::len);
    time::timeout(write_wait, writer.send(frame))
        .await
        .map_err(|_| TransportError::Timeout)??;
    if let Some(size) = size {
        metrics::record_message(size, "outbound");
    }
    Ok(())
}

fn error_type(error: &TransportError) -> &'static str {
    match error {
        TransportError::Timeout => "timeout",
        TransportError::MessageTooLarge { .. } => "message_too_large",
        TransportError::UnexpectedClose(_) => "unexpected_close",
        TransportError::SendFailed(_) => "send",
        TransportError::ReceiveFailed(_) => "receive",
        _ => "transport",
    }
}

impl Client for SocketClient {
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

    fn run(self: Arc<Self>, hub: Hub) {
        let Some((connection, receiver)) = self.parts.lock().take() else {
            warn!(client = %self.id, "Client already running");
            return;
        };
        let (reader, writer) = connection.split();

        tokio::spawn(Arc::clone(&self).write_pump(hub.clone(), writer, receiver));
        tokio::spawn(self.read_pump(hub, reader));
    }
}
