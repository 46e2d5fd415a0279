use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::{StompCodec, StompItem};
use crate::error::{Error, Result};
use crate::frame::{self, Frame, MessageData, Protocol};
use crate::headers::{
    HDR_ACCEPT_VERSION, HDR_ACK, HDR_DESTINATION, HDR_HEART_BEAT, HDR_HOST, HDR_ID,
    HDR_MESSAGE_ID, HDR_RECEIPT, HDR_RECEIPT_ID, HDR_SESSION, HDR_SUBSCRIPTION, HDR_TRANSACTION,
    HDR_VERSION, Headers,
};
use crate::heartbeat::{self, HeartbeatState, negotiate_heartbeats, parse_heartbeat};
use crate::subscription::{Registry, Subscription};
use crate::transport::DeadlineConfig;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

/// One outbound work item for the writer task: the frame to put on the wire
/// and a rendezvous for the per-frame write result.
pub(crate) struct WireRequest {
    pub(crate) item: StompItem,
    pub(crate) reply: oneshot::Sender<Result<()>>,
}

/// Cumulative connection counters.
#[derive(Debug)]
pub(crate) struct Metrics {
    started: Instant,
    frames_read: AtomicU64,
    bytes_read: AtomicU64,
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            frames_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn record_write(&self, bytes: usize) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_read(&self, bytes: usize) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Point-in-time view of the connection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub started: Instant,
    pub frames_read: u64,
    pub bytes_read: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
}

/// Tunables for [`Connection::connect_with`].
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Capacity of each per-subscription sequence. The reader blocks when a
    /// sequence is full, pushing backpressure to the broker.
    pub subscription_capacity: usize,
    /// Capacity of the connection event sequence (broker ERROR frames,
    /// unmatched receipts, terminal read errors).
    pub event_capacity: usize,
    /// Read/write deadlines and the expiry callback.
    pub deadlines: DeadlineConfig,
    /// Abort the connection when the heartbeat watchdog trips. Off by
    /// default; the failure flag alone is set.
    pub heartbeat_recv_fatal: bool,
    /// Open with `STOMP` instead of `CONNECT` (1.1+ brokers).
    pub use_stomp_command: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            subscription_capacity: 16,
            event_capacity: 32,
            deadlines: DeadlineConfig::default(),
            heartbeat_recv_fatal: false,
            use_stomp_command: false,
        }
    }
}

impl ConnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_deadlines(mut self, deadlines: DeadlineConfig) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn with_heartbeat_recv_fatal(mut self, fatal: bool) -> Self {
        self.heartbeat_recv_fatal = fatal;
        self
    }

    pub fn with_stomp_command(mut self, use_stomp: bool) -> Self {
        self.use_stomp_command = use_stomp;
        self
    }
}

/// State shared between the connection handle and its background tasks.
struct Shared {
    registry: Registry,
    receipts: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    connected: AtomicBool,
    state: std::sync::Mutex<ConnectionState>,
    abort: CancellationToken,
    hb: Arc<HeartbeatState>,
    metrics: Metrics,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("registry", &self.registry)
            .field("connected", &self.connected)
            .field("state", &self.state)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            receipts: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            state: std::sync::Mutex::new(ConnectionState::Idle),
            abort: CancellationToken::new(),
            hb: Arc::new(HeartbeatState::new()),
            metrics: Metrics::new(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// System abort: the one idempotent teardown path. Cancels the abort
    /// token every task selects on, closes all subscription sequences with a
    /// terminal error, and drops pending receipt rendezvous so their waiters
    /// unblock.
    async fn system_abort(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Closed);
        self.abort.cancel();
        self.registry.close_all(Error::NotConnected).await;
        self.receipts.lock().await.clear();
    }
}

/// A STOMP session over one transport.
///
/// Created by [`Connection::connect`], which performs the CONNECT handshake
/// synchronously on the caller's task and only then starts the background
/// machinery: a writer task owning the outbound half, a reader task owning
/// the inbound half, and (when negotiated) the two heartbeat tasks. The
/// handle is cheap to clone; all clones drive the same session.
#[derive(Clone, Debug)]
pub struct Connection {
    outbound: mpsc::Sender<WireRequest>,
    events: Arc<Mutex<mpsc::Receiver<MessageData>>>,
    shared: Arc<Shared>,
    protocol: Protocol,
    session: Option<String>,
    connect_response: Frame,
    disconnect_receipt: Arc<Mutex<Option<MessageData>>>,
    config: ConnectConfig,
}

impl Connection {
    /// Connect over an already-opened bidirectional byte stream with default
    /// configuration. See [`Connection::connect_with`].
    pub async fn connect<S>(stream: S, headers: Headers) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::connect_with(stream, headers, ConnectConfig::default()).await
    }

    /// Perform the STOMP handshake and start the session.
    ///
    /// `headers` travel on the CONNECT frame with their values unescaped
    /// (handshake headers never are): `accept-version`, `host`, `login`,
    /// `passcode`, `heart-beat` and any broker-specific extras. Validation failures are
    /// returned before anything is written. A broker ERROR reply is returned
    /// as [`Error::BrokerConnect`] with the full response preserved.
    pub async fn connect_with<S>(
        stream: S,
        headers: Headers,
        config: ConnectConfig,
    ) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        headers.validate(Protocol::V10)?;
        if headers.contains(HDR_RECEIPT) {
            return Err(Error::ReceiptNotAllowed);
        }
        let accept = accept_versions(&headers)?;
        let wants_11_plus = accept
            .as_ref()
            .is_some_and(|list| list.iter().any(|p| *p >= Protocol::V11));
        if wants_11_plus && !headers.contains(HDR_HOST) {
            return Err(Error::HostRequired);
        }

        let shared = Arc::new(Shared::new());
        shared.set_state(ConnectionState::Connecting);

        let command = if config.use_stomp_command {
            frame::STOMP
        } else {
            frame::CONNECT
        };
        let connect_frame = Frame::new(command).with_headers(headers.clone());

        let mut framed = Framed::new(stream, StompCodec::new());
        framed.send(StompItem::Frame(connect_frame)).await?;
        tracing::debug!(command, "handshake frame sent");

        let response = loop {
            match framed.next().await {
                Some(Ok(StompItem::Heartbeat)) => continue,
                Some(Ok(StompItem::Frame(f))) => break f,
                Some(Err(e)) => {
                    shared.set_state(ConnectionState::Closed);
                    return Err(e);
                }
                None => {
                    shared.set_state(ConnectionState::Closed);
                    return Err(Error::Io("connection closed during CONNECT".into()));
                }
            }
        };

        match response.command.as_str() {
            frame::CONNECTED => {}
            frame::ERROR => {
                shared.set_state(ConnectionState::Closed);
                return Err(Error::BrokerConnect(response));
            }
            _ => {
                shared.set_state(ConnectionState::Closed);
                return Err(Error::UnknownFrame);
            }
        }

        let protocol = match response.get_header(HDR_VERSION) {
            None => Protocol::V10,
            Some(v) => Protocol::parse(v).ok_or(Error::UnsupportedVersionServer)?,
        };
        let acceptable = match &accept {
            Some(list) => list.contains(&protocol),
            None => protocol == Protocol::V10,
        };
        if !acceptable {
            shared.set_state(ConnectionState::Closed);
            return Err(Error::UnsupportedVersionServer);
        }

        let session = response.get_header(HDR_SESSION).map(str::to_string);
        let (cx, cy) = parse_heartbeat(headers.value(HDR_HEART_BEAT).unwrap_or("0,0"));
        let (sx, sy) = parse_heartbeat(response.get_header(HDR_HEART_BEAT).unwrap_or("0,0"));
        let (send_iv, recv_iv) = if protocol >= Protocol::V11 {
            negotiate_heartbeats(cx, cy, sx, sy)
        } else {
            (None, None)
        };

        framed.codec_mut().set_protocol(protocol);
        let (sink, source) = framed.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<WireRequest>(32);
        let (event_tx, event_rx) = mpsc::channel::<MessageData>(config.event_capacity);

        shared.connected.store(true, Ordering::SeqCst);
        shared.set_state(ConnectionState::Connected);
        tracing::debug!(
            protocol = %protocol,
            session = session.as_deref().unwrap_or(""),
            "connected"
        );

        tokio::spawn(writer_task(
            sink,
            outbound_rx,
            shared.clone(),
            config.deadlines.clone(),
        ));
        tokio::spawn(reader_task(
            source,
            protocol,
            event_tx,
            shared.clone(),
            config.deadlines.clone(),
            recv_iv.is_some(),
        ));
        if let Some(iv) = send_iv {
            tokio::spawn(heartbeat::run_sender(
                iv,
                shared.hb.clone(),
                outbound_tx.clone(),
                shared.abort.clone(),
            ));
        }
        if let Some(iv) = recv_iv {
            tokio::spawn(heartbeat::run_watchdog(
                iv,
                shared.hb.clone(),
                config.heartbeat_recv_fatal,
                shared.abort.clone(),
            ));
        }

        Ok(Connection {
            outbound: outbound_tx,
            events: Arc::new(Mutex::new(event_rx)),
            shared,
            protocol,
            session,
            connect_response: response,
            disconnect_receipt: Arc::new(Mutex::new(None)),
            config,
        })
    }

    /// Negotiated protocol level.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Broker-assigned session id from the CONNECTED frame, if any.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// The broker's CONNECTED response frame.
    pub fn connect_response(&self) -> &Frame {
        &self.connect_response
    }

    /// The receipt collected by a `disconnect` that requested one.
    pub async fn disconnect_receipt(&self) -> Option<MessageData> {
        self.disconnect_receipt.lock().await.clone()
    }

    /// True after a heartbeat send failed; possibly transient.
    pub fn heartbeat_send_failed(&self) -> bool {
        self.shared.hb.send_fail.load(Ordering::SeqCst)
    }

    /// True after the heartbeat watchdog saw a receive gap; possibly
    /// transient unless configured fatal.
    pub fn heartbeat_recv_failed(&self) -> bool {
        self.shared.hb.recv_fail.load(Ordering::SeqCst)
    }

    /// Connection counters. Handshake frames are not counted.
    pub fn metrics(&self) -> MetricsSnapshot {
        let m = &self.shared.metrics;
        MetricsSnapshot {
            started: m.started,
            frames_read: m.frames_read.load(Ordering::Relaxed),
            bytes_read: m.bytes_read.load(Ordering::Relaxed),
            frames_written: m.frames_written.load(Ordering::Relaxed),
            bytes_written: m.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// Next item from the connection event sequence: broker ERROR frames,
    /// unmatched receipts, frames with no matching subscription, terminal
    /// read errors. `None` once the sequence is closed.
    pub async fn next_event(&self) -> Option<MessageData> {
        let mut rx = self.events.lock().await;
        rx.recv().await
    }

    /// SEND a message body to `destination`.
    pub async fn send(&self, headers: Headers, body: impl Into<Vec<u8>>) -> Result<()> {
        self.ensure_connected()?;
        if !headers.contains(HDR_DESTINATION) {
            return Err(Error::DestinationRequiredSend);
        }
        self.transmit(Frame::new(frame::SEND).with_headers(headers).body(body))
            .await
            .map(|_| ())
    }

    /// SUBSCRIBE to a destination and return the per-subscription sequence.
    ///
    /// When the caller supplies no `id` header the library generates one
    /// from a connection-local counter. `ack` defaults to `auto`. Under
    /// protocol 1.0, where MESSAGE frames carry no `subscription` header,
    /// inbound routing falls back to the destination.
    pub async fn subscribe(&self, headers: Headers) -> Result<Subscription> {
        self.ensure_connected()?;
        let destination = headers
            .value(HDR_DESTINATION)
            .ok_or(Error::DestinationRequiredSubscribe)?
            .to_string();

        let mut headers = headers;
        let id = match headers.value(HDR_ID) {
            Some(id) => id.to_string(),
            None => {
                let id = self.shared.registry.generate_id();
                headers.push(HDR_ID, id.clone());
                id
            }
        };
        if !headers.contains(HDR_ACK) {
            headers.push(HDR_ACK, "auto");
        }

        let key = if self.protocol == Protocol::V10 {
            destination.clone()
        } else {
            id.clone()
        };
        let receiver = self
            .shared
            .registry
            .register(&key, self.config.subscription_capacity)
            .await?;

        if let Err(e) = self
            .transmit(Frame::new(frame::SUBSCRIBE).with_headers(headers))
            .await
        {
            let _ = self.shared.registry.unregister(&key).await;
            return Err(e);
        }
        Ok(Subscription::new(id, destination, receiver))
    }

    /// UNSUBSCRIBE and close the local sequence. 1.1+ requires `id`; 1.0
    /// accepts `destination` (the routing key) or `id`.
    pub async fn unsubscribe(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        let key = if self.protocol == Protocol::V10 {
            headers
                .value(HDR_DESTINATION)
                .or_else(|| headers.value(HDR_ID))
                .ok_or(Error::DestinationOrIdRequiredUnsubscribe)?
                .to_string()
        } else {
            headers
                .value(HDR_ID)
                .ok_or(Error::IdRequiredUnsubscribe)?
                .to_string()
        };
        self.shared.registry.unregister(&key).await?;
        self.transmit(Frame::new(frame::UNSUBSCRIBE).with_headers(headers))
            .await
            .map(|_| ())
    }

    /// ACK a received message. Required headers depend on the protocol:
    /// `message-id` (1.0), `subscription` + `message-id` (1.1), `id` (1.2).
    pub async fn ack(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        match self.protocol {
            Protocol::V10 => {
                if !headers.contains(HDR_MESSAGE_ID) {
                    return Err(Error::MessageIdRequiredAck);
                }
            }
            Protocol::V11 => {
                if !headers.contains(HDR_SUBSCRIPTION) {
                    return Err(Error::SubscriptionRequiredAck);
                }
                if !headers.contains(HDR_MESSAGE_ID) {
                    return Err(Error::MessageIdRequiredAck);
                }
            }
            Protocol::V12 => {
                if !headers.contains(HDR_ID) {
                    return Err(Error::IdRequiredAck);
                }
            }
        }
        self.transmit(Frame::new(frame::ACK).with_headers(headers))
            .await
            .map(|_| ())
    }

    /// NACK a received message. Invalid under protocol 1.0; header
    /// requirements otherwise mirror [`Connection::ack`].
    pub async fn nack(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        match self.protocol {
            Protocol::V10 => return Err(Error::NackUnsupported),
            Protocol::V11 => {
                if !headers.contains(HDR_SUBSCRIPTION) {
                    return Err(Error::SubscriptionRequiredNack);
                }
                if !headers.contains(HDR_MESSAGE_ID) {
                    return Err(Error::MessageIdRequiredNack);
                }
            }
            Protocol::V12 => {
                if !headers.contains(HDR_ID) {
                    return Err(Error::IdRequiredNack);
                }
            }
        }
        self.transmit(Frame::new(frame::NACK).with_headers(headers))
            .await
            .map(|_| ())
    }

    /// BEGIN a transaction named by the `transaction` header.
    pub async fn begin(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        if !headers.contains(HDR_TRANSACTION) {
            return Err(Error::TransactionRequiredBegin);
        }
        self.transmit(Frame::new(frame::BEGIN).with_headers(headers))
            .await
            .map(|_| ())
    }

    /// COMMIT a transaction.
    pub async fn commit(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        if !headers.contains(HDR_TRANSACTION) {
            return Err(Error::TransactionRequiredCommit);
        }
        self.transmit(Frame::new(frame::COMMIT).with_headers(headers))
            .await
            .map(|_| ())
    }

    /// ABORT a transaction.
    pub async fn abort(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        if !headers.contains(HDR_TRANSACTION) {
            return Err(Error::TransactionRequiredAbort);
        }
        self.transmit(Frame::new(frame::ABORT).with_headers(headers))
            .await
            .map(|_| ())
    }

    /// Orderly shutdown: send DISCONNECT, collect the receipt when one was
    /// requested (stored for [`Connection::disconnect_receipt`]), then tear
    /// everything down. After return every subscription sequence is closed
    /// and all tasks have exited or been signaled to.
    pub async fn disconnect(&self, headers: Headers) -> Result<()> {
        self.ensure_connected()?;
        headers.validate(self.protocol)?;
        self.shared.set_state(ConnectionState::Disconnecting);
        let result = self
            .transmit(Frame::new(frame::DISCONNECT).with_headers(headers))
            .await;
        match result {
            Ok(Some(receipt)) => {
                *self.disconnect_receipt.lock().await = Some(MessageData::frame(receipt));
            }
            Ok(None) => {}
            Err(e) => {
                self.shared.system_abort().await;
                return Err(e);
            }
        }
        self.shared.system_abort().await;
        Ok(())
    }

    /// Hard teardown without the DISCONNECT exchange.
    pub async fn close(&self) {
        self.shared.system_abort().await;
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Enqueue a frame on the writer and wait for its write result. When
    /// the frame carries a `receipt` header, a rendezvous is registered
    /// before the frame is enqueued, and the matching RECEIPT frame is
    /// awaited and returned after the write is acknowledged.
    async fn transmit(&self, frame: Frame) -> Result<Option<Frame>> {
        frame.headers.validate(self.protocol)?;

        let receipt_id = frame.get_header(HDR_RECEIPT).map(str::to_string);
        let receipt_rx = match &receipt_id {
            Some(id) => {
                let (tx, rx) = oneshot::channel();
                self.shared.receipts.lock().await.insert(id.clone(), tx);
                Some(rx)
            }
            None => None,
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WireRequest {
            item: StompItem::Frame(frame),
            reply: reply_tx,
        };
        if self.outbound.send(request).await.is_err() {
            self.forget_receipt(&receipt_id).await;
            return Err(Error::NotConnected);
        }
        match reply_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.forget_receipt(&receipt_id).await;
                return Err(e);
            }
            Err(_) => {
                self.forget_receipt(&receipt_id).await;
                return Err(Error::NotConnected);
            }
        }

        match receipt_rx {
            None => Ok(None),
            Some(rx) => tokio::select! {
                _ = self.shared.abort.cancelled() => {
                    self.forget_receipt(&receipt_id).await;
                    Err(Error::NotConnected)
                }
                res = rx => match res {
                    Ok(receipt) => Ok(Some(receipt)),
                    Err(_) => Err(Error::NotConnected),
                },
            },
        }
    }

    async fn forget_receipt(&self, receipt_id: &Option<String>) {
        if let Some(id) = receipt_id {
            self.shared.receipts.lock().await.remove(id);
        }
    }
}

fn accept_versions(headers: &Headers) -> Result<Option<Vec<Protocol>>> {
    let Some(raw) = headers.value(HDR_ACCEPT_VERSION) else {
        return Ok(None);
    };
    let mut list = Vec::new();
    for part in raw.split(',') {
        match Protocol::parse(part) {
            Some(p) => list.push(p),
            None => return Err(Error::UnsupportedVersionClient),
        }
    }
    if list.is_empty() {
        return Err(Error::UnsupportedVersionClient);
    }
    Ok(Some(list))
}

/// Writer task: drains the outbound channel onto the wire, one frame at a
/// time, acknowledging each on its reply rendezvous. A failed write is
/// reported to the requester but does not stop the loop; the transport
/// fault will surface identically on the next item. Exits on DISCONNECT,
/// channel closure, or system abort.
async fn writer_task<S>(
    mut sink: SplitSink<Framed<S, StompCodec>, StompItem>,
    mut outbound: mpsc::Receiver<WireRequest>,
    shared: Arc<Shared>,
    deadlines: DeadlineConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tracing::debug!("writer started");
    let mut disconnect_sent = false;
    loop {
        let request = tokio::select! {
            _ = shared.abort.cancelled() => break,
            req = outbound.recv() => match req {
                Some(r) => r,
                None => break,
            },
        };
        let WireRequest { item, reply } = request;
        let is_disconnect =
            matches!(&item, StompItem::Frame(f) if f.command == frame::DISCONNECT);
        let size = match &item {
            StompItem::Frame(f) => f.size(),
            StompItem::Heartbeat => 1,
        };

        let result = match deadlines.write {
            Some(limit) => match tokio::time::timeout(limit, sink.send(item)).await {
                Ok(r) => r,
                Err(_) => {
                    let e = Error::DeadlineExpired("write".into());
                    deadlines.notify(&e, true);
                    Err(e)
                }
            },
            None => sink.send(item).await,
        };

        match result {
            Ok(()) => {
                shared.hb.touch_send();
                shared.metrics.record_write(size);
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame write failed");
                let _ = reply.send(Err(e));
            }
        }
        if is_disconnect {
            disconnect_sent = true;
            break;
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    if disconnect_sent {
        // Orderly teardown: disconnect() still has to collect the receipt,
        // so the abort is left to it.
        tracing::debug!("writer stopped after DISCONNECT");
    } else {
        tracing::debug!("writer stopped, aborting connection");
        shared.system_abort().await;
    }
}

enum ReadOutcome {
    Heartbeat,
    Frame(Frame),
    Timeout,
    Failed(Error),
    Eof,
}

async fn next_inbound<S>(
    source: &mut SplitStream<Framed<S, StompCodec>>,
    deadlines: &DeadlineConfig,
) -> ReadOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let item = match deadlines.read {
        Some(limit) => match tokio::time::timeout(limit, source.next()).await {
            Ok(item) => item,
            Err(_) => return ReadOutcome::Timeout,
        },
        None => source.next().await,
    };
    match item {
        Some(Ok(StompItem::Heartbeat)) => ReadOutcome::Heartbeat,
        Some(Ok(StompItem::Frame(f))) => ReadOutcome::Frame(f),
        Some(Err(e)) => ReadOutcome::Failed(e),
        None => ReadOutcome::Eof,
    }
}

/// Reader task: parses inbound frames and demultiplexes them. MESSAGE goes
/// to its subscription sequence (blocking when full), RECEIPT to the
/// rendezvous registered for its `receipt-id`, broker ERROR to the event
/// sequence before terminating. Every exit path ends in system abort.
async fn reader_task<S>(
    mut source: SplitStream<Framed<S, StompCodec>>,
    protocol: Protocol,
    events: mpsc::Sender<MessageData>,
    shared: Arc<Shared>,
    deadlines: DeadlineConfig,
    hb_recv_enabled: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tracing::debug!("reader started");
    loop {
        let outcome = tokio::select! {
            _ = shared.abort.cancelled() => break,
            outcome = next_inbound(&mut source, &deadlines) => outcome,
        };
        match outcome {
            ReadOutcome::Heartbeat => {
                shared.hb.touch_recv();
            }
            ReadOutcome::Frame(f) => {
                shared.hb.touch_recv();
                shared.metrics.record_read(f.size());
                match f.command.as_str() {
                    frame::MESSAGE => {
                        dispatch_message(f, protocol, &shared, &events).await;
                    }
                    frame::RECEIPT => {
                        dispatch_receipt(f, &shared, &events).await;
                    }
                    frame::ERROR => {
                        tracing::warn!("broker ERROR frame received");
                        deliver(&shared.abort, &events, MessageData::frame(f)).await;
                        break;
                    }
                    _ => {
                        // CONNECTED is only legal during the handshake, and
                        // client verbs never travel broker-to-client.
                        deliver(
                            &shared.abort,
                            &events,
                            MessageData::with_error(f, Error::UnknownFrame),
                        )
                        .await;
                    }
                }
            }
            ReadOutcome::Timeout => {
                let e = Error::DeadlineExpired("read".into());
                deadlines.notify(&e, true);
                if hb_recv_enabled {
                    shared.hb.recv_fail.store(true, Ordering::SeqCst);
                }
                deliver(&shared.abort, &events, MessageData::error(e)).await;
                break;
            }
            ReadOutcome::Failed(e) => {
                tracing::warn!(error = %e, "frame read failed");
                deliver(&shared.abort, &events, MessageData::error(e)).await;
                break;
            }
            ReadOutcome::Eof => {
                deliver(
                    &shared.abort,
                    &events,
                    MessageData::error(Error::Io("connection closed by broker".into())),
                )
                .await;
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    shared.system_abort().await;
    tracing::debug!("reader stopped");
}

/// Send onto a bounded sequence, racing the abort token. A saturated
/// channel blocks (backpressure on the broker) but can never wedge the
/// reader past a system abort.
async fn deliver(
    abort: &CancellationToken,
    tx: &mpsc::Sender<MessageData>,
    item: MessageData,
) {
    tokio::select! {
        _ = abort.cancelled() => {}
        res = tx.send(item) => {
            if res.is_err() {
                tracing::trace!("sequence receiver dropped, item discarded");
            }
        }
    }
}

async fn dispatch_message(
    f: Frame,
    protocol: Protocol,
    shared: &Shared,
    events: &mpsc::Sender<MessageData>,
) {
    let key = if protocol >= Protocol::V11 {
        f.get_header(HDR_SUBSCRIPTION)
    } else {
        f.get_header(HDR_DESTINATION)
    }
    .map(str::to_string);

    let Some(key) = key else {
        deliver(
            &shared.abort,
            events,
            MessageData::with_error(f, Error::InvalidSubscriptionId),
        )
        .await;
        return;
    };
    match shared.registry.sender(&key).await {
        Ok(tx) => {
            deliver(&shared.abort, &tx, MessageData::frame(f)).await;
        }
        Err(e) => {
            deliver(&shared.abort, events, MessageData::with_error(f, e)).await;
        }
    }
}

async fn dispatch_receipt(f: Frame, shared: &Shared, events: &mpsc::Sender<MessageData>) {
    let waiter = match f.get_header(HDR_RECEIPT_ID) {
        Some(id) => shared.receipts.lock().await.remove(id),
        None => None,
    };
    match waiter {
        Some(tx) => {
            let _ = tx.send(f);
        }
        None => {
            // Unsolicited or late receipt; keep it observable.
            deliver(&shared.abort, events, MessageData::frame(f)).await;
        }
    }
}
