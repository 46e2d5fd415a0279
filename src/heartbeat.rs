//! Heartbeat negotiation and the two liveness tasks.
//!
//! Active only when the negotiated protocol is 1.1+ and both sides agreed on
//! a non-zero interval for a direction. The sender task pushes a bare-LF
//! frame through the writer whenever the connection has been send-idle for a
//! full interval; the watchdog flags (and optionally aborts on) a receive
//! gap beyond twice the negotiated interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::codec::StompItem;
use crate::connection::WireRequest;

/// Receive gap tolerated before the watchdog flags a failure, as a multiple
/// of the negotiated receive interval.
const RECV_TOLERANCE: u32 = 2;

/// Parse a STOMP `heart-beat` header value ("cx,cy", both milliseconds).
/// Missing or unparseable fields default to 0 (direction disabled).
pub fn parse_heartbeat(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals from the client's `cx,cy` and the broker's
/// `sx,sy`.
///
/// Returns `(send, recv)`: `send` is how often this client must emit a beat
/// (`max(cx, sy)`), `recv` how often it should hear one (`max(cy, sx)`).
/// `None` means that direction is disabled, which happens whenever either
/// side advertises 0.
pub fn negotiate_heartbeats(
    client_send: u64,
    client_recv: u64,
    server_send: u64,
    server_recv: u64,
) -> (Option<Duration>, Option<Duration>) {
    let send = if client_send == 0 || server_recv == 0 {
        None
    } else {
        Some(Duration::from_millis(client_send.max(server_recv)))
    };
    let recv = if client_recv == 0 || server_send == 0 {
        None
    } else {
        Some(Duration::from_millis(client_recv.max(server_send)))
    };
    (send, recv)
}

/// Shared heartbeat clock and failure flags.
///
/// `last_send`/`last_recv` are epoch milliseconds updated by the writer and
/// reader tasks; the failure flags are possibly-transient and readable by
/// the application through the connection.
#[derive(Debug)]
pub(crate) struct HeartbeatState {
    last_send: AtomicU64,
    last_recv: AtomicU64,
    pub(crate) send_fail: AtomicBool,
    pub(crate) recv_fail: AtomicBool,
}

impl HeartbeatState {
    pub(crate) fn new() -> Self {
        let now = now_millis();
        Self {
            last_send: AtomicU64::new(now),
            last_recv: AtomicU64::new(now),
            send_fail: AtomicBool::new(false),
            recv_fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn touch_send(&self) {
        self.last_send.store(now_millis(), Ordering::SeqCst);
    }

    pub(crate) fn touch_recv(&self) {
        self.last_recv.store(now_millis(), Ordering::SeqCst);
    }

    fn millis_since_send(&self) -> u64 {
        now_millis().saturating_sub(self.last_send.load(Ordering::SeqCst))
    }

    fn millis_since_recv(&self) -> u64 {
        now_millis().saturating_sub(self.last_recv.load(Ordering::SeqCst))
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sender task: one beat whenever the connection has been send-idle for a
/// full interval. A failed or timed-out beat sets the send-failure flag but
/// does not stop the task; only connection teardown does.
pub(crate) async fn run_sender(
    interval: Duration,
    state: Arc<HeartbeatState>,
    outbound: mpsc::Sender<WireRequest>,
    abort: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::debug!(interval_ms = interval.as_millis() as u64, "heartbeat sender started");
    loop {
        tokio::select! {
            _ = abort.cancelled() => break,
            _ = tick.tick() => {
                if state.millis_since_send() < interval.as_millis() as u64 {
                    continue;
                }
                let (reply_tx, reply_rx) = oneshot::channel();
                let req = WireRequest {
                    item: StompItem::Heartbeat,
                    reply: reply_tx,
                };
                if outbound.send(req).await.is_err() {
                    break;
                }
                match reply_rx.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "heartbeat send failed");
                        state.send_fail.store(true, Ordering::SeqCst);
                    }
                    Err(_) => break,
                }
            }
        }
    }
    tracing::debug!("heartbeat sender stopped");
}

/// Watchdog task: flags a receive gap beyond `interval * 2`. Terminal only
/// when the caller's policy says so; by default the flag is left for the
/// application to observe.
pub(crate) async fn run_watchdog(
    interval: Duration,
    state: Arc<HeartbeatState>,
    fatal: bool,
    abort: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::debug!(interval_ms = interval.as_millis() as u64, "heartbeat watchdog started");
    loop {
        tokio::select! {
            _ = abort.cancelled() => break,
            _ = tick.tick() => {
                let gap = state.millis_since_recv();
                if gap > interval.as_millis() as u64 * RECV_TOLERANCE as u64 {
                    tracing::warn!(gap_ms = gap, "heartbeat receive overdue");
                    state.recv_fail.store(true, Ordering::SeqCst);
                    if fatal {
                        abort.cancel();
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("heartbeat watchdog stopped");
}
