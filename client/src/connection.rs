//! The reconnecting WebSocket transport: `Idle -> Connecting -> Connected -> Reconnecting ->
//! (Connected | Disconnected)`, geometric backoff with jitter, a heartbeat, and a
//! backpressure-bounded outbound queue that sheds cursor updates before anything else.
use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use lively_protocol::{ClientMessage, ServerMessage};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::Message;

const MIN_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(15);
const LOST_AFTER_FAILURES: u32 = 5;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const MAX_QUEUE_BYTES: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// Fired once after `LOST_AFTER_FAILURES` consecutive failed reconnect attempts. The retry
    /// loop keeps running regardless — this is a signal for the UI, not a terminal state.
    ConnectionLost,
}

struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self { current: MIN_BACKOFF }
    }

    fn reset(&mut self) {
        self.current = MIN_BACKOFF;
    }

    fn next_delay(&mut self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64((self.current.as_secs_f64() * factor).max(0.0));
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }
}

struct QueueEntry {
    msg: ClientMessage,
    bytes: usize,
}

/// Bounded at [`MAX_QUEUE_BYTES`]. A message that doesn't fit evicts the oldest droppable
/// (cursor) entries first; if it still doesn't fit and is itself droppable, it's silently
/// discarded; if it's not droppable, the push errors.
#[derive(Default)]
struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
    total_bytes: usize,
}

impl OutboundQueue {
    fn push(&mut self, msg: ClientMessage) -> Result<()> {
        let bytes = serde_json::to_vec(&msg).map(|v| v.len()).unwrap_or(0);
        while self.total_bytes + bytes > MAX_QUEUE_BYTES {
            match self.entries.iter().position(|e| e.msg.is_droppable()) {
                Some(idx) => {
                    let dropped = self.entries.remove(idx).expect("index just found");
                    self.total_bytes -= dropped.bytes;
                    tracing::debug!(dropped = dropped.msg.type_name(), "shedding queued message under backpressure");
                }
                None if msg.is_droppable() => return Ok(()),
                None => return Err(Error::QueueFull(msg.type_name())),
            }
        }
        self.total_bytes += bytes;
        self.entries.push_back(QueueEntry { msg, bytes });
        Ok(())
    }

    fn pop_front(&mut self) -> Option<ClientMessage> {
        let entry = self.entries.pop_front()?;
        self.total_bytes -= entry.bytes;
        Some(entry.msg)
    }
}

/// Owns the reconnect loop as a background task; dropping the last clone doesn't stop it — call
/// [`ConnectionManager::stop`] explicitly.
pub struct ConnectionManager {
    outbound: Arc<parking_lot::Mutex<OutboundQueue>>,
    notify_outbound: Arc<Notify>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    pub fn connect(
        url: String,
    ) -> (Self, mpsc::UnboundedReceiver<ServerMessage>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let outbound = Arc::new(parking_lot::Mutex::new(OutboundQueue::default()));
        let notify_outbound = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_loop(
            url,
            inbound_tx,
            events_tx,
            state_tx,
            outbound.clone(),
            notify_outbound.clone(),
            stop.clone(),
            stopped.clone(),
        ));

        (
            Self { outbound, notify_outbound, stop, stopped, state: state_rx },
            inbound_rx,
            events_rx,
        )
    }

    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound.lock().push(msg)?;
        self.notify_outbound.notify_one();
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Cooperative shutdown: the reconnect loop checks this at each retry boundary rather than
    /// being killed mid-write.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_waiters();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    url: String,
    inbound_tx: mpsc::UnboundedSender<ServerMessage>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Arc<parking_lot::Mutex<OutboundQueue>>,
    notify_outbound: Arc<Notify>,
    stop: Arc<Notify>,
    stopped: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::new();
    let mut consecutive_failures = 0u32;

    loop {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        set_state(&state_tx, &events_tx, ConnectionState::Connecting);
        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => {
                backoff.reset();
                consecutive_failures = 0;
                set_state(&state_tx, &events_tx, ConnectionState::Connected);
                run_connection(stream, &inbound_tx, &outbound, &notify_outbound, &stop).await;
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                set_state(&state_tx, &events_tx, ConnectionState::Reconnecting);
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "websocket connect failed");
                consecutive_failures += 1;
                set_state(&state_tx, &events_tx, ConnectionState::Reconnecting);
                if consecutive_failures == LOST_AFTER_FAILURES {
                    let _ = events_tx.send(ConnectionEvent::ConnectionLost);
                }
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.notified() => break,
        }
    }

    set_state(&state_tx, &events_tx, ConnectionState::Disconnected);
}

fn set_state(
    state_tx: &watch::Sender<ConnectionState>,
    events_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    state: ConnectionState,
) {
    let _ = state_tx.send(state);
    let _ = events_tx.send(ConnectionEvent::StateChanged(state));
}

async fn run_connection(
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    inbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    outbound: &Arc<parking_lot::Mutex<OutboundQueue>>,
    notify_outbound: &Arc<Notify>,
    stop: &Arc<Notify>,
) {
    let (mut write, mut read) = stream.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick is immediate; consume it so we don't heartbeat at t=0.

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => { let _ = inbound_tx.send(msg); }
                        Err(e) => tracing::warn!(error = %e, "dropping malformed server frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket read error");
                        return;
                    }
                    _ => {}
                }
            }
            _ = notify_outbound.notified() => {
                while let Some(msg) = outbound.lock().pop_front() {
                    let json = serde_json::to_string(&msg).expect("ClientMessage always serializes");
                    if write.send(Message::Text(json)).await.is_err() {
                        return;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let json = serde_json::to_string(&ClientMessage::Heartbeat).expect("heartbeat always serializes");
                if write.send(Message::Text(json)).await.is_err() {
                    return;
                }
            }
            _ = stop.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let mut backoff = Backoff::new();
        backoff.current = MAX_BACKOFF;
        let delay = backoff.next_delay();
        assert!(delay <= MAX_BACKOFF.mul_f64(1.5) + Duration::from_millis(1));
        assert_eq!(backoff.current, MAX_BACKOFF);
    }

    #[test]
    fn outbound_queue_sheds_droppable_entries_under_pressure() {
        let mut queue = OutboundQueue::default();
        let big_cursor = ClientMessage::CursorUpdate {
            mv: lively_protocol::CursorMove { x: 0.0, y: 0.0, viewport_pos: None, viewport_scale: None },
        };
        for _ in 0..10_000 {
            queue.push(big_cursor.clone()).unwrap();
        }
        assert!(queue.total_bytes <= MAX_QUEUE_BYTES);

        // force the queue near full with droppable traffic, then push a non-droppable message:
        // it must still be accepted by evicting cursor entries.
        let heartbeat = ClientMessage::Heartbeat;
        queue.push(heartbeat).unwrap();
    }
}
