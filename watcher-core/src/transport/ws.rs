//! WebSocket transport.
//!
//! ## Threading
//!
//! ```text
//! engine thread ── send_*() ──► mpsc<Outbound> ──► connection task (tokio) ──► socket
//!       ▲                                                 │
//!       └──── crossbeam<TransportEvent> ◄── frames/state ─┘
//! ```
//!
//! The connection task owns the socket and the reconnect loop. Blocking
//! callers wait on a per-frame crossbeam acknowledgement with
//! `recv_timeout`; a frame whose ack times out may still be written later.
//!
//! Every `connect` starts a new session generation and `stop` ends it. A
//! task from an ended generation can no longer change the state or deliver
//! events. While the event channel is full the task stops reading the
//! socket, so the server sees TCP backpressure rather than lost frames.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Transport, STATE_HANDOFF};
use crate::error::{Result, WatcherError};
use crate::ipc::events::{ConnectionState, TransportEvent};

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Outbound frames allowed to wait for the socket.
    pub queue_capacity: usize,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// How long an inbound data frame waits for a full event channel.
    pub inbound_wait: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".into(),
            queue_capacity: 64,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            inbound_wait: super::INBOUND_WAIT,
        }
    }
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Exponential reconnect delay, reset after every successful connect.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Outbound {
    message: WsMessage,
    ack: Sender<Result<()>>,
}

/// Poll interval while the event channel is full.
const DELIVERY_RETRY: Duration = Duration::from_millis(2);

struct LinkState {
    generation: u64,
    current: ConnectionState,
}

/// State shared between the transport handle and its connection tasks.
struct Shared {
    state: Mutex<LinkState>,
    events: Sender<TransportEvent>,
    inbound_dropped: AtomicUsize,
}

impl Shared {
    fn new(events: Sender<TransportEvent>) -> Self {
        Self {
            state: Mutex::new(LinkState {
                generation: 0,
                current: ConnectionState::Disconnected,
            }),
            events,
            inbound_dropped: AtomicUsize::new(0),
        }
    }

    fn current(&self) -> ConnectionState {
        self.state.lock().current
    }

    fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    /// Open a new generation; tasks of older ones go stale.
    fn begin_session(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.generation
    }

    /// Close the current generation and report `Disconnected` from the
    /// caller's thread.
    fn end_session(&self) {
        let changed = {
            let mut state = self.state.lock();
            state.generation += 1;
            let changed = state.current != ConnectionState::Disconnected;
            state.current = ConnectionState::Disconnected;
            changed
        };
        if !changed {
            return;
        }
        debug!(state = ?ConnectionState::Disconnected, "connection state");
        let event = TransportEvent::State(ConnectionState::Disconnected);
        match self.events.send_timeout(event, STATE_HANDOFF) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("event channel full, disconnect not reported to a stopped owner")
            }
            Err(SendTimeoutError::Disconnected(_)) => debug!("transport event receiver gone"),
        }
    }

    /// Record `next` for `generation`. Returns whether it changed anything.
    fn update(&self, generation: u64, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        let changed = state.current != next;
        state.current = next;
        changed
    }

    /// Hand one event to the owner. Gives it back when the channel is full.
    fn offer(&self, generation: u64, event: TransportEvent) -> Option<TransportEvent> {
        let state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        match self.events.try_send(event) {
            Ok(()) => None,
            Err(TrySendError::Full(event)) => Some(event),
            Err(TrySendError::Disconnected(_)) => {
                debug!("transport event receiver gone");
                None
            }
        }
    }
}

/// One connection task's view of the shared state.
struct Link {
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    inbound_wait: Duration,
}

impl Link {
    async fn set_state(&self, next: ConnectionState) {
        if self.shared.update(self.generation, next) {
            debug!(state = ?next, "connection state");
            self.deliver(TransportEvent::State(next)).await;
        }
    }

    /// Wait for room in the event channel. State changes wait until the
    /// session ends; data frames are dropped after `inbound_wait`.
    async fn deliver(&self, event: TransportEvent) {
        let deadline = match event {
            TransportEvent::State(_) => None,
            TransportEvent::Text(_) | TransportEvent::Binary(_) => {
                Some(tokio::time::Instant::now() + self.inbound_wait)
            }
        };
        let mut pending = event;
        loop {
            match self.shared.offer(self.generation, pending) {
                None => return,
                Some(event) => pending = event,
            }
            if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                let dropped = self.shared.inbound_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "event channel full, inbound frame dropped");
                return;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(DELIVERY_RETRY) => {}
            }
        }
    }
}

/// Running connection task handles, present between `connect` and `stop`.
struct Session {
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

pub struct WsTransport {
    config: WsConfig,
    runtime: Handle,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl WsTransport {
    /// `runtime` hosts the connection task; callers of the blocking send
    /// methods must not be running on one of its worker threads' async
    /// contexts.
    pub fn new(config: WsConfig, runtime: Handle, events: Sender<TransportEvent>) -> Self {
        Self {
            config,
            runtime,
            shared: Arc::new(Shared::new(events)),
            session: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn send(&self, message: WsMessage, timeout: Duration) -> Result<()> {
        if !self.shared.is_connected() {
            return Err(WatcherError::NotConnected);
        }
        let outbound = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.outbound.clone())
            .ok_or(WatcherError::NotConnected)?;

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        outbound
            .try_send(Outbound {
                message,
                ack: ack_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => WatcherError::SendTimeout,
                mpsc::error::TrySendError::Closed(_) => WatcherError::NotConnected,
            })?;

        match ack_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(WatcherError::SendTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(WatcherError::NotConnected),
        }
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }
        if self.config.queue_capacity == 0 {
            return Err(WatcherError::Config(
                "transport queue capacity must be > 0".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let cancel = CancellationToken::new();
        let backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);
        let link = Link {
            shared: Arc::clone(&self.shared),
            generation: self.shared.begin_session(),
            cancel: cancel.clone(),
            inbound_wait: self.config.inbound_wait,
        };

        info!(
            url = %self.config.url,
            generation = link.generation,
            "starting WebSocket transport"
        );
        self.runtime
            .spawn(run_connection(self.config.url.clone(), link, rx, backoff));

        *session = Some(Session {
            outbound: tx,
            cancel,
        });
        Ok(())
    }

    fn send_text(&self, text: &str, timeout: Duration) -> Result<()> {
        self.send(WsMessage::Text(text.to_owned()), timeout)
    }

    fn send_binary(&self, data: &[u8], timeout: Duration) -> Result<()> {
        self.send(WsMessage::Binary(data.to_vec()), timeout)
    }

    fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            info!("stopping WebSocket transport");
            session.cancel.cancel();
        }
        self.shared.end_session();
    }

    fn state(&self) -> ConnectionState {
        self.shared.current()
    }

    fn inbound_dropped(&self) -> usize {
        self.shared.inbound_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PumpEnd {
    /// Socket closed or failed; reconnect.
    Dropped,
    /// Transport stopped; leave the task.
    Cancelled,
}

async fn run_connection(
    url: String,
    link: Link,
    mut outbound: mpsc::Receiver<Outbound>,
    mut backoff: Backoff,
) {
    let cancel = link.cancel.clone();
    while !cancel.is_cancelled() {
        link.set_state(ConnectionState::Connecting).await;

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((stream, _)) => {
                info!(url = %url, "WebSocket connected");
                backoff.reset();
                link.set_state(ConnectionState::Connected).await;

                let end = pump(stream, &link, &mut outbound).await;
                link.set_state(ConnectionState::Disconnected).await;
                reject_pending(&mut outbound);
                if end == PumpEnd::Cancelled {
                    break;
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "WebSocket connect failed");
                link.set_state(ConnectionState::Error).await;
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    link.set_state(ConnectionState::Disconnected).await;
    reject_pending(&mut outbound);
    info!(generation = link.generation, "WebSocket transport stopped");
}

async fn pump(stream: WsStream, link: &Link, outbound: &mut mpsc::Receiver<Outbound>) -> PumpEnd {
    let (mut ws_write, mut ws_read) = stream.split();

    loop {
        tokio::select! {
            _ = link.cancel.cancelled() => {
                let _ = ws_write.close().await;
                return PumpEnd::Cancelled;
            }
            next = outbound.recv() => {
                let Some(Outbound { message, ack }) = next else {
                    let _ = ws_write.close().await;
                    return PumpEnd::Cancelled;
                };
                let result = ws_write
                    .send(message)
                    .await
                    .map_err(|e| WatcherError::Transport(e.to_string()));
                let failed = result.is_err();
                let _ = ack.try_send(result);
                if failed {
                    warn!("WebSocket write failed");
                    return PumpEnd::Dropped;
                }
            }
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => link.deliver(TransportEvent::Text(text)).await,
                    Some(Ok(WsMessage::Binary(data))) => link.deliver(TransportEvent::Binary(data)).await,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "WebSocket closed by server");
                        return PumpEnd::Dropped;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return PumpEnd::Dropped;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return PumpEnd::Dropped;
                    }
                    _ => {} // Pong, Frame
                }
            }
        }
    }
}

/// Fail every queued frame so blocked senders return immediately.
fn reject_pending(outbound: &mut mpsc::Receiver<Outbound>) {
    while let Ok(Outbound { ack, .. }) = outbound.try_recv() {
        let _ = ack.try_send(Err(WatcherError::NotConnected));
    }
}
