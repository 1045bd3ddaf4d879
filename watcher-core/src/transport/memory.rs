//! In-process transport.
//!
//! Records every outbound frame and lets the caller inject inbound frames,
//! state changes and send failures. `connect` succeeds synchronously.
//! Injection waits for room in a full event channel the same way the
//! WebSocket transport does, on the injecting thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Transport, INBOUND_WAIT, STATE_HANDOFF};
use crate::error::{Result, WatcherError};
use crate::ipc::events::{ConnectionState, TransportEvent};

/// One frame handed to the transport for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Failure injected into subsequent sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    Timeout,
    Transport,
}

pub struct MemoryTransport {
    events: Sender<TransportEvent>,
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<SentFrame>>,
    failure: Mutex<Option<SendFailure>>,
    inbound_wait: Duration,
    inbound_dropped: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(events: Sender<TransportEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(ConnectionState::Disconnected),
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            inbound_wait: INBOUND_WAIT,
            inbound_dropped: AtomicUsize::new(0),
        }
    }

    /// Override how long injected data frames wait for a full channel.
    pub fn with_inbound_wait(mut self, wait: Duration) -> Self {
        self.inbound_wait = wait;
        self
    }

    /// Force a state transition and report it, as a network drop would.
    pub fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            self.emit(TransportEvent::State(next));
        }
    }

    pub fn inject_text(&self, text: &str) {
        self.emit(TransportEvent::Text(text.to_owned()));
    }

    pub fn inject_binary(&self, data: &[u8]) {
        self.emit(TransportEvent::Binary(data.to_vec()));
    }

    /// Make every following send fail with `failure` (`None` clears it).
    pub fn fail_sends(&self, failure: Option<SendFailure>) {
        *self.failure.lock() = failure;
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                SentFrame::Text(text) => Some(text.clone()),
                SentFrame::Binary(_) => None,
            })
            .collect()
    }

    pub fn sent_binary(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                SentFrame::Binary(data) => Some(data.clone()),
                SentFrame::Text(_) => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    fn emit(&self, event: TransportEvent) {
        let is_state = matches!(event, TransportEvent::State(_));
        let wait = if is_state {
            STATE_HANDOFF
        } else {
            self.inbound_wait
        };
        match self.events.send_timeout(event, wait) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) if is_state => {
                warn!("event channel full, state change not reported to a stopped owner")
            }
            Err(SendTimeoutError::Timeout(_)) => {
                let dropped = self.inbound_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "event channel full, inbound frame dropped");
            }
            Err(SendTimeoutError::Disconnected(_)) => debug!("transport event receiver gone"),
        }
    }

    fn record(&self, frame: SentFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(WatcherError::NotConnected);
        }
        match *self.failure.lock() {
            Some(SendFailure::Timeout) => return Err(WatcherError::SendTimeout),
            Some(SendFailure::Transport) => {
                return Err(WatcherError::Transport("injected send failure".into()))
            }
            None => {}
        }
        self.sent.lock().push(frame);
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    fn send_text(&self, text: &str, _timeout: Duration) -> Result<()> {
        self.record(SentFrame::Text(text.to_owned()))
    }

    fn send_binary(&self, data: &[u8], _timeout: Duration) -> Result<()> {
        self.record(SentFrame::Binary(data.to_vec()))
    }

    fn stop(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn inbound_dropped(&self) -> usize {
        self.inbound_dropped.load(Ordering::Relaxed)
    }
}
