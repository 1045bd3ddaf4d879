//! Duplex transport abstraction.
//!
//! A transport owns exactly one logical connection. Inbound frames and state
//! changes are pushed to the owner as [`TransportEvent`]s over the
//! `crossbeam_channel::Sender` handed in at construction, in arrival order.
//! When that channel is full the transport waits: state changes are never
//! dropped, data frames are dropped only after [`INBOUND_WAIT`] and counted.
//! Outbound sends are blocking with a caller-supplied timeout so the engine
//! thread never waits indefinitely on the network.
//!
//! | impl | use |
//! |------|-----|
//! | [`ws::WsTransport`] | WebSocket client with reconnect backoff |
//! | [`memory::MemoryTransport`] | in-process loopback for tests and demos |
//!
//! [`TransportEvent`]: crate::ipc::events::TransportEvent

pub mod memory;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::ipc::events::ConnectionState;

pub use memory::{MemoryTransport, SendFailure, SentFrame};
pub use ws::{WsConfig, WsTransport};

/// How long an inbound data frame may wait for room in a full event channel.
pub const INBOUND_WAIT: Duration = Duration::from_secs(5);

/// How long a state change reported from a caller's thread (`stop`) waits
/// for room before it is given up. The engine resets its connection view on
/// every start, so only a stopped engine can miss it.
pub const STATE_HANDOFF: Duration = Duration::from_millis(250);

/// Contract every transport implementation fulfils.
///
/// Implementations must be safe to call from any thread; `stop` must be
/// idempotent.
pub trait Transport: Send + Sync + 'static {
    /// Begin connection establishment. Returns once the attempt is under way;
    /// the outcome arrives as `TransportEvent::State`.
    fn connect(&self) -> Result<()>;

    /// Send one text frame.
    ///
    /// # Errors
    /// `WatcherError::NotConnected` immediately when not connected,
    /// `WatcherError::SendTimeout` when the frame was not written in time.
    fn send_text(&self, text: &str, timeout: Duration) -> Result<()>;

    /// Send one binary frame. Same error contract as [`Transport::send_text`].
    fn send_binary(&self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Tear the connection down. Safe to call repeatedly.
    fn stop(&self);

    fn state(&self) -> ConnectionState;

    /// Inbound data frames discarded because the owner did not drain the
    /// event channel in time.
    fn inbound_dropped(&self) -> usize {
        0
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

pub type TransportHandle = Arc<dyn Transport>;

/// Per-kind send timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTimeouts {
    /// Text control frames (end-of-speech marker).
    pub control: Duration,
    /// Binary audio frames.
    pub audio: Duration,
}

impl Default for SendTimeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_millis(1_000),
            audio: Duration::from_millis(2_000),
        }
    }
}
