//! Event types flowing between the transport, the engine thread and the host.
//!
//! | Event | Producer | Consumer |
//! |-------|----------|----------|
//! | `TransportEvent` | transport task | engine thread (crossbeam) |
//! | `ControlEvent` | host (button, shutdown) | engine thread (crossbeam) |
//! | `DeviceStatusEvent` | engine thread | host (tokio broadcast) |

use serde::{Deserialize, Serialize};

use crate::voice::{VoiceEvent, VoiceState};

// ---------------------------------------------------------------------------
// Transport events
// ---------------------------------------------------------------------------

/// Lifecycle of the single duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Everything a transport reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection state changed.
    State(ConnectionState),
    /// Inbound text frame (expected to be a JSON envelope).
    Text(String),
    /// Inbound binary frame (TTS audio).
    Binary(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Host → engine
// ---------------------------------------------------------------------------

/// Requests the host pushes into a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Button or keyboard driven capture event.
    Voice(VoiceEvent),
    /// Leave the engine loop.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Engine → host
// ---------------------------------------------------------------------------

/// Broadcast whenever connection, voice or TTS state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusEvent {
    pub connection: ConnectionState,
    pub voice: VoiceState,
    pub tts_playing: bool,
    /// Optional human-readable detail (e.g. last error).
    pub detail: Option<String>,
}
