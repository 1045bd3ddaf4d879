//! # watcher-core
//!
//! Device-side engine for the Watcher duplex voice protocol.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────── WatcherEngine thread ─────────────┐
//! Transport ──────►│ Text   → protocol::decode → Router → glue      │──► DisplayPanel
//! (ws / memory)    │ Binary → TtsPlayer ─────────────────────────── │──► PlaybackDevice
//!        ▲         │ Voice  → VoiceRecorder state machine           │
//!        │         │ tick   → VoiceRecorder::tick, timeouts         │──► SerialLink (servo)
//!        └─────────│◄─ PCM frames + audio_end marker                │
//!                  └──────────────┬─────────────────────────────────┘
//!                                 │
//!                   broadcast::Sender<DeviceStatusEvent>
//! ```
//!
//! Every hardware or network dependency is a trait (`Transport`,
//! `CaptureDevice`, `PlaybackDevice`, `DisplayPanel`, `SerialLink`,
//! `RebootHandle`), so the whole engine runs against in-memory fakes in
//! tests. Audio device callbacks never allocate; they only touch SPSC rings.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod glue;
pub mod ipc;
pub mod protocol;
pub mod router;
pub mod transport;
pub mod voice;

// Convenience re-exports for downstream crates
pub use diagnostics::{DeviceStats, StatsSnapshot};
pub use engine::{Collaborators, EngineConfig, WatcherEngine};
pub use error::{DecodeError, Result, WatcherError};
pub use glue::{DisplayPanel, Emoji, RebootHandle, SerialLink};
pub use ipc::events::{ConnectionState, ControlEvent, DeviceStatusEvent, TransportEvent};
pub use protocol::{AudioWireFormat, Envelope, MessageType, Payload};
pub use router::{Handlers, Router};
pub use transport::{MemoryTransport, Transport, TransportHandle, WsConfig, WsTransport};
pub use voice::{CaptureDevice, PlaybackDevice, VoiceEvent, VoiceState};
