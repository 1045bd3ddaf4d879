//! Voice capture and TTS playback state machines.
//!
//! Both machines keep their state behind a `parking_lot::Mutex`, so every
//! operation is callable from the engine thread, transport callbacks or the
//! host without further coordination.

pub mod playback;
pub mod recorder;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use playback::{ChunkOutcome, PlaybackConfig, TtsPlayer, TtsState};
pub use recorder::{RecorderConfig, RecorderStats, VoiceRecorder};

/// Microphone side of the audio collaborator.
pub trait CaptureDevice: Send + 'static {
    fn start(&mut self) -> Result<()>;

    /// Fill `buf` with little-endian 16-bit PCM. `Ok(0)` means nothing ready.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;
}

/// Speaker side of the audio collaborator.
pub trait PlaybackDevice: Send + 'static {
    /// Select the sample rate of the PCM passed to `write`.
    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Queue PCM bytes; returns the count accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    CaptureStart,
    CaptureStop,
    /// Maximum recording duration reached.
    Timeout,
}
