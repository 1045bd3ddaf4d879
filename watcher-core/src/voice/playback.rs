//! TTS playback state machine.
//!
//! The first audio chunk of a reply switches the speaker to the playback rate
//! and starts it; later chunks are only forwarded. Playback ends on an
//! explicit end signal, or when no chunk has arrived for the inactivity
//! window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::PlaybackDevice;
use crate::diagnostics::DeviceStats;
use crate::error::{Result, WatcherError};
use crate::protocol::AudioWireFormat;

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate of inbound TTS audio.
    pub playback_rate: u32,
    /// Rate restored when playback ends.
    pub capture_rate: u32,
    pub inactivity_timeout: Duration,
    pub wire_format: AudioWireFormat,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            playback_rate: 24_000,
            capture_rate: 16_000,
            inactivity_timeout: Duration::from_secs(3),
            wire_format: AudioWireFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtsState {
    pub playing: bool,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// First chunk of a reply; the speaker was started.
    Started,
    Continued,
    /// Empty chunk.
    Ignored,
}

struct Inner {
    playing: bool,
    sample_rate: u32,
    last_chunk_at: Option<Instant>,
    device: Box<dyn PlaybackDevice>,
}

pub struct TtsPlayer {
    inner: Mutex<Inner>,
    stats: Arc<DeviceStats>,
    config: PlaybackConfig,
}

impl TtsPlayer {
    pub fn new(
        device: Box<dyn PlaybackDevice>,
        stats: Arc<DeviceStats>,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                playing: false,
                sample_rate: config.capture_rate,
                last_chunk_at: None,
                device,
            }),
            stats,
            config,
        }
    }

    pub fn state(&self) -> TtsState {
        let inner = self.inner.lock();
        TtsState {
            playing: inner.playing,
            sample_rate: inner.sample_rate,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    /// Handle one inbound binary frame.
    ///
    /// # Errors
    /// Frame decode, speaker setup or write failures. All are counted; a
    /// failed setup leaves the player idle.
    pub fn on_audio_chunk(&self, frame: &[u8]) -> Result<ChunkOutcome> {
        let payload = match self.config.wire_format.decode(frame) {
            Ok(payload) => payload,
            Err(e) => {
                DeviceStats::bump(&self.stats.tts_errors);
                return Err(WatcherError::Decode(e));
            }
        };
        if payload.is_empty() {
            return Ok(ChunkOutcome::Ignored);
        }

        let mut inner = self.inner.lock();
        let outcome = if inner.playing {
            ChunkOutcome::Continued
        } else {
            self.begin(&mut inner)?;
            ChunkOutcome::Started
        };
        inner.last_chunk_at = Some(Instant::now());

        if let Err(e) = inner.device.write(payload) {
            DeviceStats::bump(&self.stats.tts_errors);
            debug!(error = %e, bytes = payload.len(), "TTS write failed");
            return Err(e);
        }
        DeviceStats::bump(&self.stats.tts_chunks);
        Ok(outcome)
    }

    /// End playback. Returns `false` when nothing was playing.
    pub fn playback_end(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.playing {
            return false;
        }
        self.end(&mut inner);
        info!("TTS playback finished");
        true
    }

    /// Force playback to end when no chunk arrived within the inactivity window.
    pub fn check_timeout(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let expired = match (inner.playing, inner.last_chunk_at) {
            (true, Some(last)) => {
                now.saturating_duration_since(last) >= self.config.inactivity_timeout
            }
            _ => false,
        };
        if expired {
            DeviceStats::bump(&self.stats.tts_timeouts);
            warn!(
                timeout_ms = self.config.inactivity_timeout.as_millis() as u64,
                "TTS stream went quiet, ending playback"
            );
            self.end(&mut inner);
        }
        expired
    }

    fn begin(&self, inner: &mut Inner) -> Result<()> {
        let setup = inner
            .device
            .set_sample_rate(self.config.playback_rate)
            .and_then(|()| inner.device.start());

        if let Err(e) = setup {
            DeviceStats::bump(&self.stats.tts_errors);
            warn!(error = %e, "TTS playback setup failed");
            if let Err(e) = inner.device.set_sample_rate(self.config.capture_rate) {
                debug!(error = %e, "sample rate restore failed");
            }
            inner.sample_rate = self.config.capture_rate;
            return Err(e);
        }

        inner.playing = true;
        inner.sample_rate = self.config.playback_rate;
        DeviceStats::bump(&self.stats.tts_sessions);
        info!(sample_rate = self.config.playback_rate, "TTS playback started");
        Ok(())
    }

    fn end(&self, inner: &mut Inner) {
        if let Err(e) = inner.device.stop() {
            DeviceStats::bump(&self.stats.tts_errors);
            warn!(error = %e, "speaker stop failed");
        }
        if let Err(e) = inner.device.set_sample_rate(self.config.capture_rate) {
            DeviceStats::bump(&self.stats.tts_errors);
            warn!(error = %e, "sample rate restore failed");
        }
        inner.playing = false;
        inner.sample_rate = self.config.capture_rate;
        inner.last_chunk_at = None;
    }
}
