//! `WatcherEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! WatcherEngine::new(config, collaborators)
//!     └─► start()   → transport.connect(), engine thread spawned
//!         └─► stop() → engine thread joined, recording finished,
//!                      playback ended, transport stopped
//! ```
//!
//! ## Threading
//!
//! One named std thread runs [`event_loop::DeviceLoop`]. It is the only
//! place where transport events, host control events and the periodic tick
//! meet; everything it touches lives in the shared [`DeviceContext`], whose
//! state machines lock internally, so host threads may query them at any
//! time.

pub mod event_loop;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    diagnostics::{DeviceStats, StatsSnapshot},
    error::{Result, WatcherError},
    glue::{
        build_handlers, display::DisplayState, DeviceGlue, DisplayController, DisplayPanel,
        RebootHandle, SerialLink, ServoBridge,
    },
    ipc::events::{ConnectionState, ControlEvent, DeviceStatusEvent, TransportEvent},
    protocol::AudioWireFormat,
    router::Router,
    transport::{SendTimeouts, TransportHandle},
    voice::{
        CaptureDevice, PlaybackConfig, PlaybackDevice, RecorderConfig, TtsPlayer, TtsState,
        VoiceEvent, VoiceRecorder, VoiceState,
    },
};

/// Status broadcast capacity for slow host consumers.
const BROADCAST_CAP: usize = 64;

/// Configuration for `WatcherEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the polling task. Default: 60 ms (one capture frame).
    pub tick_interval: Duration,
    /// Bytes read from the capture device per tick. Default: 1920.
    pub frame_bytes: usize,
    /// Microphone rate, restored on the speaker after playback. Default: 16000.
    pub capture_sample_rate: u32,
    /// Rate of inbound TTS audio. Default: 24000.
    pub playback_sample_rate: u32,
    pub send_timeouts: SendTimeouts,
    /// Playback ends when no TTS chunk arrives for this long. Default: 3 s.
    pub tts_inactivity_timeout: Duration,
    /// Recording ends with a timeout after this long. Default: 30 s.
    pub max_recording: Duration,
    /// Binary audio framing for both directions.
    pub wire_format: AudioWireFormat,
    /// Pending host control events. Default: 32.
    pub control_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(60),
            frame_bytes: 1920,
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            send_timeouts: SendTimeouts::default(),
            tts_inactivity_timeout: Duration::from_secs(3),
            max_recording: Duration::from_secs(30),
            wire_format: AudioWireFormat::default(),
            control_capacity: 32,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(WatcherError::Config("tick interval must be > 0".into()));
        }
        if self.frame_bytes == 0 || self.frame_bytes % 2 != 0 {
            return Err(WatcherError::Config(format!(
                "frame size must be a positive whole number of 16-bit samples, got {}",
                self.frame_bytes
            )));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(WatcherError::Config("sample rates must be > 0".into()));
        }
        if self.control_capacity == 0 {
            return Err(WatcherError::Config("control capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            frame_bytes: self.frame_bytes,
            wire_format: self.wire_format,
            timeouts: self.send_timeouts,
            max_recording: self.max_recording,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            playback_rate: self.playback_sample_rate,
            capture_rate: self.capture_sample_rate,
            inactivity_timeout: self.tts_inactivity_timeout,
            wire_format: self.wire_format,
        }
    }
}

/// Everything the engine drives but does not implement.
pub struct Collaborators {
    pub transport: TransportHandle,
    /// Receiving side of the channel the transport reports into.
    pub transport_events: Receiver<TransportEvent>,
    pub capture: Box<dyn CaptureDevice>,
    pub playback: Box<dyn PlaybackDevice>,
    pub display: Box<dyn DisplayPanel>,
    pub serial: Box<dyn SerialLink>,
    pub reboot: Arc<dyn RebootHandle>,
}

/// Per-session device state, shared by the engine thread and the host.
pub struct DeviceContext {
    pub config: EngineConfig,
    pub stats: Arc<DeviceStats>,
    pub transport: TransportHandle,
    pub recorder: VoiceRecorder,
    pub player: Arc<TtsPlayer>,
    pub display: Arc<DisplayController>,
    pub servo: Arc<ServoBridge>,
    pub router: Router,
}

impl DeviceContext {
    fn new(
        config: EngineConfig,
        transport: TransportHandle,
        capture: Box<dyn CaptureDevice>,
        playback: Box<dyn PlaybackDevice>,
        display: Box<dyn DisplayPanel>,
        serial: Box<dyn SerialLink>,
        reboot: Arc<dyn RebootHandle>,
    ) -> Self {
        let stats = Arc::new(DeviceStats::new());
        let recorder = VoiceRecorder::new(
            capture,
            Arc::clone(&transport),
            Arc::clone(&stats),
            config.recorder_config(),
        );
        let player = Arc::new(TtsPlayer::new(
            playback,
            Arc::clone(&stats),
            config.playback_config(),
        ));
        let glue = DeviceGlue {
            display: Arc::new(DisplayController::new(display)),
            servo: Arc::new(ServoBridge::new(serial)),
            reboot,
            player: Arc::clone(&player),
        };
        let router = Router::new(build_handlers(&glue)).with_stats(Arc::clone(&stats));

        Self {
            config,
            stats,
            transport,
            recorder,
            player,
            display: glue.display,
            servo: glue.servo,
            router,
        }
    }
}

/// The top-level engine handle.
///
/// `WatcherEngine` is `Send + Sync`; wrap it in an `Arc` to share it with
/// host threads.
pub struct WatcherEngine {
    ctx: Arc<DeviceContext>,
    transport_events: Receiver<TransportEvent>,
    control_tx: Sender<ControlEvent>,
    control_rx: Receiver<ControlEvent>,
    status_tx: broadcast::Sender<DeviceStatusEvent>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WatcherEngine {
    /// Build the device context. Does not connect; call `start()`.
    ///
    /// # Errors
    /// `WatcherError::Config` for an invalid `config`.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            transport,
            transport_events,
            capture,
            playback,
            display,
            serial,
            reboot,
        } = collaborators;

        let (control_tx, control_rx) = crossbeam_channel::bounded(config.control_capacity);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let ctx = DeviceContext::new(
            config, transport, capture, playback, display, serial, reboot,
        );

        Ok(Self {
            ctx: Arc::new(ctx),
            transport_events,
            control_tx,
            control_rx,
            status_tx,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        })
    }

    /// Connect the transport and spawn the engine thread.
    ///
    /// # Errors
    /// - `WatcherError::AlreadyRunning` if already started.
    /// - Transport connect errors.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WatcherError::AlreadyRunning);
        }

        // Drop anything queued while stopped.
        while self.control_rx.try_recv().is_ok() {}

        let device_loop = event_loop::DeviceLoop::new(
            Arc::clone(&self.ctx),
            self.transport_events.clone(),
            self.control_rx.clone(),
            self.status_tx.clone(),
        );
        let running = Arc::clone(&self.running);
        let spawned = std::thread::Builder::new()
            .name("watcher-engine".into())
            .spawn(move || device_loop.run(running));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(WatcherError::Io(e));
            }
        };
        *self.thread.lock() = Some(handle);

        if let Err(e) = self.ctx.transport.connect() {
            warn!(error = %e, "transport connect failed");
            self.shutdown_thread();
            return Err(e);
        }

        info!(
            tick_ms = self.ctx.config.tick_interval.as_millis() as u64,
            wire_format = ?self.ctx.config.wire_format,
            "engine started"
        );
        Ok(())
    }

    /// Stop the engine thread and release the session. Calling it on a
    /// stopped engine does nothing.
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("engine already stopped");
            return;
        }
        self.shutdown_thread();

        self.ctx.recorder.process_event(VoiceEvent::CaptureStop);
        self.ctx.player.playback_end();
        self.ctx.transport.stop();
        info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a capture event (button, keyboard) for the engine thread.
    ///
    /// # Errors
    /// `WatcherError::NotRunning` when stopped or when the queue is full.
    pub fn push_voice_event(&self, event: VoiceEvent) -> Result<()> {
        if !self.is_running() {
            return Err(WatcherError::NotRunning);
        }
        self.control_tx
            .try_send(ControlEvent::Voice(event))
            .map_err(|_| WatcherError::NotRunning)
    }

    pub fn control_sender(&self) -> Sender<ControlEvent> {
        self.control_tx.clone()
    }

    /// Subscribe to connection / voice / TTS state changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<DeviceStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.ctx.transport.state()
    }

    pub fn voice_state(&self) -> VoiceState {
        self.ctx.recorder.state()
    }

    pub fn tts_state(&self) -> TtsState {
        self.ctx.player.state()
    }

    pub fn display_state(&self) -> DisplayState {
        self.ctx.display.current()
    }

    /// Snapshot of device counters for observability.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inbound_dropped: self.ctx.transport.inbound_dropped(),
            ..self.ctx.stats.snapshot()
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn shutdown_thread(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.control_tx.try_send(ControlEvent::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("engine thread panicked");
            }
        }
    }
}

impl Drop for WatcherEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
