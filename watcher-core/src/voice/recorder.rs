//! Push-to-talk capture state machine.
//!
//! ```text
//!            CaptureStart (start ok)
//!   Idle ─────────────────────────────► Recording ──┐ tick(): read one frame,
//!    ▲                                      │       │ send as one binary frame
//!    └──── CaptureStop | Timeout ───────────┘ ◄─────┘
//!          stop capture, send end-of-speech marker
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{CaptureDevice, VoiceEvent, VoiceState};
use crate::diagnostics::DeviceStats;
use crate::error::Result;
use crate::protocol::{encode_audio_end, AudioWireFormat};
use crate::transport::{SendTimeouts, TransportHandle};

/// 60 ms of 16 kHz 16-bit mono.
pub const DEFAULT_FRAME_BYTES: usize = 1920;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub frame_bytes: usize,
    pub wire_format: AudioWireFormat,
    pub timeouts: SendTimeouts,
    /// Recordings longer than this end with `VoiceEvent::Timeout`.
    pub max_recording: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_bytes: DEFAULT_FRAME_BYTES,
            wire_format: AudioWireFormat::default(),
            timeouts: SendTimeouts::default(),
            max_recording: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    pub current_state: VoiceState,
    pub frames_sent: usize,
    pub errors: usize,
    pub recordings_completed: usize,
}

/// Recorder state visible to host queries. Never held across device or
/// transport calls.
struct Session {
    state: VoiceState,
    started_at: Option<Instant>,
}

/// Capture device and frame buffer. Held for a whole transition or tick so
/// frames and the end-of-speech marker leave in order.
struct Io {
    device: Box<dyn CaptureDevice>,
    frame: Vec<u8>,
}

pub struct VoiceRecorder {
    session: Mutex<Session>,
    io: Mutex<Io>,
    transport: TransportHandle,
    stats: Arc<DeviceStats>,
    config: RecorderConfig,
}

impl VoiceRecorder {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        transport: TransportHandle,
        stats: Arc<DeviceStats>,
        config: RecorderConfig,
    ) -> Self {
        Self {
            session: Mutex::new(Session {
                state: VoiceState::Idle,
                started_at: None,
            }),
            io: Mutex::new(Io {
                device,
                frame: vec![0u8; config.frame_bytes],
            }),
            transport,
            stats,
            config,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.session.lock().state
    }

    /// Apply one event and return the resulting state.
    pub fn process_event(&self, event: VoiceEvent) -> VoiceState {
        let mut io = self.io.lock();
        let current = self.state();
        match (current, event) {
            (VoiceState::Idle, VoiceEvent::CaptureStart) => match io.device.start() {
                Ok(()) => {
                    *self.session.lock() = Session {
                        state: VoiceState::Recording,
                        started_at: Some(Instant::now()),
                    };
                    info!("recording started");
                }
                Err(e) => {
                    DeviceStats::bump(&self.stats.voice_errors);
                    warn!(error = %e, "capture start failed");
                }
            },
            (VoiceState::Recording, VoiceEvent::CaptureStop | VoiceEvent::Timeout) => {
                self.finish(&mut io, event);
            }
            (VoiceState::Recording, VoiceEvent::CaptureStart) => {
                debug!("capture start ignored, already recording");
            }
            (VoiceState::Idle, VoiceEvent::CaptureStop | VoiceEvent::Timeout) => {
                debug!(?event, "ignored while idle");
            }
        }
        self.state()
    }

    /// Forward one captured frame. Returns the number of frames sent (0 or 1).
    ///
    /// # Errors
    /// Capture read or send failures; they are counted and the state is kept.
    pub fn tick(&self) -> Result<usize> {
        let mut io = self.io.lock();
        if self.state() != VoiceState::Recording {
            return Ok(0);
        }

        let Io { device, frame } = &mut *io;
        let n = match device.read(frame) {
            Ok(n) => n.min(frame.len()),
            Err(e) => {
                DeviceStats::bump(&self.stats.voice_errors);
                return Err(e);
            }
        };
        if n == 0 {
            return Ok(0);
        }

        let payload = self.config.wire_format.encode(&frame[..n]);
        if let Err(e) = self
            .transport
            .send_binary(&payload, self.config.timeouts.audio)
        {
            DeviceStats::bump(&self.stats.voice_errors);
            debug!(error = %e, bytes = n, "audio frame send failed");
            return Err(e);
        }

        DeviceStats::bump(&self.stats.frames_sent);
        Ok(1)
    }

    /// Fire `Timeout` when the current recording has run past the limit.
    pub fn check_timeout(&self, now: Instant) -> bool {
        let mut io = self.io.lock();
        let expired = {
            let session = self.session.lock();
            match (session.state, session.started_at) {
                (VoiceState::Recording, Some(started)) => {
                    now.saturating_duration_since(started) >= self.config.max_recording
                }
                _ => false,
            }
        };
        if expired {
            warn!(
                max_secs = self.config.max_recording.as_secs(),
                "maximum recording duration reached"
            );
            self.finish(&mut io, VoiceEvent::Timeout);
        }
        expired
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            current_state: self.state(),
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            errors: self.stats.voice_errors.load(Ordering::Relaxed),
            recordings_completed: self.stats.recordings_completed.load(Ordering::Relaxed),
        }
    }

    fn finish(&self, io: &mut Io, event: VoiceEvent) {
        if let Err(e) = io.device.stop() {
            DeviceStats::bump(&self.stats.voice_errors);
            warn!(error = %e, "capture stop failed");
        }
        if let Err(e) = self
            .transport
            .send_text(encode_audio_end(), self.config.timeouts.control)
        {
            DeviceStats::bump(&self.stats.voice_errors);
            warn!(error = %e, "end-of-speech marker not sent");
        }
        *self.session.lock() = Session {
            state: VoiceState::Idle,
            started_at: None,
        };
        DeviceStats::bump(&self.stats.recordings_completed);
        info!(?event, "recording finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use crate::error::WatcherError;
    use crate::ipc::events::{ConnectionState, TransportEvent};
    use crate::protocol::AUDIO_END_MARKER;
    use crate::transport::{MemoryTransport, SendFailure, Transport};

    #[derive(Default)]
    struct CaptureLog {
        starts: usize,
        reads: usize,
        stops: usize,
    }

    struct ScriptedCapture {
        log: Arc<Mutex<CaptureLog>>,
        fail_start: bool,
        frames: VecDeque<std::result::Result<Vec<u8>, ()>>,
    }

    impl CaptureDevice for ScriptedCapture {
        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(WatcherError::Capture("no microphone".into()));
            }
            self.log.lock().starts += 1;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.log.lock().reads += 1;
            match self.frames.pop_front() {
                Some(Ok(frame)) => {
                    let n = frame.len().min(buf.len());
                    buf[..n].copy_from_slice(&frame[..n]);
                    Ok(n)
                }
                Some(Err(())) => Err(WatcherError::Capture("read failed".into())),
                None => Ok(0),
            }
        }

        fn stop(&mut self) -> Result<()> {
            self.log.lock().stops += 1;
            Ok(())
        }
    }

    struct Fixture {
        recorder: VoiceRecorder,
        transport: Arc<MemoryTransport>,
        log: Arc<Mutex<CaptureLog>>,
        _events: crossbeam_channel::Receiver<TransportEvent>,
    }

    fn fixture(
        fail_start: bool,
        frames: Vec<std::result::Result<Vec<u8>, ()>>,
        config: RecorderConfig,
    ) -> Fixture {
        let (tx, rx) = crossbeam_channel::unbounded();
        let transport = Arc::new(MemoryTransport::new(tx));
        transport.connect().unwrap();
        let log = Arc::new(Mutex::new(CaptureLog::default()));
        let device = ScriptedCapture {
            log: Arc::clone(&log),
            fail_start,
            frames: frames.into(),
        };
        let handle: TransportHandle = transport.clone();
        let recorder = VoiceRecorder::new(
            Box::new(device),
            handle,
            Arc::new(DeviceStats::new()),
            config,
        );
        Fixture {
            recorder,
            transport,
            log,
            _events: rx,
        }
    }

    #[test]
    fn start_twice_starts_capture_once() {
        let f = fixture(false, vec![], RecorderConfig::default());
        assert_eq!(
            f.recorder.process_event(VoiceEvent::CaptureStart),
            VoiceState::Recording
        );
        assert_eq!(
            f.recorder.process_event(VoiceEvent::CaptureStart),
            VoiceState::Recording
        );
        assert_eq!(f.log.lock().starts, 1);
    }

    #[test]
    fn stop_twice_sends_one_marker() {
        let f = fixture(false, vec![], RecorderConfig::default());
        f.recorder.process_event(VoiceEvent::CaptureStart);
        f.recorder.process_event(VoiceEvent::CaptureStop);
        f.recorder.process_event(VoiceEvent::CaptureStop);

        assert_eq!(f.transport.sent_text(), vec![AUDIO_END_MARKER.to_string()]);
        assert_eq!(f.log.lock().stops, 1);
        assert_eq!(f.recorder.stats().recordings_completed, 1);
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let f = fixture(false, vec![], RecorderConfig::default());
        assert_eq!(
            f.recorder.process_event(VoiceEvent::Timeout),
            VoiceState::Idle
        );
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.log.lock().stops, 0);
    }

    #[test]
    fn failed_start_stays_idle_and_counts() {
        let f = fixture(true, vec![], RecorderConfig::default());
        assert_eq!(
            f.recorder.process_event(VoiceEvent::CaptureStart),
            VoiceState::Idle
        );
        let stats = f.recorder.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.current_state, VoiceState::Idle);
        assert_eq!(f.recorder.tick().unwrap(), 0);
        assert!(f.transport.sent().is_empty());
    }

    #[test]
    fn tick_is_idle_no_op() {
        let f = fixture(false, vec![Ok(vec![1; 8])], RecorderConfig::default());
        assert_eq!(f.recorder.tick().unwrap(), 0);
        assert!(f.transport.sent().is_empty());
    }

    #[test]
    fn each_tick_sends_one_frame() {
        let frames = (0..5u8).map(|i| Ok(vec![i; 1920])).collect();
        let f = fixture(false, frames, RecorderConfig::default());
        f.recorder.process_event(VoiceEvent::CaptureStart);
        for _ in 0..5 {
            assert_eq!(f.recorder.tick().unwrap(), 1);
        }
        let sent = f.transport.sent_binary();
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|frame| frame.len() == 1920));
        assert_eq!(sent[3][0], 3);
        assert_eq!(f.recorder.stats().frames_sent, 5);
        assert_eq!(f.log.lock().reads, 5);
    }

    /// Connected transport whose binary sends block until released.
    struct StalledSocket {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl Transport for StalledSocket {
        fn connect(&self) -> Result<()> {
            Ok(())
        }
        fn send_text(&self, _text: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        fn send_binary(&self, _data: &[u8], timeout: Duration) -> Result<()> {
            let _ = self.entered.send(());
            self.release
                .recv_timeout(timeout)
                .map_err(|_| WatcherError::SendTimeout)
        }
        fn stop(&self) {}
        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }
    }

    #[test]
    fn state_queries_do_not_wait_for_a_slow_send() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let transport: TransportHandle = Arc::new(StalledSocket {
            entered: entered_tx,
            release: release_rx,
        });
        let device = ScriptedCapture {
            log: Arc::new(Mutex::new(CaptureLog::default())),
            fail_start: false,
            frames: vec![Ok(vec![1; 1920])].into(),
        };
        let recorder = Arc::new(VoiceRecorder::new(
            Box::new(device),
            transport,
            Arc::new(DeviceStats::new()),
            RecorderConfig::default(),
        ));
        recorder.process_event(VoiceEvent::CaptureStart);

        let ticking = Arc::clone(&recorder);
        let tick = std::thread::spawn(move || ticking.tick());
        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("send started");

        let asked = Instant::now();
        assert_eq!(recorder.state(), VoiceState::Recording);
        assert_eq!(recorder.stats().frames_sent, 0);
        assert!(asked.elapsed() < Duration::from_millis(500));

        release_tx.send(()).unwrap();
        assert_eq!(tick.join().unwrap().unwrap(), 1);
        assert_eq!(recorder.stats().frames_sent, 1);
    }

    #[test]
    fn empty_read_sends_nothing() {
        let f = fixture(false, vec![Ok(vec![])], RecorderConfig::default());
        f.recorder.process_event(VoiceEvent::CaptureStart);
        assert_eq!(f.recorder.tick().unwrap(), 0);
        assert!(f.transport.sent_binary().is_empty());
    }

    #[test]
    fn read_and_send_errors_are_counted_without_state_change() {
        let f = fixture(
            false,
            vec![Err(()), Ok(vec![7; 16])],
            RecorderConfig::default(),
        );
        f.recorder.process_event(VoiceEvent::CaptureStart);
        assert!(f.recorder.tick().is_err());
        assert_eq!(f.recorder.state(), VoiceState::Recording);

        f.transport.fail_sends(Some(SendFailure::Timeout));
        assert!(matches!(f.recorder.tick(), Err(WatcherError::SendTimeout)));
        assert_eq!(f.recorder.state(), VoiceState::Recording);
        assert_eq!(f.recorder.stats().errors, 2);
    }

    #[test]
    fn marker_failure_still_completes_the_recording() {
        let f = fixture(false, vec![], RecorderConfig::default());
        f.recorder.process_event(VoiceEvent::CaptureStart);
        f.transport.fail_sends(Some(SendFailure::Transport));

        assert_eq!(
            f.recorder.process_event(VoiceEvent::CaptureStop),
            VoiceState::Idle
        );
        let stats = f.recorder.stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.recordings_completed, 1);
    }

    #[test]
    fn aud1_frames_carry_the_header() {
        let config = RecorderConfig {
            wire_format: AudioWireFormat::Aud1,
            ..RecorderConfig::default()
        };
        let f = fixture(false, vec![Ok(vec![5; 4])], config);
        f.recorder.process_event(VoiceEvent::CaptureStart);
        f.recorder.tick().unwrap();

        let sent = f.transport.sent_binary();
        assert_eq!(&sent[0][..4], b"AUD1");
        assert_eq!(&sent[0][8..], &[5, 5, 5, 5]);
    }

    #[test]
    fn long_recording_times_out() {
        let config = RecorderConfig {
            max_recording: Duration::from_secs(30),
            ..RecorderConfig::default()
        };
        let f = fixture(false, vec![], config);
        f.recorder.process_event(VoiceEvent::CaptureStart);

        assert!(!f.recorder.check_timeout(Instant::now()));
        assert!(f
            .recorder
            .check_timeout(Instant::now() + Duration::from_secs(31)));
        assert_eq!(f.recorder.state(), VoiceState::Idle);
        assert_eq!(f.transport.sent_text(), vec![AUDIO_END_MARKER.to_string()]);
        assert!(!f
            .recorder
            .check_timeout(Instant::now() + Duration::from_secs(60)));
    }
}
