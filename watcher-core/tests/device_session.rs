use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use watcher_core::glue::display::DisplayState;
use watcher_core::protocol::AUDIO_END_MARKER;
use watcher_core::{
    CaptureDevice, Collaborators, ConnectionState, DeviceStatusEvent, DisplayPanel, Emoji,
    EngineConfig, MemoryTransport, PlaybackDevice, RebootHandle, SerialLink, TransportHandle,
    VoiceEvent, VoiceState, WatcherEngine, WatcherError,
};

const WAIT: Duration = Duration::from_secs(3);

struct ScriptedMic {
    frames: VecDeque<Vec<u8>>,
    fail_start: bool,
}

impl CaptureDevice for ScriptedMic {
    fn start(&mut self) -> watcher_core::Result<()> {
        if self.fail_start {
            return Err(WatcherError::Capture("microphone unplugged".into()));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> watcher_core::Result<usize> {
        match self.frames.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn stop(&mut self) -> watcher_core::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct SpeakerLog {
    rates: Vec<u32>,
    starts: usize,
    stops: usize,
    bytes: usize,
}

struct Speaker(Arc<Mutex<SpeakerLog>>);

impl PlaybackDevice for Speaker {
    fn set_sample_rate(&mut self, sample_rate: u32) -> watcher_core::Result<()> {
        self.0.lock().rates.push(sample_rate);
        Ok(())
    }

    fn start(&mut self) -> watcher_core::Result<()> {
        self.0.lock().starts += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> watcher_core::Result<usize> {
        self.0.lock().bytes += data.len();
        Ok(data.len())
    }

    fn stop(&mut self) -> watcher_core::Result<()> {
        self.0.lock().stops += 1;
        Ok(())
    }
}

struct Panel;

impl DisplayPanel for Panel {
    fn show_text(&mut self, _text: &str, _font_size: u32) -> watcher_core::Result<()> {
        Ok(())
    }

    fn show_emoji(&mut self, _emoji: Emoji) -> watcher_core::Result<()> {
        Ok(())
    }
}

struct Wire(Arc<Mutex<Vec<u8>>>);

impl SerialLink for Wire {
    fn write(&mut self, data: &[u8]) -> watcher_core::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }
}

#[derive(Default)]
struct Reboots(AtomicUsize);

impl RebootHandle for Reboots {
    fn request_reboot(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct Rig {
    engine: WatcherEngine,
    transport: Arc<MemoryTransport>,
    speaker: Arc<Mutex<SpeakerLog>>,
    wire: Arc<Mutex<Vec<u8>>>,
    reboots: Arc<Reboots>,
}

fn rig(frames: usize, fail_start: bool) -> Rig {
    let (tx, rx) = crossbeam_channel::unbounded();
    let transport = Arc::new(MemoryTransport::new(tx));
    let speaker = Arc::new(Mutex::new(SpeakerLog::default()));
    let wire = Arc::new(Mutex::new(Vec::new()));
    let reboots = Arc::new(Reboots::default());

    let handle: TransportHandle = transport.clone();
    let collaborators = Collaborators {
        transport: handle,
        transport_events: rx,
        capture: Box::new(ScriptedMic {
            frames: (0..frames).map(|i| vec![i as u8; 1920]).collect(),
            fail_start,
        }),
        playback: Box::new(Speaker(Arc::clone(&speaker))),
        display: Box::new(Panel),
        serial: Box::new(Wire(Arc::clone(&wire))),
        reboot: reboots.clone(),
    };
    let config = EngineConfig {
        tick_interval: Duration::from_millis(5),
        ..EngineConfig::default()
    };
    let engine = WatcherEngine::new(config, collaborators).expect("engine builds");

    Rig {
        engine,
        transport,
        speaker,
        wire,
        reboots,
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() >= WAIT {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(2));
    }
}

fn wait_for_display(engine: &WatcherEngine, text: &str) -> DisplayState {
    wait_until(text, || engine.display_state().text == text);
    engine.display_state()
}

fn recv_status_with_timeout(
    rx: &mut broadcast::Receiver<DeviceStatusEvent>,
    timeout: Duration,
) -> DeviceStatusEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for status event");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("status channel closed unexpectedly"),
        }
    }
}

#[test]
fn lifecycle_start_stop_restart() {
    let r = rig(0, false);
    assert!(!r.engine.is_running());
    assert!(matches!(
        r.engine.push_voice_event(VoiceEvent::CaptureStart),
        Err(WatcherError::NotRunning)
    ));

    r.engine.start().unwrap();
    assert!(matches!(r.engine.start(), Err(WatcherError::AlreadyRunning)));
    let shown = wait_for_display(&r.engine, "Connected");
    assert_eq!(shown.emoji, Emoji::Happy);
    assert_eq!(r.engine.connection_state(), ConnectionState::Connected);

    r.engine.stop();
    r.engine.stop();
    assert!(!r.engine.is_running());
    assert_eq!(r.engine.connection_state(), ConnectionState::Disconnected);

    r.engine.start().unwrap();
    assert_eq!(r.engine.connection_state(), ConnectionState::Connected);
    r.engine.stop();
}

#[test]
fn push_to_talk_streams_frames_then_marker() {
    let r = rig(3, false);
    r.engine.start().unwrap();
    wait_for_display(&r.engine, "Connected");

    r.engine.push_voice_event(VoiceEvent::CaptureStart).unwrap();
    wait_until("three frames", || r.engine.stats_snapshot().frames_sent == 3);
    assert_eq!(r.engine.voice_state(), VoiceState::Recording);

    r.engine.push_voice_event(VoiceEvent::CaptureStop).unwrap();
    wait_until("recording to finish", || {
        r.engine.stats_snapshot().recordings_completed == 1
    });
    let shown = wait_for_display(&r.engine, "Processing...");
    assert_eq!(shown.emoji, Emoji::Thinking);

    let frames = r.transport.sent_binary();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.len() == 1920));
    assert_eq!(frames[2][0], 2);
    assert_eq!(r.transport.sent_text(), vec![AUDIO_END_MARKER.to_string()]);

    let stats = r.engine.stats_snapshot();
    assert_eq!(stats.voice_errors, 0);
    assert_eq!(r.engine.voice_state(), VoiceState::Idle);
    r.engine.stop();
}

#[test]
fn failed_microphone_start_stays_idle() {
    let r = rig(3, true);
    r.engine.start().unwrap();
    wait_for_display(&r.engine, "Connected");

    r.engine.push_voice_event(VoiceEvent::CaptureStart).unwrap();
    wait_until("start failure", || r.engine.stats_snapshot().voice_errors == 1);
    thread::sleep(Duration::from_millis(30));

    assert_eq!(r.engine.voice_state(), VoiceState::Idle);
    assert!(r.transport.sent().is_empty());
    assert_eq!(r.engine.stats_snapshot().frames_sent, 0);
    r.engine.stop();
}

#[test]
fn server_commands_drive_servo_and_reboot() {
    let r = rig(0, false);
    r.engine.start().unwrap();
    wait_for_display(&r.engine, "Connected");

    r.transport
        .inject_text(r#"{"type":"servo","code":0,"data":{"x":45,"y":135}}"#);
    r.transport.inject_text(r#"{"type":"reboot","code":0,"data":null}"#);
    wait_until("reboot request", || r.reboots.0.load(Ordering::SeqCst) == 1);

    assert_eq!(r.wire.lock().as_slice(), b"X:45\r\nY:135\r\n");
    let stats = r.engine.stats_snapshot();
    assert_eq!(stats.servo_commands, 1);
    assert_eq!(stats.messages_routed, 2);
    r.engine.stop();
}

#[test]
fn tts_plays_and_non_json_text_ends_it() {
    let r = rig(0, false);
    r.engine.start().unwrap();
    wait_for_display(&r.engine, "Connected");

    r.transport.inject_binary(&[0u8; 960]);
    r.transport.inject_binary(&[0u8; 960]);
    wait_until("two chunks", || r.engine.stats_snapshot().tts_chunks == 2);
    assert!(r.engine.tts_state().playing);
    assert_eq!(r.engine.tts_state().sample_rate, 24_000);

    r.transport.inject_text("not json at all");
    wait_until("playback end", || !r.engine.tts_state().playing);

    let log = r.speaker.lock();
    assert_eq!(log.starts, 1);
    assert_eq!(log.stops, 1);
    assert_eq!(log.bytes, 1920);
    assert_eq!(log.rates, vec![24_000, 16_000]);
    drop(log);

    assert_eq!(r.engine.tts_state().sample_rate, 16_000);
    let stats = r.engine.stats_snapshot();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.inbound_dropped, 0);
    r.engine.stop();
}

#[test]
fn status_changes_are_broadcast() {
    let r = rig(1, false);
    let mut rx = r.engine.subscribe_status();
    r.engine.start().unwrap();

    let connected = loop {
        let ev = recv_status_with_timeout(&mut rx, WAIT);
        if ev.connection == ConnectionState::Connected {
            break ev;
        }
    };
    assert_eq!(connected.voice, VoiceState::Idle);
    assert!(!connected.tts_playing);

    r.engine.push_voice_event(VoiceEvent::CaptureStart).unwrap();
    let recording = recv_status_with_timeout(&mut rx, WAIT);
    assert_eq!(recording.voice, VoiceState::Recording);

    r.transport.set_state(ConnectionState::Disconnected);
    let dropped = recv_status_with_timeout(&mut rx, WAIT);
    assert_eq!(dropped.connection, ConnectionState::Disconnected);
    // A lost link does not end the recording.
    assert_eq!(dropped.voice, VoiceState::Recording);
    let shown = wait_for_display(&r.engine, "Disconnected");
    assert_eq!(shown.emoji, Emoji::Standby);

    r.engine.stop();
}
