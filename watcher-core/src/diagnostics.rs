//! Monotonic device counters shared by the router and both state machines.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct DeviceStats {
    pub frames_sent: AtomicUsize,
    /// Capture start/read/stop failures and failed audio or marker sends.
    pub voice_errors: AtomicUsize,
    pub recordings_completed: AtomicUsize,
    pub tts_chunks: AtomicUsize,
    pub tts_sessions: AtomicUsize,
    pub tts_errors: AtomicUsize,
    pub tts_timeouts: AtomicUsize,
    pub messages_routed: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub servo_commands: AtomicUsize,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.voice_errors.store(0, Ordering::Relaxed);
        self.recordings_completed.store(0, Ordering::Relaxed);
        self.tts_chunks.store(0, Ordering::Relaxed);
        self.tts_sessions.store(0, Ordering::Relaxed);
        self.tts_errors.store(0, Ordering::Relaxed);
        self.tts_timeouts.store(0, Ordering::Relaxed);
        self.messages_routed.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.servo_commands.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            voice_errors: self.voice_errors.load(Ordering::Relaxed),
            recordings_completed: self.recordings_completed.load(Ordering::Relaxed),
            tts_chunks: self.tts_chunks.load(Ordering::Relaxed),
            tts_sessions: self.tts_sessions.load(Ordering::Relaxed),
            tts_errors: self.tts_errors.load(Ordering::Relaxed),
            tts_timeouts: self.tts_timeouts.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            servo_commands: self.servo_commands.load(Ordering::Relaxed),
            inbound_dropped: 0,
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub frames_sent: usize,
    pub voice_errors: usize,
    pub recordings_completed: usize,
    pub tts_chunks: usize,
    pub tts_sessions: usize,
    pub tts_errors: usize,
    pub tts_timeouts: usize,
    pub messages_routed: usize,
    pub decode_errors: usize,
    pub servo_commands: usize,
    /// Inbound frames the transport discarded; filled in from the transport.
    pub inbound_dropped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let stats = DeviceStats::new();
        DeviceStats::bump(&stats.frames_sent);
        DeviceStats::bump(&stats.tts_timeouts);
        DeviceStats::bump(&stats.decode_errors);
        assert_eq!(stats.snapshot().frames_sent, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
