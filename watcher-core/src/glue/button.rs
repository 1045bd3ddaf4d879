//! Push-to-talk button debounce.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::voice::VoiceEvent;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Turns raw pressed/released samples into capture events. A level change
/// is accepted only when the previous accepted change is at least the
/// debounce window old.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pressed: bool,
    last_change: Option<Instant>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pressed: false,
            last_change: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn sample(&mut self, pressed: bool, now: Instant) -> Option<VoiceEvent> {
        if pressed == self.pressed {
            return None;
        }
        if let Some(last) = self.last_change {
            if now.saturating_duration_since(last) < self.window {
                return None;
            }
        }
        self.pressed = pressed;
        self.last_change = Some(now);
        debug!(pressed, "button level changed");
        Some(if pressed {
            VoiceEvent::CaptureStart
        } else {
            VoiceEvent::CaptureStop
        })
    }
}
