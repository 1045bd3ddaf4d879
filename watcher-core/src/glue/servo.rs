//! Serial bridge to the pan/tilt controller.
//!
//! Wire format is two CRLF-terminated lines, `X:<deg>` then `Y:<deg>`, with
//! both angles clamped to `0..=180`.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, WatcherError};

pub const SERVO_MIN_DEG: i32 = 0;
pub const SERVO_MAX_DEG: i32 = 180;

/// Byte sink towards the secondary controller.
pub trait SerialLink: Send + 'static {
    /// Write `data`, returning the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;
}

pub fn format_servo_command(x: i32, y: i32) -> String {
    let x = x.clamp(SERVO_MIN_DEG, SERVO_MAX_DEG);
    let y = y.clamp(SERVO_MIN_DEG, SERVO_MAX_DEG);
    format!("X:{x}\r\nY:{y}\r\n")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub tx_count: usize,
    pub error_count: usize,
}

pub struct ServoBridge {
    link: Mutex<Box<dyn SerialLink>>,
    tx_count: AtomicUsize,
    error_count: AtomicUsize,
}

impl ServoBridge {
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            link: Mutex::new(link),
            tx_count: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
        }
    }

    /// Send one servo target.
    ///
    /// # Errors
    /// Link failures and short writes, both counted.
    pub fn send_servo(&self, x: i32, y: i32) -> Result<()> {
        let line = format_servo_command(x, y);
        let written = self.link.lock().write(line.as_bytes());
        match written {
            Ok(n) if n == line.len() => {
                self.tx_count.fetch_add(1, Ordering::Relaxed);
                debug!(x, y, "servo command sent");
                Ok(())
            }
            Ok(n) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(written = n, expected = line.len(), "short serial write");
                Err(WatcherError::Serial(format!(
                    "short write: {n} of {} bytes",
                    line.len()
                )))
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "serial write failed");
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            tx_count: self.tx_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.tx_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
    }
}
