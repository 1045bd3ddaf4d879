//! Desktop stand-ins for the device peripherals.

use std::io::Write;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use serialport::SerialPort;
use tracing::{debug, info, warn};
use watcher_core::{DisplayPanel, Emoji, RebootHandle, SerialLink, WatcherError};

/// Screen output goes to the log.
pub struct TerminalDisplay;

impl DisplayPanel for TerminalDisplay {
    fn show_text(&mut self, text: &str, font_size: u32) -> watcher_core::Result<()> {
        info!(target: "watcher::display", font_size, "{text}");
        Ok(())
    }

    fn show_emoji(&mut self, emoji: Emoji) -> watcher_core::Result<()> {
        info!(target: "watcher::display", "expression: {}", emoji.name());
        Ok(())
    }
}

/// A blocked UART write gives up after this long.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Servo controller UART (8N1 at the configured baud rate).
pub struct SerialServoLink {
    port: Box<dyn SerialPort>,
}

impl SerialServoLink {
    pub fn open(path: &str, baud: u32) -> watcher_core::Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| WatcherError::Serial(format!("{path}: {e}")))?;
        info!(path, baud, "servo serial link open");
        Ok(Self::from_port(port))
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl SerialLink for SerialServoLink {
    fn write(&mut self, data: &[u8]) -> watcher_core::Result<usize> {
        let n = self
            .port
            .write(data)
            .map_err(|e| WatcherError::Serial(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| WatcherError::Serial(e.to_string()))?;
        Ok(n)
    }
}

/// Used when no serial port is configured.
pub struct NullSerialLink;

impl SerialLink for NullSerialLink {
    fn write(&mut self, data: &[u8]) -> watcher_core::Result<usize> {
        debug!(command = %String::from_utf8_lossy(data).trim_end(), "servo command dropped, no serial port");
        Ok(data.len())
    }
}

/// Reboot becomes a request to the session loop to rebuild everything.
pub struct SessionReboot {
    tx: Sender<()>,
}

impl SessionReboot {
    pub fn new(tx: Sender<()>) -> Self {
        Self { tx }
    }
}

impl RebootHandle for SessionReboot {
    fn request_reboot(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("reboot already pending"),
            Err(TrySendError::Disconnected(())) => warn!("reboot requested after session end"),
        }
    }
}
