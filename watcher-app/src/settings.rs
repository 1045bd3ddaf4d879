//! Persistent device settings (JSON file in the user config directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use watcher_core::{AudioWireFormat, EngineConfig, WsConfig};

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8766";
/// Line rate of the servo controller UART.
pub const DEFAULT_SERIAL_BAUD: u32 = 115_200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DeviceSettings {
    pub server_url: String,
    /// Serial device the servo controller listens on; `None` disables it.
    pub serial_port: Option<String>,
    pub serial_baud: u32,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub wire_format: AudioWireFormat,
    pub tick_interval_ms: u64,
    pub max_recording_secs: u64,
    pub tts_inactivity_ms: u64,
    pub reconnect_max_secs: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            serial_port: None,
            serial_baud: DEFAULT_SERIAL_BAUD,
            preferred_input_device: None,
            preferred_output_device: None,
            wire_format: AudioWireFormat::default(),
            tick_interval_ms: 60,
            max_recording_secs: 30,
            tts_inactivity_ms: 3_000,
            reconnect_max_secs: 30,
        }
    }
}

impl DeviceSettings {
    pub fn normalize(&mut self) {
        self.server_url = normalize_server_url(&self.server_url);
        self.serial_port = trimmed(self.serial_port.take());
        if self.serial_baud == 0 {
            self.serial_baud = DEFAULT_SERIAL_BAUD;
        }
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.preferred_output_device = trimmed(self.preferred_output_device.take());
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);
        self.max_recording_secs = self.max_recording_secs.clamp(1, 300);
        self.tts_inactivity_ms = self.tts_inactivity_ms.clamp(500, 30_000);
        self.reconnect_max_secs = self.reconnect_max_secs.clamp(1, 300);
    }

    /// Command-line and environment values win over the file.
    pub fn apply_overrides(&mut self, server_url: Option<String>, serial_port: Option<String>) {
        if let Some(url) = server_url {
            self.server_url = url;
        }
        if let Some(port) = serial_port {
            self.serial_port = Some(port);
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            max_recording: Duration::from_secs(self.max_recording_secs),
            tts_inactivity_timeout: Duration::from_millis(self.tts_inactivity_ms),
            wire_format: self.wire_format,
            ..EngineConfig::default()
        }
    }

    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            reconnect_max: Duration::from_secs(self.reconnect_max_secs),
            ..WsConfig::new(self.server_url.clone())
        }
    }
}

pub fn normalize_server_url(raw: &str) -> String {
    let url = raw.trim();
    if url.is_empty() {
        return DEFAULT_SERVER_URL.into();
    }
    if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        format!("ws://{url}")
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Watcher")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("watcher")
            .join("settings.json")
    }
}

/// Missing file means defaults; an unreadable one is logged and ignored.
pub fn load_settings(path: &Path) -> DeviceSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<DeviceSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring invalid settings file: {e}");
            DeviceSettings::default()
        }),
        Err(_) => DeviceSettings::default(),
    };
    settings.normalize();
    settings
}
