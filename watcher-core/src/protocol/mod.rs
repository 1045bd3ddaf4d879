//! Typed representation of the cloud control protocol.
//!
//! ## Envelope shapes
//!
//! | type | `data` (v2) | legacy v1 fields |
//! |------|-------------|------------------|
//! | `servo` | `{"x": 0-180, "y": 0-180}` | top-level `x`, `y` |
//! | `display` | `{"text", "emoji", "size"}` | top-level `text`, `emoji`, `size` |
//! | `status` | `"[state] message"` | top-level `state`, `message` |
//! | `capture` | `{"quality": 1-100}` | top-level `quality` |
//! | `reboot` | `null` | none |
//! | `asr_result` / `bot_reply` | `"text"` | top-level `text` |
//! | `tts_end` | `"ok"` | none |
//! | `error` | `"message"` (+ envelope `code`) | top-level `message` |
//!
//! `audio`, `audio_end`, `video`, `sensor`, `ping`, `pong` and `connected`
//! are recognized but carry no payload the device acts on.

pub mod codec;

use serde::{Deserialize, Serialize};

pub use codec::{decode, encode_audio_end, AudioWireFormat, AUDIO_END_MARKER};

/// Every `type` tag the device recognizes, plus `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Servo,
    Display,
    Status,
    Capture,
    Reboot,
    AsrResult,
    BotReply,
    TtsEnd,
    Error,
    Audio,
    AudioEnd,
    Video,
    Sensor,
    Ping,
    Pong,
    Connected,
    Unknown,
}

impl MessageType {
    /// Map a wire tag to its type. `None` for tags the device does not know.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "servo" => Self::Servo,
            "display" => Self::Display,
            "status" => Self::Status,
            "capture" => Self::Capture,
            "reboot" => Self::Reboot,
            "asr_result" => Self::AsrResult,
            "bot_reply" => Self::BotReply,
            "tts_end" => Self::TtsEnd,
            "error" => Self::Error,
            "audio" => Self::Audio,
            "audio_end" => Self::AudioEnd,
            "video" => Self::Video,
            "sensor" => Self::Sensor,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "connected" => Self::Connected,
            _ => return None,
        };
        Some(kind)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Servo => "servo",
            Self::Display => "display",
            Self::Status => "status",
            Self::Capture => "capture",
            Self::Reboot => "reboot",
            Self::AsrResult => "asr_result",
            Self::BotReply => "bot_reply",
            Self::TtsEnd => "tts_end",
            Self::Error => "error",
            Self::Audio => "audio",
            Self::AudioEnd => "audio_end",
            Self::Video => "video",
            Self::Sensor => "sensor",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Connected => "connected",
            Self::Unknown => "unknown",
        }
    }
}

/// Pan/tilt target forwarded to the secondary controller.
///
/// Values are passed through as received; clamping happens at the serial bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    pub x: i32,
    pub y: i32,
}

/// Screen update. Empty `emoji` means "leave as normal"; `size == 0` means
/// the panel's default font size.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayCommand {
    pub text: String,
    pub emoji: String,
    pub size: i32,
}

/// Free-form status line, conventionally `"[state] message"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusCommand {
    pub text: String,
}

/// Camera still request (camera path is not implemented on this device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCommand {
    pub quality: i32,
}

/// Speech recognized by the cloud from the last recording.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AsrResult {
    pub text: String,
}

/// Assistant reply text that accompanies the TTS stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BotReply {
    pub text: String,
}

/// Error reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorNotice {
    pub code: i64,
    pub message: String,
}

/// Decoded payload, one variant per actionable message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Servo(ServoCommand),
    Display(DisplayCommand),
    Status(StatusCommand),
    Capture(CaptureCommand),
    Reboot,
    AsrResult(AsrResult),
    BotReply(BotReply),
    TtsEnd,
    Error(ErrorNotice),
    /// Recognized media-stream or system tag with nothing to act on.
    Unhandled,
}

/// One decoded inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageType,
    pub code: Option<i64>,
    pub payload: Payload,
}
