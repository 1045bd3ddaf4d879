//! Envelope codec: JSON text frames in, typed `Envelope`s out.
//!
//! Every field default lives in exactly one constant below and is applied
//! through `int_or` / `string_or_empty`. The servo centre default matters
//! for the hardware: a servo message missing an axis must park that axis at
//! the mechanical centre, never at 0.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    AsrResult, BotReply, CaptureCommand, DisplayCommand, Envelope, ErrorNotice, MessageType,
    Payload, ServoCommand, StatusCommand,
};
use crate::error::DecodeError;

/// Servo angle used for a missing `x` / `y` (mechanical centre).
pub const SERVO_CENTER_DEG: i64 = 90;
/// Display font size used for a missing `size`; 0 selects the panel default.
pub const DISPLAY_DEFAULT_SIZE: i64 = 0;
/// JPEG quality used for a missing `quality`.
pub const CAPTURE_DEFAULT_QUALITY: i64 = 80;
/// Error code used when an `error` envelope carries no `code`.
pub const ERROR_DEFAULT_CODE: i64 = 0;

/// Text frame sent once a voice capture is complete.
pub const AUDIO_END_MARKER: &str = r#"{"type":"audio_end"}"#;

const AUD1_MAGIC: &[u8; 4] = b"AUD1";
const AUD1_HEADER_LEN: usize = 8;

/// Decode one inbound text frame.
///
/// # Errors
/// - `DecodeError::Malformed` when the bytes are not JSON.
/// - `DecodeError::NotAnObject` when the JSON is not an object.
/// - `DecodeError::MissingType` when `type` is absent or not a string.
/// - `DecodeError::UnknownType` for tags outside the protocol.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let root: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let obj = root.as_object().ok_or(DecodeError::NotAnObject)?;
    let tag = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    let kind =
        MessageType::from_tag(tag).ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;

    let code = match obj.get("code") {
        Some(Value::Number(_)) => Some(int_or(obj.get("code"), ERROR_DEFAULT_CODE)),
        _ => None,
    };
    let fields = Fields {
        root: obj,
        data: obj.get("data"),
    };

    let payload = match kind {
        MessageType::Servo => Payload::Servo(ServoCommand {
            x: saturate_i32(int_or(fields.get("x"), SERVO_CENTER_DEG)),
            y: saturate_i32(int_or(fields.get("y"), SERVO_CENTER_DEG)),
        }),
        MessageType::Display => Payload::Display(DisplayCommand {
            text: string_or_empty(fields.get("text")),
            emoji: string_or_empty(fields.get("emoji")),
            size: saturate_i32(int_or(fields.get("size"), DISPLAY_DEFAULT_SIZE)),
        }),
        MessageType::Status => Payload::Status(StatusCommand {
            text: fields.status_text(),
        }),
        MessageType::Capture => Payload::Capture(CaptureCommand {
            quality: saturate_i32(int_or(fields.get("quality"), CAPTURE_DEFAULT_QUALITY)),
        }),
        MessageType::Reboot => Payload::Reboot,
        MessageType::AsrResult => Payload::AsrResult(AsrResult {
            text: fields.text_or("text"),
        }),
        MessageType::BotReply => Payload::BotReply(BotReply {
            text: fields.text_or("text"),
        }),
        MessageType::TtsEnd => Payload::TtsEnd,
        MessageType::Error => Payload::Error(ErrorNotice {
            code: code.unwrap_or(ERROR_DEFAULT_CODE),
            message: fields.text_or("message"),
        }),
        MessageType::Audio
        | MessageType::AudioEnd
        | MessageType::Video
        | MessageType::Sensor
        | MessageType::Ping
        | MessageType::Pong
        | MessageType::Connected
        | MessageType::Unknown => Payload::Unhandled,
    };

    Ok(Envelope {
        kind,
        code,
        payload,
    })
}

/// The end-of-speech marker text frame.
pub fn encode_audio_end() -> &'static str {
    AUDIO_END_MARKER
}

/// Integer field with a declared default. Floats truncate toward zero;
/// anything that is not a number yields the default.
pub fn int_or(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(default),
        _ => default,
    }
}

/// String field; missing or non-string values yield `""`.
pub fn string_or_empty(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default()
}

fn saturate_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Field lookup across protocol versions: v2 nests fields under an object
/// `data`, v1 puts them at the top level.
struct Fields<'a> {
    root: &'a Map<String, Value>,
    data: Option<&'a Value>,
}

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        match self.data {
            Some(Value::Object(data)) => data.get(key),
            _ => self.root.get(key),
        }
    }

    /// v2 bare-string `data`, else the v1 top-level `legacy_key`.
    fn text_or(&self, legacy_key: &str) -> String {
        match self.data {
            Some(Value::String(s)) => s.clone(),
            _ => string_or_empty(self.root.get(legacy_key)),
        }
    }

    /// v1 status carried `state` + `message`; normalise to `"[state] message"`.
    fn status_text(&self) -> String {
        if let Some(Value::String(s)) = self.data {
            return s.clone();
        }
        let state = string_or_empty(self.root.get("state"));
        let message = string_or_empty(self.root.get("message"));
        match (state.is_empty(), message.is_empty()) {
            (true, _) => message,
            (false, true) => format!("[{state}]"),
            (false, false) => format!("[{state}] {message}"),
        }
    }
}

/// Binary audio framing, selected once per engine.
///
/// | format | protocol | layout |
/// |--------|----------|--------|
/// | `Raw`  | v2 | payload bytes only |
/// | `Aud1` | v1 | `b"AUD1"` + u32 LE payload length + payload |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioWireFormat {
    #[default]
    Raw,
    Aud1,
}

impl AudioWireFormat {
    pub fn protocol_version(self) -> u8 {
        match self {
            Self::Raw => 2,
            Self::Aud1 => 1,
        }
    }

    /// Frame one outbound audio chunk.
    pub fn encode(self, payload: &[u8]) -> Cow<'_, [u8]> {
        match self {
            Self::Raw => Cow::Borrowed(payload),
            Self::Aud1 => {
                let mut frame = Vec::with_capacity(AUD1_HEADER_LEN + payload.len());
                frame.extend_from_slice(AUD1_MAGIC);
                frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                frame.extend_from_slice(payload);
                Cow::Owned(frame)
            }
        }
    }

    /// Extract the audio payload from one inbound binary frame.
    ///
    /// # Errors
    /// `Aud1` frames shorter than the header, with the wrong magic, or with
    /// fewer payload bytes than declared.
    pub fn decode(self, frame: &[u8]) -> Result<&[u8], DecodeError> {
        match self {
            Self::Raw => Ok(frame),
            Self::Aud1 => {
                if frame.len() < AUD1_HEADER_LEN {
                    return Err(DecodeError::FrameTooShort(frame.len()));
                }
                if &frame[..4] != AUD1_MAGIC {
                    return Err(DecodeError::BadAudioMagic);
                }
                let declared =
                    u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
                let payload = &frame[AUD1_HEADER_LEN..];
                if payload.len() < declared {
                    return Err(DecodeError::AudioLengthMismatch {
                        declared,
                        actual: payload.len(),
                    });
                }
                Ok(&payload[..declared])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(json: &str) -> Payload {
        decode(json.as_bytes()).expect("decode envelope").payload
    }

    #[test]
    fn servo_v2_reads_data_object() {
        let env = decode(br#"{"type":"servo","code":0,"data":{"x":45,"y":135}}"#).unwrap();
        assert_eq!(env.kind, MessageType::Servo);
        assert_eq!(env.code, Some(0));
        assert_eq!(env.payload, Payload::Servo(ServoCommand { x: 45, y: 135 }));
    }

    #[test]
    fn servo_missing_axes_default_to_center() {
        assert_eq!(
            payload_of(r#"{"type":"servo","data":{"x":10}}"#),
            Payload::Servo(ServoCommand { x: 10, y: 90 })
        );
        assert_eq!(
            payload_of(r#"{"type":"servo","data":{"y":170}}"#),
            Payload::Servo(ServoCommand { x: 90, y: 170 })
        );
        assert_eq!(
            payload_of(r#"{"type":"servo","data":{}}"#),
            Payload::Servo(ServoCommand { x: 90, y: 90 })
        );
        assert_eq!(
            payload_of(r#"{"type":"servo"}"#),
            Payload::Servo(ServoCommand { x: 90, y: 90 })
        );
    }

    #[test]
    fn servo_non_numeric_axis_falls_back_to_center() {
        assert_eq!(
            payload_of(r#"{"type":"servo","data":{"x":"45","y":null}}"#),
            Payload::Servo(ServoCommand { x: 90, y: 90 })
        );
    }

    #[test]
    fn servo_float_axis_truncates() {
        assert_eq!(
            payload_of(r#"{"type":"servo","data":{"x":45.9,"y":-0.5}}"#),
            Payload::Servo(ServoCommand { x: 45, y: 0 })
        );
    }

    #[test]
    fn servo_legacy_top_level_fields() {
        assert_eq!(
            payload_of(r#"{"type":"servo","x":30,"y":60}"#),
            Payload::Servo(ServoCommand { x: 30, y: 60 })
        );
    }

    #[test]
    fn servo_v2_object_ignores_top_level_fields() {
        assert_eq!(
            payload_of(r#"{"type":"servo","x":30,"data":{"y":60}}"#),
            Payload::Servo(ServoCommand { x: 90, y: 60 })
        );
    }

    #[test]
    fn display_with_all_fields() {
        assert_eq!(
            payload_of(
                r#"{"type":"display","code":0,"data":{"text":"Hello","emoji":"happy","size":32}}"#
            ),
            Payload::Display(DisplayCommand {
                text: "Hello".into(),
                emoji: "happy".into(),
                size: 32,
            })
        );
    }

    #[test]
    fn display_optional_fields_default_empty_and_zero() {
        assert_eq!(
            payload_of(r#"{"type":"display","data":{"text":"Test"}}"#),
            Payload::Display(DisplayCommand {
                text: "Test".into(),
                emoji: String::new(),
                size: 0,
            })
        );
    }

    #[test]
    fn status_v2_is_a_bare_string() {
        assert_eq!(
            payload_of(r#"{"type":"status","code":0,"data":"[thinking] 正在思考..."}"#),
            Payload::Status(StatusCommand {
                text: "[thinking] 正在思考...".into()
            })
        );
    }

    #[test]
    fn status_legacy_state_and_message_are_normalised() {
        assert_eq!(
            payload_of(r#"{"type":"status","state":"thinking","message":"Processing audio..."}"#),
            Payload::Status(StatusCommand {
                text: "[thinking] Processing audio...".into()
            })
        );
        assert_eq!(
            payload_of(r#"{"type":"status","state":"idle"}"#),
            Payload::Status(StatusCommand {
                text: "[idle]".into()
            })
        );
    }

    #[test]
    fn capture_quality_defaults_to_80() {
        assert_eq!(
            payload_of(r#"{"type":"capture","data":{}}"#),
            Payload::Capture(CaptureCommand { quality: 80 })
        );
        assert_eq!(
            payload_of(r#"{"type":"capture","code":0,"data":{"quality":55}}"#),
            Payload::Capture(CaptureCommand { quality: 55 })
        );
    }

    #[test]
    fn reboot_with_null_data() {
        assert_eq!(
            payload_of(r#"{"type":"reboot","code":0,"data":null}"#),
            Payload::Reboot
        );
    }

    #[test]
    fn text_messages_read_bare_string_data() {
        assert_eq!(
            payload_of(r#"{"type":"asr_result","code":0,"data":"今天天气怎么样"}"#),
            Payload::AsrResult(AsrResult {
                text: "今天天气怎么样".into()
            })
        );
        assert_eq!(
            payload_of(r#"{"type":"bot_reply","code":0,"data":"Hello back"}"#),
            Payload::BotReply(BotReply {
                text: "Hello back".into()
            })
        );
    }

    #[test]
    fn error_takes_code_from_envelope() {
        let env = decode(br#"{"type":"error","code":500,"data":"Internal error"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Error);
        assert_eq!(
            env.payload,
            Payload::Error(ErrorNotice {
                code: 500,
                message: "Internal error".into()
            })
        );
    }

    #[test]
    fn error_without_code_uses_default() {
        assert_eq!(
            payload_of(r#"{"type":"error","data":"boom"}"#),
            Payload::Error(ErrorNotice {
                code: 0,
                message: "boom".into()
            })
        );
    }

    #[test]
    fn media_and_system_tags_are_recognized_but_unhandled() {
        for tag in ["audio", "audio_end", "video", "sensor", "ping", "pong", "connected"] {
            let json = format!(r#"{{"type":"{tag}"}}"#);
            let env = decode(json.as_bytes()).expect("recognized tag");
            assert_eq!(env.kind.tag(), tag);
            assert_eq!(env.payload, Payload::Unhandled);
        }
    }

    #[test]
    fn malformed_inputs_fail_with_specific_errors() {
        assert!(matches!(decode(b"not a json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b""), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b"{\"type\":"), Err(DecodeError::Malformed(_))));
        assert_eq!(decode(b"[1,2,3]"), Err(DecodeError::NotAnObject));
        assert_eq!(decode(b"\"servo\""), Err(DecodeError::NotAnObject));
        assert_eq!(
            decode(br#"{"code":0,"data":{"x":90,"y":45}}"#),
            Err(DecodeError::MissingType)
        );
        assert_eq!(decode(br#"{"type":7}"#), Err(DecodeError::MissingType));
        assert_eq!(
            decode(br#"{"type":"unknown","code":0,"data":null}"#),
            Err(DecodeError::UnknownType("unknown".into()))
        );
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            decode(&[0xff, 0xfe, b'{', b'}']),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn end_marker_decodes_to_audio_end() {
        let env = decode(encode_audio_end().as_bytes()).expect("marker decodes");
        assert_eq!(env.kind, MessageType::AudioEnd);
        assert_eq!(env.payload, Payload::Unhandled);

        // A server echoing the marker with extra envelope fields is still the same marker.
        let echoed = decode(br#"{"type":"audio_end","code":0,"data":null}"#).unwrap();
        assert_eq!(echoed.kind, env.kind);
        assert_eq!(echoed.payload, env.payload);
    }

    #[test]
    fn raw_wire_format_is_passthrough() {
        let pcm = [1u8, 2, 3, 4];
        assert_eq!(AudioWireFormat::Raw.encode(&pcm).as_ref(), &pcm);
        assert_eq!(AudioWireFormat::Raw.decode(&pcm).unwrap(), &pcm);
        assert_eq!(AudioWireFormat::Raw.protocol_version(), 2);
    }

    #[test]
    fn aud1_header_layout() {
        let frame = AudioWireFormat::Aud1.encode(&[9u8, 8, 7]);
        assert_eq!(&frame[..4], b"AUD1");
        assert_eq!(&frame[4..8], &3u32.to_le_bytes());
        assert_eq!(&frame[8..], &[9u8, 8, 7]);
        assert_eq!(AudioWireFormat::Aud1.decode(&frame).unwrap(), &[9u8, 8, 7]);
    }

    #[test]
    fn aud1_rejects_bad_frames() {
        assert_eq!(
            AudioWireFormat::Aud1.decode(b"AUD1"),
            Err(DecodeError::FrameTooShort(4))
        );
        assert_eq!(
            AudioWireFormat::Aud1.decode(b"OPUS\x01\x00\x00\x00x"),
            Err(DecodeError::BadAudioMagic)
        );
        assert_eq!(
            AudioWireFormat::Aud1.decode(b"AUD1\x05\x00\x00\x00ab"),
            Err(DecodeError::AudioLengthMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn wire_format_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(AudioWireFormat::Aud1).unwrap(),
            "aud1"
        );
        let parsed: AudioWireFormat = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(parsed, AudioWireFormat::Raw);
    }
}
