//! Command dispatch.
//!
//! The router owns a fixed table of independently optional handlers, one per
//! actionable message type. Routing never fails: malformed input is counted,
//! logged at debug level and reported as `MessageType::Unknown`.

use std::sync::Arc;

use tracing::debug;

use crate::diagnostics::DeviceStats;
use crate::error::DecodeError;
use crate::protocol::{
    self, AsrResult, BotReply, CaptureCommand, DisplayCommand, Envelope, ErrorNotice,
    MessageType, Payload, ServoCommand, StatusCommand,
};

pub type Handler<T> = Box<dyn Fn(T) + Send + Sync>;
pub type SignalHandler = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct Handlers {
    pub on_servo: Option<Handler<ServoCommand>>,
    pub on_display: Option<Handler<DisplayCommand>>,
    pub on_status: Option<Handler<StatusCommand>>,
    pub on_capture: Option<Handler<CaptureCommand>>,
    pub on_reboot: Option<SignalHandler>,
    pub on_asr_result: Option<Handler<AsrResult>>,
    pub on_bot_reply: Option<Handler<BotReply>>,
    pub on_tts_end: Option<SignalHandler>,
    pub on_error: Option<Handler<ErrorNotice>>,
}

pub struct Router {
    handlers: Handlers,
    stats: Option<Arc<DeviceStats>>,
}

impl Router {
    pub fn new(handlers: Handlers) -> Self {
        Self {
            handlers,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<DeviceStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Decode and dispatch one text frame.
    pub fn route(&self, bytes: &[u8]) -> MessageType {
        self.dispatch(protocol::decode(bytes))
    }

    /// Dispatch an already decoded frame.
    pub fn dispatch(&self, decoded: Result<Envelope, DecodeError>) -> MessageType {
        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                if let Some(stats) = &self.stats {
                    DeviceStats::bump(&stats.decode_errors);
                }
                debug!(error = %e, "dropping undecodable message");
                return MessageType::Unknown;
            }
        };
        if let Some(stats) = &self.stats {
            DeviceStats::bump(&stats.messages_routed);
        }

        let kind = envelope.kind;
        let h = &self.handlers;
        match envelope.payload {
            Payload::Servo(cmd) => {
                if let Some(stats) = &self.stats {
                    DeviceStats::bump(&stats.servo_commands);
                }
                call(&h.on_servo, cmd);
            }
            Payload::Display(cmd) => call(&h.on_display, cmd),
            Payload::Status(cmd) => call(&h.on_status, cmd),
            Payload::Capture(cmd) => call(&h.on_capture, cmd),
            Payload::Reboot => signal(&h.on_reboot),
            Payload::AsrResult(msg) => call(&h.on_asr_result, msg),
            Payload::BotReply(msg) => call(&h.on_bot_reply, msg),
            Payload::TtsEnd => signal(&h.on_tts_end),
            Payload::Error(notice) => call(&h.on_error, notice),
            Payload::Unhandled => debug!(kind = kind.tag(), "no action for message"),
        }
        kind
    }
}

fn call<T>(handler: &Option<Handler<T>>, value: T) {
    if let Some(handler) = handler {
        handler(value);
    }
}

fn signal(handler: &Option<SignalHandler>) {
    if let Some(handler) = handler {
        handler();
    }
}
