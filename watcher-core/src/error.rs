use thiserror::Error;

/// Why an inbound frame could not be turned into an `Envelope` or an audio payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("envelope has no string `type` field")]
    MissingType,

    #[error("unrecognized message type: {0}")]
    UnknownType(String),

    #[error("audio frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("audio frame has bad magic")]
    BadAudioMagic,

    #[error("audio frame length mismatch: header says {declared}, payload has {actual}")]
    AudioLengthMismatch { declared: usize, actual: usize },
}

/// All errors produced by watcher-core.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport is not connected")]
    NotConnected,

    #[error("send timed out")]
    SendTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("capture device error: {0}")]
    Capture(String),

    #[error("playback device error: {0}")]
    Playback(String),

    #[error("serial link error: {0}")]
    Serial(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WatcherError>;
