use std::time::Duration;

use thiserror::Error;

/// Fatal session errors
///
/// Each of these moves a session into `SessionState::Error` and is reported
/// exactly once on the state-change stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone access refused or input device unavailable
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// Handshake or network failure while opening the channel
    #[error("failed to open voice channel: {0}")]
    ChannelOpen(String),

    /// Channel handshake did not complete in time
    #[error("voice channel handshake timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Channel dropped or failed while the session was open
    #[error("voice channel failed: {0}")]
    ChannelRuntime(String),

    /// Capture device failed while the session was open
    #[error("capture device failed: {0}")]
    CaptureDevice(String),

    /// Output device could not be opened for reply playback
    #[error("output device unavailable: {0}")]
    OutputDevice(String),

    /// `start()` called on a session that already left `Idle`
    #[error("session already started (state: {0})")]
    AlreadyStarted(String),
}

/// Sample/transport decoding errors
///
/// Always recoverable: the offending message is dropped.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("PCM payload has odd length ({0} bytes)")]
    OddLength(usize),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed server message: {0}")]
    Message(#[from] serde_json::Error),
}

/// Audio device errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    #[error("audio stream failed: {0}")]
    Stream(String),

    #[error("audio file error: {0}")]
    File(#[from] hound::Error),

    #[error("audio device already running")]
    AlreadyRunning,
}

/// Channel send errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Outbound queue is full; the frame was not sent
    #[error("outbound queue full")]
    Full,

    /// Channel is closed
    #[error("channel closed")]
    Closed,
}
