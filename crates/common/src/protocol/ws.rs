// Wire frame types for the palaver chat protocol.
//
// A frame is one discrete JSON text message on the duplex transport.
// Frames are transient: validated, fanned out, never persisted here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Minimum size of a raw frame in bytes, enforced before parsing.
pub const MIN_FRAME_BYTES: usize = 2;
/// Maximum size of a raw frame in bytes, enforced before parsing.
pub const MAX_FRAME_BYTES: usize = 65_536;

/// One wire-level message unit. Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    /// Frame type, e.g. `"message"` or `"ping"`. Required, non-empty.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload; this layer never inspects it.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client timestamp, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

/// Why a raw frame was rejected by [`parse_frame`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame size {0} bytes is outside [{MIN_FRAME_BYTES}, {MAX_FRAME_BYTES}]")]
    SizeOutOfRange(usize),
    #[error("frame is not a structured message: {0}")]
    Malformed(String),
    #[error("frame type is empty or absent")]
    EmptyType,
}

/// Validate and parse a raw frame.
///
/// Pure and stateless: size check first (cheap rejection before any
/// parsing), then structural parse, then the non-empty `type` rule.
/// Safe to call concurrently from any number of sessions.
pub fn parse_frame(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() < MIN_FRAME_BYTES || raw.len() > MAX_FRAME_BYTES {
        return Err(FrameError::SizeOutOfRange(raw.len()));
    }

    let frame = serde_json::from_slice::<Frame>(raw)
        .map_err(|error| FrameError::Malformed(error.to_string()))?;

    if frame.kind.trim().is_empty() {
        return Err(FrameError::EmptyType);
    }

    Ok(frame)
}

/// Code carried by a per-client error notice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeCode {
    RateLimited,
    InvalidFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoticePayload {
    pub code: NoticeCode,
    pub message: String,
}

/// Per-client error notice. Sent only to the offending connection,
/// never broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: NoticePayload,
}

impl ErrorNotice {
    fn new(code: NoticeCode, message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            payload: NoticePayload { code, message: message.into() },
        }
    }

    pub fn rate_limited(limit_per_window: u32) -> Self {
        Self::new(
            NoticeCode::RateLimited,
            format!("rate limit of {limit_per_window} messages per minute exceeded"),
        )
    }

    pub fn invalid_format(error: &FrameError) -> Self {
        Self::new(NoticeCode::InvalidFormat, error.to_string())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
