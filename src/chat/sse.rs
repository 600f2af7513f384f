use crate::chat::response::BackendEvent;
use serde::Serialize;
use thiserror::Error;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to serialize response: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("malformed backend event: {source}")]
    MalformedEvent {
        #[source]
        source: serde_json::Error,
        payload: String,
    },
}

/// Compact JSON payload for one SSE event.
pub fn encode_data<T: Serialize>(value: &T) -> Result<String, FrameError> {
    serde_json::to_string(value).map_err(FrameError::Serialize)
}

pub fn to_data_line<T: Serialize>(value: &T) -> Result<String, FrameError> {
    Ok(format!("{DATA_PREFIX}{}", encode_data(value)?))
}

/// Parses one backend line, with or without its `data: ` prefix.
///
/// A blank payload yields an empty event.
pub fn parse_event_line(line: &str) -> Result<BackendEvent, FrameError> {
    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
    if payload.is_empty() {
        return Ok(BackendEvent::default());
    }
    serde_json::from_str(payload).map_err(|source| FrameError::MalformedEvent {
        source,
        payload: payload.to_string(),
    })
}

pub fn is_done_marker(line: &str) -> bool {
    line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim() == DONE_MARKER
}
