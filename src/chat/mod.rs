//! Translation between OpenAI chat completions and the backend chat schema.
//!
//! Requests flow `ChatRequest` -> normalized messages -> `BackendRequest`; replies flow
//! backend `data:` lines -> `BackendEvent` -> `OpenAIChunk` or an aggregated
//! `OpenAICompletion`. Everything here is pure over request-scoped data except
//! the warnings and counters emitted for swallowed backend errors.

pub mod catalog;
pub mod id;
pub mod message;
pub mod request;
pub mod response;
pub mod sse;

pub use catalog::{Entitlements, ModelCatalog, ModelResolution};
pub use request::{BackendRequest, ChatRequest, Translation, translate_request};
pub use response::{Aggregate, BackendEvent, OpenAIChunk, OpenAICompletion, StreamEnvelope};
pub use sse::FrameError;

pub const METRIC_BACKEND_ERROR_EVENTS: &str = "raybridge_backend_error_events_total";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(BackendEvent),
    Done,
}

/// Decodes one backend event payload.
///
/// Error-flagged events are logged and replaced by an empty event so the stream
/// keeps going; malformed JSON is returned as an error for the caller to end the request.
pub fn decode_stream_data(data: &str) -> Result<StreamItem, FrameError> {
    if sse::is_done_marker(data) {
        return Ok(StreamItem::Done);
    }
    let event = sse::parse_event_line(data)?;
    if event.is_error() {
        tracing::warn!(payload = %data, "backend reported an error event");
        metrics::counter!(METRIC_BACKEND_ERROR_EVENTS).increment(1);
        return Ok(StreamItem::Event(BackendEvent::default()));
    }
    Ok(StreamItem::Event(event))
}
