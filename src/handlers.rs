use crate::app::AppState;
use crate::auth::CallerContext;
use crate::chat::response::Aggregate;
use crate::chat::sse::{self, DONE_MARKER};
use crate::chat::{
    BackendEvent, BackendRequest, ChatRequest, StreamEnvelope, StreamItem, decode_stream_data,
    translate_request,
};
use crate::error::{AppError, AppResult};
use crate::upstream;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const METRIC_DROPPED_MESSAGES: &str = "raybridge_dropped_messages_total";
pub const METRIC_MODEL_FALLBACK: &str = "raybridge_model_fallback_total";
pub const METRIC_STREAM_FAILURES: &str = "raybridge_stream_failures_total";

const DEFAULT_LISTING_MODEL: &str = "openai-gpt-4o-mini";
const DEFAULT_TOOLS_MODEL: &str = "raycast-ray1";

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let models: Vec<Value> = state
        .catalog
        .entries()
        .map(|entry| {
            let id = if entry.provider.is_empty() {
                entry.model
            } else {
                format!("{}-{}", entry.provider, entry.model)
            };
            json!({ "id": id })
        })
        .collect();
    Json(json!({
        "models": models,
        "default_models": {
            "chat": DEFAULT_LISTING_MODEL,
            "quick_ai": DEFAULT_LISTING_MODEL,
            "commands": DEFAULT_LISTING_MODEL,
            "api": DEFAULT_LISTING_MODEL,
            "emoji_search": DEFAULT_LISTING_MODEL,
            "tools": DEFAULT_TOOLS_MODEL,
        }
    }))
}

pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let caller = auth_caller(&headers, &state)?;
    let req: ChatRequest = serde_json::from_value(body).map_err(|err| {
        AppError::new(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
    })?;

    let translation = translate_request(&req, &state.catalog, &caller.entitlements);
    if translation.dropped_messages > 0 {
        metrics::counter!(METRIC_DROPPED_MESSAGES).increment(translation.dropped_messages as u64);
    }
    if translation.resolution.substituted {
        metrics::counter!(METRIC_MODEL_FALLBACK).increment(1);
        tracing::debug!(
            requested = %req.model,
            resolved = %translation.resolution.model,
            "requested model not eligible, using default"
        );
    }
    let backend_req = translation.request;

    if req.stream {
        return match forward_stream(state, backend_req).await {
            Ok(stream) => Ok(Sse::new(stream).into_response()),
            Err(err) => Ok(Sse::new(error_to_sse_stream(&err)).into_response()),
        };
    }

    let model = backend_req.model.clone();
    let resp = upstream::call_backend_raw(&state.http, &state.runtime.backend(), &backend_req)
        .await
        .inspect_err(|err| tracing::warn!(model = %model, "backend call failed: {}", err.message))?;
    let aggregate = collect_backend_reply(resp).await?;
    Ok(Json(aggregate.into_completion(&model)).into_response())
}

fn auth_caller(headers: &HeaderMap, state: &AppState) -> AppResult<CallerContext> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", "missing auth"))?;
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid auth"))?;
    state
        .auth
        .authenticate_token(token)
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid token"))
}

async fn forward_stream(
    state: AppState,
    backend_req: BackendRequest,
) -> AppResult<
    impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static,
> {
    let resp = upstream::call_backend_raw(&state.http, &state.runtime.backend(), &backend_req)
        .await
        .inspect_err(|err| {
            tracing::warn!(model = %backend_req.model, "backend call failed: {}", err.message)
        })?;

    // Capacity 1: a slow client holds back reads from the backend.
    let (tx, rx) = mpsc::channel::<Event>(1);
    let envelope = StreamEnvelope::new(backend_req.model);
    tokio::spawn(async move {
        if let Err(err) = pump_backend_stream(resp, &envelope, &tx).await {
            metrics::counter!(METRIC_STREAM_FAILURES).increment(1);
            tracing::warn!(id = %envelope.id, "stream failed: {}", err.message);
            if let Some(event) = error_event(&err) {
                let _ = tx.send(event).await;
            }
            let _ = tx.send(Event::default().data(DONE_MARKER)).await;
        }
    });
    Ok(tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok))
}

/// Sends one chunk downstream. Returns `false` once the client has gone away.
async fn send_chunk(
    tx: &mpsc::Sender<Event>,
    envelope: &StreamEnvelope,
    event: &BackendEvent,
) -> AppResult<bool> {
    let data = sse::encode_data(&envelope.chunk(event))?;
    Ok(tx.send(Event::default().data(data)).await.is_ok())
}

async fn pump_backend_stream(
    resp: reqwest::Response,
    envelope: &StreamEnvelope,
    tx: &mpsc::Sender<Event>,
) -> AppResult<()> {
    if upstream::is_json_response(&resp) {
        let event = tokio::select! {
            event = read_json_event(resp) => event?,
            _ = tx.closed() => {
                tracing::debug!(id = %envelope.id, "client disconnected, dropping backend reply");
                return Ok(());
            }
        };
        if !send_chunk(tx, envelope, &event).await? {
            return Ok(());
        }
        let _ = tx.send(Event::default().data(DONE_MARKER)).await;
        return Ok(());
    }

    let mut events = resp.bytes_stream().eventsource();
    loop {
        let next = tokio::select! {
            next = events.next() => next,
            _ = tx.closed() => {
                tracing::debug!(id = %envelope.id, "client disconnected, dropping backend stream");
                return Ok(());
            }
        };
        let Some(ev) = next else { break };
        let ev = ev.map_err(|err| {
            AppError::new(StatusCode::BAD_GATEWAY, "upstream_stream_error", err.to_string())
                .with_type("upstream_error")
        })?;
        let event = match decode_stream_data(&ev.data)? {
            StreamItem::Done => break,
            StreamItem::Event(event) => event,
        };
        if !send_chunk(tx, envelope, &event).await? {
            tracing::debug!(id = %envelope.id, "client disconnected, dropping backend stream");
            return Ok(());
        }
    }
    let _ = tx.send(Event::default().data(DONE_MARKER)).await;
    Ok(())
}

async fn collect_backend_reply(resp: reqwest::Response) -> AppResult<Aggregate> {
    let mut aggregate = Aggregate::default();
    if upstream::is_json_response(&resp) {
        aggregate.push(&read_json_event(resp).await?);
        return Ok(aggregate);
    }

    let mut events = resp.bytes_stream().eventsource();
    while let Some(ev) = events.next().await {
        let ev = ev.map_err(|err| {
            AppError::new(StatusCode::BAD_GATEWAY, "upstream_stream_error", err.to_string())
                .with_type("upstream_error")
        })?;
        match decode_stream_data(&ev.data)? {
            StreamItem::Done => break,
            StreamItem::Event(event) => aggregate.push(&event),
        }
    }
    Ok(aggregate)
}

async fn read_json_event(resp: reqwest::Response) -> AppResult<BackendEvent> {
    let body = resp.text().await.map_err(|err| {
        AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", err.to_string())
            .with_type("upstream_error")
    })?;
    match decode_stream_data(body.trim())? {
        StreamItem::Event(event) => Ok(event),
        StreamItem::Done => Ok(BackendEvent::default()),
    }
}

fn error_to_sse_stream(
    err: &AppError,
) -> impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static {
    let events: Vec<Event> = error_event(err)
        .into_iter()
        .chain(std::iter::once(Event::default().data(DONE_MARKER)))
        .collect();
    futures_util::stream::iter(events.into_iter().map(Ok))
}

/// Terminal stream event carrying the error envelope.
fn error_event(err: &AppError) -> Option<Event> {
    match sse::encode_data(&err.envelope()) {
        Ok(data) => Some(Event::default().data(data)),
        Err(encode_err) => {
            tracing::error!(code = %err.code, "failed to encode error event: {encode_err}");
            None
        }
    }
}
