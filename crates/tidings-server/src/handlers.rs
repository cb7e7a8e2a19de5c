//! HTTP route handlers.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use tidings_core::engine::ChatRequest;
use tidings_core::ids::{MessageId, RequestId, Topic};
use tidings_core::wire::WireMessage;

use crate::bridge::StreamBridge;
use crate::error::ServerError;
use crate::server::AppState;
use crate::session::SessionChannel;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// GET /v1/chat
///
/// Subscribes the caller to the request's topic, then starts the run unless
/// one is already in flight for that topic, and streams the topic as SSE.
pub async fn chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let input = query
        .input
        .filter(|input| !input.trim().is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing input".into()))?;
    let request_id = resolve_request_id(query.request_id, &headers)?;
    let topic = Topic::from(&request_id);

    let channel = SessionChannel::open(&state.broadcast, &state.runs, topic.clone(), last_event_id(&headers))?;

    let Some(run) = state.runs.try_begin(&topic) else {
        debug!(topic = %topic, "run already in flight, attaching");
        return Ok(sse_response(&state, &topic, channel));
    };

    let request = ChatRequest::new(request_id, input);
    let events = match state.engine.execute(request).await {
        Ok(events) => events,
        Err(e) => {
            warn!(topic = %topic, error = %e, engine = state.engine.name(), "run failed to start");
            let _ = state.broadcast.publish(WireMessage::chat_failed(), &[topic]);
            return Err(e.into());
        }
    };

    info!(topic = %topic, engine = state.engine.name(), "run started");
    let bridge = StreamBridge::new(state.broadcast.clone(), topic.clone());
    let _ = tokio::spawn(async move {
        let _outcome = bridge.run(events, run.token()).await;
        drop(run);
    });

    Ok(sse_response(&state, &topic, channel))
}

/// GET /v1/chat/{request_id}/events
///
/// Subscribe-only: resumes a topic from `Last-Event-ID`. Never starts a run.
pub async fn events(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let request_id = parse_request_id(&request_id)?;
    let topic = Topic::from(&request_id);

    // Read before subscribing so a run ending in between still counts.
    let was_running = state.runs.is_running(&topic);
    let channel = SessionChannel::open(&state.broadcast, &state.runs, topic.clone(), last_event_id(&headers))?;
    if channel.pending_replay() == 0 && !was_running {
        return Err(ServerError::NotFound(format!("no active or retained run for {topic}")));
    }
    Ok(sse_response(&state, &topic, channel))
}

/// GET /v1/healthz
pub async fn healthz() -> &'static str {
    "healthz"
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ServerError::NotFound("metrics recorder not installed".into()).into_response(),
    }
}

fn sse_response(state: &AppState, topic: &Topic, channel: SessionChannel) -> Response {
    let sse = Sse::new(channel.into_sse_stream()).keep_alive(KeepAlive::new().interval(state.keep_alive));
    let mut response = sse.into_response();
    if let Ok(value) = HeaderValue::from_str(topic.as_str()) {
        let _ = response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Query parameter, then `X-Request-Id`, then a fresh id.
fn resolve_request_id(from_query: Option<String>, headers: &HeaderMap) -> Result<RequestId, ServerError> {
    let from_header = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match from_query.or(from_header).filter(|id| !id.is_empty()) {
        Some(raw) => parse_request_id(&raw),
        None => Ok(RequestId::new()),
    }
}

/// Request ids double as topics and header values, so keep them to a safe
/// alphabet.
fn parse_request_id(raw: &str) -> Result<RequestId, ServerError> {
    let valid = !raw.is_empty()
        && raw.len() <= MAX_REQUEST_ID_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(RequestId::from_raw(raw))
    } else {
        Err(ServerError::BadRequest(format!("invalid request id {raw:?}")))
    }
}

/// `Last-Event-ID` as a message id. Unparseable values mean a live-only
/// subscription.
fn last_event_id(headers: &HeaderMap) -> Option<MessageId> {
    let raw = headers.get(LAST_EVENT_ID_HEADER)?;
    let parsed = raw.to_str().ok().and_then(|s| MessageId::from_str(s).ok());
    if parsed.is_none() {
        debug!(value = ?raw, "ignoring unparseable Last-Event-ID");
    }
    parsed
}
