//! Session endpoints — the command channel of the kernel.
//!
//! - `POST /sessions`                      — create + run
//! - `GET  /sessions/{id}`                 — status probe
//! - `GET  /sessions/{id}/events?history=` — SSE stream
//! - `GET  /sessions/{id}/state?position=` — state snapshot
//! - `POST /sessions/{id}/input`           — HITL replies & injections
//! - `POST /sessions/{id}/pause|resume`    — flow control
//! - `POST /sessions/{id}/fork`            — log fork

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use orchid_domain::{Error, Event, Filter, Signal};

use crate::state::AppState;

use super::error_response;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    #[serde(default)]
    pub input: Value,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> impl IntoResponse {
    match state.start_session(body.input) {
        Ok(session_id) => Json(json!({ "sessionId": session_id })).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<Value> = state
        .registry
        .ids()
        .into_iter()
        .filter_map(|id| state.registry.get(&id))
        .map(|handle| {
            json!({
                "sessionId": handle.session.id(),
                "running": handle.running(),
                "status": handle.session.status(),
            })
        })
        .collect();
    Json(json!({ "sessions": sessions }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions/{id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(handle) => Json(json!({
            "sessionId": id,
            "running": handle.running(),
            "status": handle.session.status(),
        }))
        .into_response(),
        None => error_response(Error::NotFound(format!("session {id}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions/{id}/events  (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub history: bool,
}

fn sse_frame(signal: &Signal) -> SseEvent {
    SseEvent::default().data(serde_json::to_string(signal).unwrap_or_default())
}

/// One `data: <json-signal>\n\n` frame per signal. With
/// `?history=true`, the durable log is replayed first, then the live
/// tail. Ids are stable, so clients dedupe the seam.
pub async fn events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> axum::response::Response {
    let Some(handle) = state.registry.get(&id) else {
        return error_response(Error::NotFound(format!("session {id}")));
    };

    // Subscribe before loading history so the seam never drops signals.
    let mut live = handle.session.hub().stream(Filter::all());
    let past: Vec<Signal> = if query.history {
        handle
            .store
            .load(&handle.recording_id)
            .map(|r| r.signals)
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let stream = async_stream::stream! {
        for signal in &past {
            yield Ok::<_, std::convert::Infallible>(sse_frame(signal));
        }
        while let Some(signal) = live.next().await {
            yield Ok(sse_frame(&signal));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions/{id}/state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub position: Option<usize>,
}

pub async fn state_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StateQuery>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(handle) => Json(json!({
            "sessionId": id,
            "state": handle.state_at(query.position),
        }))
        .into_response(),
        None => error_response(Error::NotFound(format!("session {id}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /sessions/{id}/input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InputBody {
    pub event: SerializedEvent,
}

#[derive(Debug, Deserialize)]
pub struct SerializedEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// HITL replies and message injections arrive here as serialized
/// events; anything else is emitted onto the session hub verbatim.
pub async fn input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> impl IntoResponse {
    let Some(handle) = state.registry.get(&id) else {
        return error_response(Error::NotFound(format!("session {id}")));
    };
    let event = body.event;

    let outcome = match event.name.as_str() {
        "session:reply" => {
            let prompt_id = event.payload["promptId"].as_str().unwrap_or_default();
            let content = event.payload["content"].as_str().unwrap_or_default();
            handle.session.reply(prompt_id, content)
        }
        "session:message" => {
            let content = event.payload["content"].as_str().unwrap_or_default();
            let agent = event.payload["agent"].as_str().map(str::to_owned);
            handle.session.send_message(content, agent)
        }
        _ => {
            handle
                .session
                .hub()
                .emit(Event::new(event.name, event.payload));
            Ok(())
        }
    };

    match outcome {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /sessions/{id}/pause · /resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(handle) => {
            let was_paused = handle.session.pause();
            Json(json!({ "ok": true, "wasPaused": was_paused })).into_response()
        }
        None => error_response(Error::NotFound(format!("session {id}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeBody {
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ResumeBody>>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(handle) => {
            let message = body.and_then(|Json(b)| b.message);
            let was_resumed = handle.session.resume(message);
            Json(json!({ "ok": true, "wasResumed": was_resumed })).into_response()
        }
        None => error_response(Error::NotFound(format!("session {id}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /sessions/{id}/fork
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct ForkBody {
    #[serde(default)]
    pub position: Option<usize>,
}

pub async fn fork(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ForkBody>>,
) -> impl IntoResponse {
    let position = body.and_then(|Json(b)| b.position);
    match state.fork_session(&id, position) {
        Ok((new_session_id, copied)) => Json(json!({
            "sessionId": new_session_id,
            "originalSessionId": id,
            "eventsCopied": copied,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}
