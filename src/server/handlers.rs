//! HTTP admission handlers (§6): create/inspect/close a session, and force
//! a turn cancellation without going through barge-in detection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;
use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::llm::{ContextBuffer, PinnedPrefix};
use crate::pipeline::messages::CancelReason;
use crate::session::{AdmissionDecision, SessionId, TurnState};

use super::state::SessionRuntime;
use super::AppState;

const MEDIA_SAMPLE_RATE_HZ: u32 = 16_000;

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub ws_path: String,
}

/// `POST /sessions`. Runs the session through admission against the live
/// backpressure level before ever touching the session table: an
/// `Admitted` decision creates the session (and its runtime) immediately;
/// `Queued`/`Rejected` both become a `503` with `Retry-After`, distinguished
/// only by message (the client-visible contract doesn't separate them —
/// a queued caller and a rejected caller both just retry later).
pub async fn create_session(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let level = state.backpressure.level();
    let session = match state.manager.admit(level) {
        AdmissionDecision::Admitted(session) => session,
        AdmissionDecision::Queued { retry_after_ms } => {
            return Err(OrchestratorError::Admission {
                reason: "at capacity; retry shortly".to_string(),
                retry_after_ms,
            });
        }
        AdmissionDecision::Rejected {
            reason,
            retry_after_ms,
        } => {
            return Err(OrchestratorError::Admission {
                reason,
                retry_after_ms,
            });
        }
    };

    let pinned = PinnedPrefix::new(String::new());
    let context = ContextBuffer::new(
        pinned,
        session.config.inner.llm_context.max_context_tokens,
        session.config.inner.llm_context.rollover_trigger_tokens,
    );
    let runtime = std::sync::Arc::new(SessionRuntime::new(
        session.clone(),
        context,
        MEDIA_SAMPLE_RATE_HZ,
    ));
    state.insert_runtime(session.id, runtime);

    info!(session_id = %session.id, "session admitted");
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            ws_path: format!("/sessions/{}/ws", session.id),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: SessionId,
    pub state: String,
    pub audio_clock_ms: u64,
}

fn state_label(state: TurnState) -> &'static str {
    match state {
        TurnState::Idle => "idle",
        TurnState::Listening => "listening",
        TurnState::Thinking => "thinking",
        TurnState::Speaking => "speaking",
        TurnState::Interrupted => "interrupted",
    }
}

/// `GET /sessions/{id}`.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<impl IntoResponse> {
    let session = state
        .manager
        .get(id)
        .ok_or(OrchestratorError::SessionNotFound(id.0))?;
    Ok(Json(SessionStatusResponse {
        session_id: session.id,
        state: state_label(session.state()).to_string(),
        audio_clock_ms: session.audio_clock_ms(),
    }))
}

/// `DELETE /sessions/{id}`. Raises cancellation on any in-flight turn
/// first so the pipeline tasks unwind promptly instead of being abandoned
/// mid-stream, then drops the session and its runtime. Idempotent (§8:
/// "session close is idempotent") — a session that's already gone is a
/// no-op `204`, not a `404`.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<impl IntoResponse> {
    if let Some(runtime) = state.get_runtime(id) {
        if let Some(turn) = runtime.session.current_turn() {
            turn.mark_cancelled(CancelReason::UserStop);
        }
    }
    match state.manager.close(id) {
        Ok(_) | Err(OrchestratorError::SessionNotFound(_)) => {}
        Err(err) => return Err(err),
    }
    if let Some(runtime) = state.remove_runtime(id) {
        let mut record = runtime.record.lock();
        record.close("closed");
        let _ = state.analytics.append_session(&record);
    }
    info!(session_id = %id, "session closed");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /sessions/{id}/cancel`. Explicit user-stop, distinct from
/// barge-in: cancels whatever turn is in flight without requiring new
/// speech energy to trigger it.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<impl IntoResponse> {
    let runtime = state
        .get_runtime(id)
        .ok_or(OrchestratorError::SessionNotFound(id.0))?;
    match runtime.session.current_turn() {
        Some(turn) => {
            turn.mark_cancelled(CancelReason::UserStop);
            Ok(StatusCode::ACCEPTED)
        }
        None => Ok(StatusCode::NO_CONTENT),
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub active_sessions: usize,
    pub backpressure_level: String,
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        active_sessions: state.manager.active_count(),
        backpressure_level: format!("{:?}", state.backpressure.level()),
    })
}
