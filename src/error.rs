//! Error taxonomy for the speech-to-speech orchestrator.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

/// Which pipeline stage raised a [`OrchestratorError::Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Asr,
    Llm,
    Tts,
    Animation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Asr => "ASR",
            Stage::Llm => "LLM",
            Stage::Tts => "TTS",
            Stage::Animation => "animation",
        };
        f.write_str(s)
    }
}

/// Top-level error type for the orchestrator.
///
/// Variants map to the error taxonomy in the design (admission, config,
/// per-stage, context overflow, timeout, transport). `CancellationObserved`
/// is deliberately not a member of this enum: it is a control-flow signal,
/// not an error, and is represented as a normal return value instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Admission rejected: capacity exhausted or backpressure at SESSION_REJECT.
    #[error("admission rejected: {reason}")]
    Admission {
        reason: String,
        retry_after_ms: u64,
    },

    /// Invalid or missing configuration. Fail-fast at startup.
    #[error("config error: {0}")]
    Config(String),

    /// A stage adapter failed outside of cancellation.
    #[error("{stage} error: {message}")]
    Stage { stage: Stage, message: String },

    /// Summarization failed or exceeded its deadline during context rollover.
    #[error("context limit reached: {0}")]
    ContextOverflow(String),

    /// A deadline elapsed (pre-first-audio turn timeout, or a stage's
    /// cancellation-acknowledgement deadline).
    #[error("timeout: {0}")]
    Timeout(String),

    /// The media or control channel failed; the session must reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// No session exists with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    /// Channel send/receive failure between pipeline stages.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error (config files, analytics sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            OrchestratorError::Admission { reason, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, reason.clone())
            }
            OrchestratorError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            OrchestratorError::Stage { .. } => (StatusCode::BAD_GATEWAY, self.to_string()),
            OrchestratorError::ContextOverflow(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            OrchestratorError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            OrchestratorError::Transport(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            OrchestratorError::SessionNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            OrchestratorError::Channel(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            OrchestratorError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let OrchestratorError::Admission { retry_after_ms, .. } = &self {
            if let Ok(value) =
                axum::http::HeaderValue::from_str(&retry_after_ms.div_ceil(1000).to_string())
            {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
