//! Append-only analytics sink (§6): one terminal [`SessionRecord`] per
//! session plus a running [`EventRecord`] log, persisted as JSONL.
//!
//! The pipeline treats analytics as an external collaborator it reports
//! into, not a dependency it reads back from — this module only ever
//! appends. Modeled on a conventional append-only JSONL audit log,
//! simplified: no chained integrity hash, since session analytics
//! is operational telemetry rather than a security audit trail.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backpressure::BackpressureLevel;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::session::{SessionId, TurnId};

/// Terminal per-session summary. Fields before `ended_at` are written at
/// session creation and updated in place as the session progresses;
/// `ended_at`/`state` are the only fields set once, at session close —
/// matching the "append-only except terminal fields" rule of the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub final_state: Option<String>,
    pub turns_completed: u64,
    pub total_audio_ms: u64,
    pub avg_ttfa_ms: f64,
    pub barge_in_count: u64,
    pub context_rollover_count: u64,
}

impl SessionRecord {
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            created_at: chrono::Utc::now(),
            ended_at: None,
            final_state: None,
            turns_completed: 0,
            total_audio_ms: 0,
            avg_ttfa_ms: 0.0,
            barge_in_count: 0,
            context_rollover_count: 0,
        }
    }

    /// Fold one completed turn's measurements into the running averages.
    pub fn record_turn(&mut self, audio_ms: u64, ttfa_ms: Option<u64>) {
        let prior_total = self.turns_completed;
        self.turns_completed += 1;
        self.total_audio_ms += audio_ms;
        if let Some(ttfa_ms) = ttfa_ms {
            let weighted = self.avg_ttfa_ms * prior_total as f64 + ttfa_ms as f64;
            self.avg_ttfa_ms = weighted / self.turns_completed as f64;
        }
    }

    pub fn record_barge_in(&mut self) {
        self.barge_in_count += 1;
    }

    pub fn record_context_rollover(&mut self) {
        self.context_rollover_count += 1;
    }

    pub fn close(&mut self, final_state: &str) {
        self.ended_at = Some(chrono::Utc::now());
        self.final_state = Some(final_state.to_string());
    }
}

/// One point-in-time event appended to a session's event log (backpressure
/// transitions, turn outcomes, admission decisions — anything worth a
/// durable trace beyond the terminal [`SessionRecord`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: SessionId,
    pub turn_id: Option<TurnId>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub t_audio_ms: Option<u64>,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl EventRecord {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        turn_id: Option<TurnId>,
        t_audio_ms: Option<u64>,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            turn_id,
            recorded_at: chrono::Utc::now(),
            t_audio_ms,
            event_type: event_type.into(),
            event_data,
        }
    }

    #[must_use]
    pub fn backpressure_transition(session_id: SessionId, level: BackpressureLevel) -> Self {
        Self::new(
            session_id,
            None,
            None,
            "backpressure_transition",
            serde_json::json!({ "level": format!("{level:?}") }),
        )
    }
}

/// Append-only analytics sink. Implementations must never rewrite or
/// remove a previously appended record.
pub trait AnalyticsSink: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the record could not be durably appended.
    fn append_session(&self, record: &SessionRecord) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the record could not be durably appended.
    fn append_event(&self, record: &EventRecord) -> Result<()>;
}

/// In-memory sink for tests: keeps every appended record, in append order.
#[derive(Debug, Default)]
pub struct InMemoryAnalyticsSink {
    sessions: Mutex<Vec<SessionRecord>>,
    events: Mutex<Vec<EventRecord>>,
}

impl InMemoryAnalyticsSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions.lock().clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }
}

impl AnalyticsSink for InMemoryAnalyticsSink {
    fn append_session(&self, record: &SessionRecord) -> Result<()> {
        self.sessions.lock().push(record.clone());
        Ok(())
    }

    fn append_event(&self, record: &EventRecord) -> Result<()> {
        self.events.lock().push(record.clone());
        Ok(())
    }
}

/// JSON-lines file-backed sink: one file for session records, one for the
/// event log, both opened in append mode and flushed on every write so a
/// crash loses at most the in-flight line.
pub struct JsonlAnalyticsSink {
    sessions_path: PathBuf,
    events_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAnalyticsSink {
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            sessions_path: dir.join("sessions.jsonl"),
            events_path: dir.join("events.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    /// Default analytics directory alongside the orchestrator config file.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cadenza")
            .join("analytics")
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

impl AnalyticsSink for JsonlAnalyticsSink {
    fn append_session(&self, record: &SessionRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| crate::error::OrchestratorError::Io(std::io::Error::other(e)))?;
        self.append_line(&self.sessions_path, &line)
    }

    fn append_event(&self, record: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| crate::error::OrchestratorError::Io(std::io::Error::other(e)))?;
        self.append_line(&self.events_path, &line)
    }
}

/// Build the analytics sink configured for a running orchestrator. Falls
/// back to the in-memory sink when no on-disk location is configured,
/// matching `OrchestratorConfig`'s "every nested struct defaults to a
/// conservative, working configuration" rule.
#[must_use]
pub fn sink_for_config(config: &OrchestratorConfig) -> Arc<dyn AnalyticsSink> {
    if config.admission.max_concurrent_sessions == 0 {
        return Arc::new(InMemoryAnalyticsSink::new());
    }
    match JsonlAnalyticsSink::new(&JsonlAnalyticsSink::default_dir()) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "analytics: falling back to in-memory sink");
            Arc::new(InMemoryAnalyticsSink::new())
        }
    }
}
