//! Session admission and the session registry (§4.1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::turn::{Session, SessionConfig};
use super::SessionId;
use crate::backpressure::BackpressureLevel;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

/// Outcome of an admission request.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    /// Session admitted and already registered in the table.
    Admitted(Arc<Session>),
    /// Capacity is full but the caller may retry after the given delay;
    /// entered when backpressure is at `SESSION_QUEUE` or capacity is
    /// transiently exhausted but the admission queue has room.
    Queued { retry_after_ms: u64 },
    /// Rejected outright: queue is full, or backpressure is at
    /// `SESSION_REJECT`.
    Rejected { reason: String, retry_after_ms: u64 },
}

/// Owns the live session registry and makes admission decisions against
/// `max_concurrent_sessions` and the current [`BackpressureLevel`].
///
/// A `RwLock<HashMap<..>>` is sufficient here: admission and sweep both
/// hold the lock only for map bookkeeping, never across an `.await`,
/// matching the no-lock-across-await discipline used for a session's own
/// turn state.
pub struct SessionManager {
    config: Arc<OrchestratorConfig>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether a new session may be admitted against the current
    /// backpressure level, and if so create and register it — all under a
    /// single write-lock acquisition, so the capacity check and the
    /// registry insert are one atomic step (§4.1: "admission decision and
    /// counter update are a single atomic step (no double-admit race)").
    /// A two-step check-then-insert across separate lock acquisitions would
    /// let two concurrent callers both observe spare capacity and both
    /// insert, exceeding the cap.
    pub fn admit(&self, level: BackpressureLevel) -> AdmissionDecision {
        if level == BackpressureLevel::SessionReject {
            return AdmissionDecision::Rejected {
                reason: "backpressure at SESSION_REJECT".to_string(),
                retry_after_ms: self.config.admission.queue_deadline_ms,
            };
        }

        let mut sessions = self.sessions.write();
        let active = sessions.len();

        if active < self.config.admission.max_concurrent_sessions
            && level != BackpressureLevel::SessionQueue
        {
            let session = Arc::new(Session::new(SessionConfig::new(self.config.clone())));
            sessions.insert(session.id, session.clone());
            return AdmissionDecision::Admitted(session);
        }

        if active >= self.config.admission.max_concurrent_sessions
            + self.config.admission.queue_capacity
        {
            return AdmissionDecision::Rejected {
                reason: "admission queue is full".to_string(),
                retry_after_ms: self.config.admission.queue_deadline_ms,
            };
        }

        AdmissionDecision::Queued {
            retry_after_ms: self.config.admission.queue_deadline_ms,
        }
    }

    /// Register an already-constructed session directly, bypassing
    /// admission. Used by tests that need sessions in the table without
    /// exercising the capacity ladder.
    #[cfg(test)]
    pub fn create_session(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionConfig::new(self.config.clone())));
        self.sessions.write().insert(session.id, session.clone());
        session
    }

    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Remove and return a session, if present.
    pub fn close(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .write()
            .remove(&id)
            .ok_or(OrchestratorError::SessionNotFound(id.0))
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Remove sessions idle longer than `session_idle_timeout_s`, returning
    /// their ids. Intended to run on a periodic sweep task.
    pub fn sweep_idle(&self) -> Vec<SessionId> {
        let timeout = Duration::from_secs(self.config.admission.session_idle_timeout_s);
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| session.idle_for() >= timeout)
            .map(|(id, _)| *id)
            .collect();

        if expired.is_empty() {
            return expired;
        }

        let mut sessions = self.sessions.write();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }
}
