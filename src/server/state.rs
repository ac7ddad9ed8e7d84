//! Shared application state and the per-session runtime data the serving
//! shell layers on top of the core [`Session`] — a context buffer, a VAD
//! instance, and the running analytics record. None of this is needed by
//! the core pipeline itself; `SessionManager` only ever sees a bare
//! `Session`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::analytics::{AnalyticsSink, SessionRecord};
use crate::backpressure::{BackpressureController, BackpressureLevel};
use crate::config::OrchestratorConfig;
use crate::llm::ContextBuffer;
use crate::metrics::WorkerMetrics;
use crate::pipeline::cancellation::CancellationSignal;
use crate::pipeline::messages::OutboundMessage;
use crate::pipeline::Orchestrator;
use crate::session::{Session, SessionId, SessionManager};
use crate::vad::VoiceActivityDetector;

/// Everything the media-channel handler needs for one live session beyond
/// what [`Session`] itself tracks.
pub struct SessionRuntime {
    pub session: Arc<Session>,
    pub context: Mutex<ContextBuffer>,
    pub vad: Mutex<VoiceActivityDetector>,
    pub record: Mutex<SessionRecord>,
    /// Set once the client's media WebSocket connects; turns started
    /// before that point have nowhere to send audio, so the orchestrator
    /// is only ever driven from within the WebSocket handler.
    pub outbound: Mutex<Option<mpsc::Sender<OutboundMessage>>>,
    /// The in-flight turn's cancellation signal, if any — set by the
    /// media loop when it launches a turn, read by the same loop to raise
    /// barge-in/stop cancellation without waiting on the turn-driving task.
    pub current_signal: Mutex<Option<Arc<CancellationSignal>>>,
}

impl SessionRuntime {
    #[must_use]
    pub fn new(session: Arc<Session>, context: ContextBuffer, sample_rate: u32) -> Self {
        Self {
            record: Mutex::new(SessionRecord::new(session.id)),
            session,
            context: Mutex::new(context),
            vad: Mutex::new(VoiceActivityDetector::new(sample_rate)),
            outbound: Mutex::new(None),
            current_signal: Mutex::new(None),
        }
    }
}

/// Shared services passed to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub manager: Arc<SessionManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub backpressure: Arc<BackpressureController>,
    pub metrics: Arc<WorkerMetrics>,
    pub analytics: Arc<dyn AnalyticsSink>,
    runtimes: Arc<RwLock<HashMap<SessionId, Arc<SessionRuntime>>>>,
    last_logged_level: Arc<AtomicU8>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Arc<OrchestratorConfig>,
        manager: Arc<SessionManager>,
        orchestrator: Arc<Orchestrator>,
        backpressure: Arc<BackpressureController>,
        metrics: Arc<WorkerMetrics>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            config,
            manager,
            orchestrator,
            backpressure,
            metrics,
            analytics,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            last_logged_level: Arc::new(AtomicU8::new(BackpressureLevel::Normal as u8)),
        }
    }

    pub fn insert_runtime(&self, id: SessionId, runtime: Arc<SessionRuntime>) {
        self.runtimes.write().insert(id, runtime);
    }

    #[must_use]
    pub fn get_runtime(&self, id: SessionId) -> Option<Arc<SessionRuntime>> {
        self.runtimes.read().get(&id).cloned()
    }

    pub fn remove_runtime(&self, id: SessionId) -> Option<Arc<SessionRuntime>> {
        self.runtimes.write().remove(&id)
    }

    /// Push `message` to every session whose media channel is connected.
    /// Used for process-wide control events (e.g. `Degraded{level}`) that
    /// aren't scoped to a single turn's outbound sender.
    pub fn broadcast(&self, message: OutboundMessage) {
        for runtime in self.runtimes.read().values() {
            if let Some(tx) = runtime.outbound.lock().clone() {
                let _ = tx.try_send(message.clone());
            }
        }
    }

    #[must_use]
    pub fn last_logged_level(&self) -> BackpressureLevel {
        match self.last_logged_level.load(Ordering::Relaxed) {
            0 => BackpressureLevel::Normal,
            1 => BackpressureLevel::AnimationYield,
            2 => BackpressureLevel::VerbosityReduce,
            3 => BackpressureLevel::ToolRefuse,
            4 => BackpressureLevel::SessionQueue,
            _ => BackpressureLevel::SessionReject,
        }
    }

    pub fn set_last_logged_level(&self, level: BackpressureLevel) {
        self.last_logged_level.store(level as u8, Ordering::Relaxed);
    }
}
