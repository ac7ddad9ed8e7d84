//! The thin serving shell around the core pipeline (§6): session admission
//! over HTTP, and the media/control channel over a WebSocket.
//!
//! Per spec §1 the wire format of the media channel is an external
//! collaborator ("a low-jitter bidirectional media channel carrying
//! Opus/PCM packets, plus a reliable control channel"); this module
//! realizes that contract as a single WebSocket per session carrying
//! binary PCM frames inbound and JSON-framed [`crate::pipeline::messages::OutboundMessage`]
//! values outbound, rather than a full SDP/WebRTC negotiation.

mod handlers;
mod media;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::adapters::mock::{MockAnimationEngine, MockAsrEngine, MockLlmEngine, MockTtsEngine};
use crate::adapters::{AnimationEngine, AsrEngine, LlmEngine, TtsEngine};
use crate::analytics::{sink_for_config, AnalyticsSink};
use crate::backpressure::BackpressureController;
use crate::config::OrchestratorConfig;
use crate::llm::Summarizer;
use crate::metrics::WorkerMetrics;
use crate::pipeline::messages::{ControlEvent, OutboundMessage};
use crate::pipeline::Orchestrator;
use crate::session::SessionManager;

pub use state::AppState;

/// A no-op summarizer that truncates folded entries into a fixed-width
/// summary string. Stands in for a real summarization call (§4.5, Open
/// Questions: "left as an implementation choice"); swap via
/// [`ServerBuilder::summarizer`] for a real one.
struct TruncatingSummarizer;

#[async_trait::async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(
        &self,
        existing_summary: &str,
        folded: &[crate::llm::RollingEntry],
    ) -> std::result::Result<String, String> {
        let mut summary = existing_summary.to_string();
        for entry in folded {
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(&entry.text.chars().take(80).collect::<String>());
        }
        Ok(summary)
    }
}

/// Assembles the shared services an [`AppState`] needs and builds the
/// router. Defaults every engine adapter to its in-memory mock so the
/// server is runnable with no external dependencies configured; swap any
/// of them in before [`Self::build`] to point at real engines.
pub struct ServerBuilder {
    config: Arc<OrchestratorConfig>,
    asr: Arc<dyn AsrEngine>,
    llm: Arc<dyn LlmEngine>,
    tts: Arc<dyn TtsEngine>,
    animation: Arc<dyn AnimationEngine>,
    summarizer: Arc<dyn Summarizer>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl ServerBuilder {
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        let config = Arc::new(config);
        Self {
            analytics: sink_for_config(&config),
            config,
            asr: Arc::new(MockAsrEngine::default()),
            llm: Arc::new(MockLlmEngine::default()),
            tts: Arc::new(MockTtsEngine::default()),
            animation: Arc::new(MockAnimationEngine::default()),
            summarizer: Arc::new(TruncatingSummarizer),
        }
    }

    #[must_use]
    pub fn asr(mut self, asr: Arc<dyn AsrEngine>) -> Self {
        self.asr = asr;
        self
    }

    #[must_use]
    pub fn llm(mut self, llm: Arc<dyn LlmEngine>) -> Self {
        self.llm = llm;
        self
    }

    #[must_use]
    pub fn tts(mut self, tts: Arc<dyn TtsEngine>) -> Self {
        self.tts = tts;
        self
    }

    #[must_use]
    pub fn animation(mut self, animation: Arc<dyn AnimationEngine>) -> Self {
        self.animation = animation;
        self
    }

    #[must_use]
    pub fn build(self) -> AppState {
        let backpressure = Arc::new(BackpressureController::new(self.config.backpressure.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            self.asr,
            self.llm,
            self.tts,
            self.animation,
            self.summarizer,
            backpressure.clone(),
        ));
        AppState::new(
            self.config.clone(),
            Arc::new(SessionManager::new(self.config)),
            orchestrator,
            backpressure,
            Arc::new(WorkerMetrics::new()),
            self.analytics,
        )
    }
}

/// Build the full axum router for a given [`AppState`].
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::close_session),
        )
        .route("/sessions/{id}/cancel", post(handlers::cancel_session))
        .route("/sessions/{id}/ws", get(media::media_channel))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Spawn the background tasks that keep the backpressure ladder and the
/// session table honest: a once-a-second metrics sample, and an idle
/// sweep at the configured cadence. Both run for the lifetime of the
/// process; callers that want a clean shutdown should hold the returned
/// handles and abort them.
pub fn spawn_background_tasks(state: AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let sampler_state = state.clone();
    let sampler = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let mut snapshot = sampler_state.metrics.snapshot();
            snapshot.active_sessions = sampler_state.manager.active_count();
            snapshot.max_concurrent_sessions = sampler_state.config.admission.max_concurrent_sessions;
            let level = sampler_state.backpressure.observe(snapshot);
            if level != sampler_state.last_logged_level() {
                info!(?level, "backpressure level changed");
                sampler_state.set_last_logged_level(level);
                sampler_state.broadcast(OutboundMessage::Control(ControlEvent::Degraded {
                    level: level.to_string(),
                }));
            }
        }
    });

    let sweep_state = state.clone();
    let sweep = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            for id in sweep_state.manager.sweep_idle() {
                sweep_state.remove_runtime(id);
                info!(session_id = %id, "swept idle session");
            }
        }
    });

    vec![sampler, sweep]
}
