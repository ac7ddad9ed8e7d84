//! Minimal latency harness: drives a batch of simulated turns through the
//! orchestrator with the in-memory mock engines and reports the observed
//! time-to-first-audio distribution against the `TTFA_TARGET_MS` contract.

use std::sync::Arc;
use std::time::Duration;

use cadenza::adapters::mock::{MockAnimationEngine, MockAsrEngine, MockLlmEngine, MockTtsEngine};
use cadenza::backpressure::BackpressureController;
use cadenza::config::OrchestratorConfig;
use cadenza::llm::{ContextBuffer, PinnedPrefix, Summarizer};
use cadenza::pipeline::messages::OutboundMessage;
use cadenza::{Orchestrator, TurnOutcome, WorkerMetrics};
use serde::Serialize;
use tokio::sync::mpsc;

const TURN_COUNT: usize = 200;

struct NoopSummarizer;

#[async_trait::async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(
        &self,
        existing_summary: &str,
        _folded: &[cadenza::llm::RollingEntry],
    ) -> std::result::Result<String, String> {
        Ok(existing_summary.to_string())
    }
}

#[derive(Debug, Serialize)]
struct LatencyReport {
    scenario: &'static str,
    samples: usize,
    ttfa_p95_ms: f32,
    error_rate_pct: f32,
    target_ms: u64,
    met_target: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrchestratorConfig::default();
    let target_ms = config.turn.ttfa_target_ms;

    let backpressure = Arc::new(BackpressureController::new(config.backpressure.clone()));
    let orchestrator = Orchestrator::new(
        Arc::new(MockAsrEngine::default()),
        Arc::new(MockLlmEngine {
            response: "a short, synthetic assistant response for latency measurement".to_string(),
            first_token_delay: Duration::from_millis(40),
            token_delay: Duration::from_millis(5),
        }),
        Arc::new(MockTtsEngine::default()),
        Arc::new(MockAnimationEngine::default()),
        Arc::new(NoopSummarizer),
        backpressure,
    );

    let metrics = WorkerMetrics::new();

    for i in 0..TURN_COUNT {
        let session = Arc::new(cadenza::Session::new(cadenza::session::SessionConfig::new(
            Arc::new(config.clone()),
        )));
        session.apply(cadenza::session::TurnEvent::SessionOpen);

        let mut context = ContextBuffer::new(
            PinnedPrefix::new("you are a helpful voice assistant"),
            config.llm_context.max_context_tokens,
            config.llm_context.rollover_trigger_tokens,
        );
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(256);

        let handle = orchestrator.begin_turn(&session, format!("synthetic turn {i}"));
        let outcome = orchestrator
            .drive_turn(&session, &handle, &mut context, &outbound_tx)
            .await;
        drop(outbound_tx);
        while outbound_rx.recv().await.is_some() {}

        match outcome {
            Ok(TurnOutcome::Completed { ttfa_ms }) => metrics.record_ttfa(ttfa_ms),
            _ => metrics.record_turn_error(),
        }
    }

    let snapshot = metrics.snapshot();
    let report = LatencyReport {
        scenario: "mock_turn_roundtrip",
        samples: TURN_COUNT,
        ttfa_p95_ms: snapshot.ttfa_p95_ms,
        error_rate_pct: snapshot.error_rate_pct,
        target_ms,
        met_target: (snapshot.ttfa_p95_ms as u64) <= target_ms,
    };

    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");

    let output_dir = dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cadenza")
        .join("diagnostics");
    std::fs::create_dir_all(&output_dir)?;
    let output_path = output_dir.join("latency-baseline.json");
    std::fs::write(&output_path, &json)?;
    println!("saved baseline report: {}", output_path.display());

    Ok(())
}
