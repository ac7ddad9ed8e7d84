//! The per-session media WebSocket (§4.9, §6): inbound binary PCM32F
//! frames drive VAD/barge-in detection and turn admission; outbound
//! [`OutboundMessage`]s (control events, audio packets, blendshape
//! frames) are forwarded as JSON text frames in emission order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::messages::{CancelReason, ControlEvent, OutboundMessage};
use crate::pipeline::TurnOutcome;
use crate::session::{SessionId, TurnEvent, TurnState};

use super::state::SessionRuntime;
use super::AppState;

const MEDIA_SAMPLE_RATE_HZ: u32 = 16_000;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

pub async fn media_channel(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(runtime) = state.get_runtime(id) else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| run_media_channel(state, runtime, socket))
}

async fn run_media_channel(state: AppState, runtime: Arc<SessionRuntime>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CHANNEL_CAPACITY);
    *runtime.outbound.lock() = Some(outbound_tx.clone());

    let forward = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode outbound message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    runtime.session.apply(TurnEvent::SessionOpen);
    let _ = outbound_tx
        .send(OutboundMessage::Control(ControlEvent::StateChange {
            session_id: runtime.session.id,
            state: "listening".to_string(),
        }))
        .await;

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Binary(bytes) => handle_audio_chunk(&state, &runtime, &bytes).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(turn) = runtime.session.current_turn() {
        turn.mark_cancelled(CancelReason::UserStop);
    }
    runtime.session.apply(TurnEvent::SessionClose);
    forward.abort();
    info!(session_id = %runtime.session.id, "media channel closed");
}

fn samples_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

async fn handle_audio_chunk(state: &AppState, runtime: &Arc<SessionRuntime>, bytes: &[u8]) {
    let samples = samples_from_le_bytes(bytes);
    if samples.is_empty() {
        return;
    }

    match runtime.session.state() {
        TurnState::Listening => {
            let output = runtime.vad.lock().process_chunk(&samples);
            if let Some(segment) = output.segment {
                spawn_turn(state.clone(), runtime.clone(), segment);
            }
        }
        TurnState::Speaking => {
            let output = runtime.vad.lock().process_chunk_for_bargein(&samples);
            if output.barge_in {
                if let Some(signal) = runtime.current_signal.lock().clone() {
                    runtime.session.apply(TurnEvent::BargeIn);
                    signal.raise(CancelReason::UserBargeIn);
                    if let Some(turn) = runtime.session.current_turn() {
                        turn.mark_cancelled(CancelReason::UserBargeIn);
                    }
                    state.metrics.record_barge_in();
                    runtime.record.lock().record_barge_in();
                }
            }
        }
        _ => {}
    }
}

/// Run one full turn: ASR over the VAD-declared segment, then hand off to
/// the orchestrator. Spawned so the media read loop keeps draining
/// incoming audio (and can detect barge-in) while the turn is in flight.
fn spawn_turn(state: AppState, runtime: Arc<SessionRuntime>, segment: Vec<f32>) {
    tokio::spawn(async move {
        let outbound = match runtime.outbound.lock().clone() {
            Some(tx) => tx,
            None => return,
        };

        let transcription = match runtime
            .orchestrator_transcribe(&state, segment)
            .await
        {
            Some(t) if !t.text.trim().is_empty() => t,
            _ => return,
        };

        let handle = state
            .orchestrator
            .begin_turn(&runtime.session, transcription.text);
        *runtime.current_signal.lock() = Some(handle.signal.clone());

        let outcome = {
            let mut context = runtime.context.lock();
            let rollovers_before = context.rollover_count();
            let outcome = state
                .orchestrator
                .drive_turn(&runtime.session, &handle, &mut context, &outbound)
                .await;
            if context.rollover_count() > rollovers_before {
                state.metrics.record_context_rollover();
                runtime.record.lock().record_context_rollover();
            }
            outcome
        };

        *runtime.current_signal.lock() = None;

        match outcome {
            Ok(TurnOutcome::Completed { ttfa_ms }) => {
                state.metrics.record_ttfa(ttfa_ms);
                let audio_ms = runtime.session.audio_clock_ms();
                runtime.record.lock().record_turn(audio_ms, Some(ttfa_ms));
            }
            Ok(TurnOutcome::Cancelled { .. }) => {
                // Barge-in / explicit stop is a control-flow signal (§7:
                // `CancellationObserved` is explicitly not an error) and
                // must not inflate the error rate the backpressure ladder
                // reacts to.
                state.metrics.record_turn_ok();
            }
            Ok(TurnOutcome::TimedOut | TurnOutcome::ContextOverflow) => {
                state.metrics.record_turn_error();
            }
            Ok(TurnOutcome::StageError(reason)) => {
                warn!(session_id = %runtime.session.id, reason, "turn ended with a stage error");
                state.metrics.record_turn_error();
            }
            Err(err) => {
                warn!(session_id = %runtime.session.id, error = %err, "turn driver errored");
                state.metrics.record_turn_error();
            }
        }
    });
}

impl SessionRuntime {
    async fn orchestrator_transcribe(
        &self,
        state: &AppState,
        segment: Vec<f32>,
    ) -> Option<crate::pipeline::messages::Transcription> {
        state
            .orchestrator
            .transcribe(segment, MEDIA_SAMPLE_RATE_HZ, CancellationToken::new())
            .await
            .unwrap_or_else(|err| {
                warn!(session_id = %self.session.id, error = %err, "asr pass failed");
                None
            })
    }
}
