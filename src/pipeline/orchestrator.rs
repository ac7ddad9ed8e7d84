//! Wires ASR→LLM→TTS→Packetizer/Animation for one turn (§4.3).
//!
//! A turn's stages run as independent tasks coordinated only by the shared
//! `CancellationToken` and the session's audio clock — no stage depends on
//! another's internals. The packetizer is fed directly (it must never
//! drop); the animation engine gets a teed copy via a small bounded channel
//! and is free to fall behind or die without touching audio (§4.10, design
//! note on fan-out).

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{
    AnimationEngine, AnimationRequest, AsrEngine, AsrRequest, LlmEngine, LlmRequest, TtsEngine,
    TtsRequest,
};
use crate::animation::{AnimationAction, HeartbeatPolicy};
use crate::audio::Packetizer;
use crate::backpressure::{BackpressureController, BackpressureLevel};
use crate::config::BackpressureConfig;
use crate::error::{OrchestratorError, Result, Stage};
use crate::llm::{ContextBuffer, Role, Summarizer};
use crate::pipeline::cancellation::CancellationSignal;
use crate::pipeline::messages::{
    pin_non_articulation, BlendshapeFrame, CancelReason, ControlEvent, OutboundMessage,
    Transcription,
};
use crate::session::{Session, SessionId, Turn, TurnEvent};

/// Samples per second assumed of the engine-native PCM throughout the
/// pipeline. The wire codec and any resampling at the transport boundary
/// are the collaborator's concern (spec §1); internally everything is
/// f32 PCM at this rate.
const DEFAULT_SAMPLE_RATE: u32 = 16_000;
const DEFAULT_MAX_TOKENS: u32 = 768;
const DEFAULT_VERBOSITY: f32 = 1.0;
/// Required set of stages a turn's cancellation must fully drain before the
/// FSM is allowed to leave INTERRUPTED. ASR is not a member: by the time a
/// `Turn` exists its ASR pass has already produced the final transcript.
const REQUIRED_STAGES: [Stage; 3] = [Stage::Llm, Stage::Tts, Stage::Animation];

/// Outcome of driving one turn to completion, for callers that log or
/// record analytics off of it.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed { ttfa_ms: u64 },
    Cancelled { reason: CancelReason },
    TimedOut,
    ContextOverflow,
    StageError(String),
}

/// A turn that has been registered with its session but not yet driven.
/// Handed back to the caller so barge-in/stop detection (run elsewhere,
/// against the live inbound audio stream) has something to cancel.
pub struct TurnHandle {
    pub turn: Arc<Turn>,
    pub signal: Arc<CancellationSignal>,
}

impl TurnHandle {
    /// Raise cancellation for this turn, recording `reason` on both the
    /// turn (for ttfa/bargein metrics) and the cancellation signal (for
    /// per-stage acknowledgement bookkeeping).
    pub fn raise_cancel(&self, reason: CancelReason) {
        self.signal.raise(reason);
        self.turn.mark_cancelled(reason);
    }
}

/// Owns references to the four engine adapters and the backpressure
/// controller, and drives individual turns against them. Stateless across
/// turns; all per-turn state lives on [`Turn`]/[`TurnHandle`].
pub struct Orchestrator {
    asr: Arc<dyn AsrEngine>,
    llm: Arc<dyn LlmEngine>,
    tts: Arc<dyn TtsEngine>,
    animation: Arc<dyn AnimationEngine>,
    summarizer: Arc<dyn Summarizer>,
    backpressure: Arc<BackpressureController>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        asr: Arc<dyn AsrEngine>,
        llm: Arc<dyn LlmEngine>,
        tts: Arc<dyn TtsEngine>,
        animation: Arc<dyn AnimationEngine>,
        summarizer: Arc<dyn Summarizer>,
        backpressure: Arc<BackpressureController>,
    ) -> Self {
        Self {
            asr,
            llm,
            tts,
            animation,
            summarizer,
            backpressure,
        }
    }

    /// Drive one complete ASR pass over a VAD-declared speech segment,
    /// returning the final transcript (if the engine produced one before
    /// cancellation).
    ///
    /// # Errors
    ///
    /// Returns an error if the ASR engine cannot be started.
    pub async fn transcribe(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<Option<Transcription>> {
        let mut stream = self
            .asr
            .start(AsrRequest { samples, sample_rate }, cancel.clone())
            .await?;
        let mut last = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(last),
                maybe = stream.next() => {
                    match maybe {
                        Some(t) => {
                            let is_final = t.is_final;
                            last = Some(t);
                            if is_final {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(last)
    }

    /// Register a new turn against `session`, without driving it. Returns
    /// a handle the caller keeps around to raise cancellation (barge-in,
    /// explicit stop) while [`Self::drive_turn`] runs concurrently.
    #[must_use]
    pub fn begin_turn(&self, session: &Session, user_text: String) -> TurnHandle {
        let turn = session.begin_turn(user_text);
        let signal = Arc::new(CancellationSignal::new(turn.cancel.clone()));
        TurnHandle { turn, signal }
    }

    /// Drive a turn from THINKING through to its natural or cancelled end.
    /// `context` is the session's LLM context buffer; the caller owns its
    /// lifetime across turns.
    ///
    /// # Errors
    ///
    /// Returns an error only for conditions the caller cannot recover
    /// from locally (transport failure, a turn launched from the wrong
    /// FSM state). Engine-level failures are absorbed into
    /// [`TurnOutcome`] per the degraded-output policy.
    pub async fn drive_turn(
        &self,
        session: &Arc<Session>,
        handle: &TurnHandle,
        context: &mut ContextBuffer,
        outbound: &mpsc::Sender<OutboundMessage>,
    ) -> Result<TurnOutcome> {
        let turn = handle.turn.clone();
        let signal = handle.signal.clone();

        if session.apply(TurnEvent::EndpointDetected).is_none() {
            return Err(OrchestratorError::Stage {
                stage: Stage::Llm,
                message: "turn launched while session was not LISTENING".to_string(),
            });
        }

        context.rolling.push(Role::User, turn.user_text.clone());

        if context.needs_rollover() {
            let deadline_ms = session.config.inner.llm_context.summarization_deadline_ms;
            if let Err(err) = context.rollover(self.summarizer.as_ref(), deadline_ms).await {
                warn!(session_id = %session.id, turn_id = %turn.id, error = %err, "context rollover failed; ending turn with a fallback");
                let _ = self
                    .speak_fallback(
                        session,
                        &turn,
                        outbound,
                        "I've lost track of part of our conversation and can't continue this turn.",
                    )
                    .await;
                session.apply(TurnEvent::PreFirstAudioTimeout);
                session.clear_turn();
                return Ok(TurnOutcome::ContextOverflow);
            }
        }

        let level = self.backpressure.level();
        let request = Self::build_llm_request(context, &turn.user_text, level, &session.config.inner.backpressure);

        let mut llm_stream = match self.llm.start(request, turn.cancel.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(session_id = %session.id, turn_id = %turn.id, error = %err, "llm failed to start; speaking fallback");
                let _ = self
                    .speak_fallback(session, &turn, outbound, "Sorry, the assistant is unavailable right now.")
                    .await;
                session.apply(TurnEvent::PreFirstAudioTimeout);
                session.clear_turn();
                return Ok(TurnOutcome::StageError(err.to_string()));
            }
        };

        let pre_first_audio_timeout =
            Duration::from_millis(session.config.inner.turn.pre_first_audio_timeout_ms);

        enum FirstToken {
            Token(crate::pipeline::messages::LlmToken),
            TimedOut,
            Cancelled,
            StreamEnded,
        }

        let first = tokio::select! {
            biased;
            () = turn.cancel.cancelled() => FirstToken::Cancelled,
            () = tokio::time::sleep(pre_first_audio_timeout) => FirstToken::TimedOut,
            maybe = llm_stream.next() => match maybe {
                Some(token) => FirstToken::Token(token),
                None => FirstToken::StreamEnded,
            },
        };

        let first_token = match first {
            FirstToken::Cancelled => {
                signal.acknowledge(Stage::Llm);
                signal.acknowledge(Stage::Tts);
                signal.acknowledge(Stage::Animation);
                session.apply(TurnEvent::PreFirstAudioTimeout);
                session.clear_turn();
                return Ok(TurnOutcome::Cancelled {
                    reason: (*turn.cancel_reason.lock()).unwrap_or(CancelReason::UserStop),
                });
            }
            FirstToken::TimedOut => {
                info!(session_id = %session.id, turn_id = %turn.id, "pre-first-audio timeout; no token produced");
                turn.mark_cancelled(CancelReason::Timeout);
                signal.raise(CancelReason::Timeout);
                signal.acknowledge(Stage::Llm);
                signal.acknowledge(Stage::Tts);
                signal.acknowledge(Stage::Animation);
                let _ = outbound
                    .send(OutboundMessage::Control(ControlEvent::TurnTimeout {
                        session_id: session.id,
                        turn_id: turn.id,
                    }))
                    .await;
                session.apply(TurnEvent::PreFirstAudioTimeout);
                session.clear_turn();
                return Ok(TurnOutcome::TimedOut);
            }
            FirstToken::StreamEnded => {
                warn!(session_id = %session.id, turn_id = %turn.id, "llm stream ended before any token");
                let _ = self
                    .speak_fallback(session, &turn, outbound, "Sorry, I couldn't come up with a response.")
                    .await;
                session.apply(TurnEvent::PreFirstAudioTimeout);
                session.clear_turn();
                return Ok(TurnOutcome::StageError("llm produced no tokens".to_string()));
            }
            FirstToken::Token(token) => token,
        };

        *turn.first_token_at.lock() = Some(Instant::now());
        session.apply(TurnEvent::FirstTokenEmitted);
        let _ = outbound
            .send(OutboundMessage::Control(ControlEvent::StateChange {
                session_id: session.id,
                state: "speaking".to_string(),
            }))
            .await;

        let (text_tx, text_rx) = mpsc::channel::<String>(8);
        let first_is_end = first_token.is_end;
        let _ = text_tx.send(first_token.text.clone()).await;

        let llm_cancel = turn.cancel.clone();
        let llm_signal = signal.clone();
        let llm_handle: JoinHandle<String> = tokio::spawn(async move {
            let mut full_response = first_token.text;
            if !first_is_end {
                loop {
                    tokio::select! {
                        () = llm_cancel.cancelled() => break,
                        maybe = llm_stream.next() => {
                            match maybe {
                                Some(tok) => {
                                    let is_end = tok.is_end;
                                    full_response.push_str(&tok.text);
                                    let _ = text_tx.send(tok.text).await;
                                    if is_end {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            llm_signal.acknowledge(Stage::Llm);
            drop(text_tx);
            full_response
        });

        let tts_cancel = turn.cancel.clone();
        let mut tts_stream = match self
            .tts
            .start(TtsRequest { text_stream: text_rx, sample_rate: DEFAULT_SAMPLE_RATE }, tts_cancel)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(session_id = %session.id, turn_id = %turn.id, error = %err, "tts failed to start");
                signal.acknowledge(Stage::Tts);
                signal.acknowledge(Stage::Animation);
                Self::finish_llm_join(&session.config.inner.turn.stage_cancel_deadline_ms.llm_ms, llm_handle, &signal).await;
                session.apply(TurnEvent::TtsCompleteAndPlayoutDrained);
                session.clear_turn();
                return Ok(TurnOutcome::StageError(err.to_string()));
            }
        };

        let animation_cfg = session.config.inner.animation.clone();
        let (audio_tee_tx, audio_tee_rx) = mpsc::channel::<Vec<f32>>(8);
        // Independent of `turn.cancel`: fires once this turn's audio has
        // drained normally, so the animation task winds down even when the
        // turn was never itself cancelled.
        let turn_done = CancellationToken::new();
        let animation_handle = if animation_cfg.enabled && level < BackpressureLevel::AnimationYield {
            Some(tokio::spawn(run_animation_stage(
                self.animation.clone(),
                audio_tee_rx,
                turn.cancel.clone(),
                turn_done.clone(),
                session.clone(),
                animation_cfg,
                outbound.clone(),
                signal.clone(),
            )))
        } else {
            drop(audio_tee_rx);
            signal.acknowledge(Stage::Animation);
            None
        };

        let audio_cfg = &session.config.inner.audio;
        let mut packetizer =
            Packetizer::new(session.id, DEFAULT_SAMPLE_RATE, audio_cfg.packet_ms, audio_cfg.overlap_ms, audio_cfg.pad_trailing_chunk);

        let mut ttfa_ms: Option<u64> = None;
        let cancel = turn.cancel.clone();
        'drain: loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                maybe = tts_stream.next() => maybe,
            };

            let Some(synth) = chunk else {
                if cancel.is_cancelled() {
                    packetizer.abort();
                }
                break 'drain;
            };

            if !synth.samples.is_empty() {
                let _ = audio_tee_tx.try_send(synth.samples.clone());
            }

            for packet in packetizer.push(&synth.samples, synth.is_final, &session.audio_clock) {
                if ttfa_ms.is_none() {
                    *turn.first_audio_at.lock() = Some(Instant::now());
                    let measured = turn.ttfa_ms().unwrap_or(0);
                    ttfa_ms = Some(measured);
                    let _ = outbound
                        .send(OutboundMessage::Control(ControlEvent::TtfaMeasured {
                            session_id: session.id,
                            turn_id: turn.id,
                            ttfa_ms: measured,
                        }))
                        .await;
                }
                if outbound.send(OutboundMessage::Audio(packet)).await.is_err() {
                    return Err(OrchestratorError::Transport(
                        "outbound channel closed mid-turn".to_string(),
                    ));
                }
            }

            if synth.is_final {
                break 'drain;
            }
        }
        drop(audio_tee_tx);
        signal.acknowledge(Stage::Tts);
        // Captured right at acknowledgement, not when the outcome is built
        // below: the Tts stage's ack is the packetizer-stop marker the
        // bargein_latency_ms metric is defined against (§4.6), and the
        // LLM/animation joins that follow would otherwise inflate it.
        let tts_ack_latency_ms = signal.ack_latency_ms(Stage::Tts);
        turn_done.cancel();

        let full_response = Self::finish_llm_join(&session.config.inner.turn.stage_cancel_deadline_ms.llm_ms, llm_handle, &signal)
            .await
            .unwrap_or_default();

        if let Some(handle) = animation_handle {
            let deadline = Duration::from_millis(session.config.inner.turn.stage_cancel_deadline_ms.animation_ms);
            if tokio::time::timeout(deadline, handle).await.is_err() {
                // Detached rather than aborted: the task's own select! over
                // `cancel`/`turn_done` guarantees it exits shortly after.
            }
            signal.acknowledge(Stage::Animation);
        }

        if !full_response.is_empty() {
            context.rolling.push(Role::Assistant, full_response);
        }

        let outcome = if cancel.is_cancelled() {
            let reason = (*turn.cancel_reason.lock()).unwrap_or(CancelReason::UserStop);
            if reason == CancelReason::UserBargeIn {
                if let Some(bargein_latency_ms) = tts_ack_latency_ms {
                    let _ = outbound
                        .send(OutboundMessage::Control(ControlEvent::BargeinAck {
                            session_id: session.id,
                            turn_id: turn.id,
                            bargein_latency_ms,
                        }))
                        .await;
                }
            }
            if session.state() == crate::session::TurnState::Interrupted {
                session.apply(TurnEvent::CancelComplete);
            } else {
                session.apply(TurnEvent::TtsCompleteAndPlayoutDrained);
            }
            TurnOutcome::Cancelled { reason }
        } else {
            session.apply(TurnEvent::TtsCompleteAndPlayoutDrained);
            TurnOutcome::Completed { ttfa_ms: ttfa_ms.unwrap_or(0) }
        };

        session.clear_turn();

        if !signal.fully_acknowledged(&REQUIRED_STAGES) {
            warn!(session_id = %session.id, turn_id = %turn.id, "turn ended without every stage acknowledging cancellation");
        }

        Ok(outcome)
    }

    async fn finish_llm_join(
        deadline_ms: &u64,
        handle: JoinHandle<String>,
        signal: &CancellationSignal,
    ) -> Option<String> {
        let deadline = Duration::from_millis(*deadline_ms);
        let result = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(_)) => None,
            Err(_) => None,
        };
        signal.acknowledge(Stage::Llm);
        result
    }

    fn build_llm_request(
        context: &ContextBuffer,
        user_text: &str,
        level: BackpressureLevel,
        bp_config: &BackpressureConfig,
    ) -> LlmRequest {
        let (max_tokens, verbosity, tools_enabled) = if level >= BackpressureLevel::ToolRefuse {
            (bp_config.tool_refuse_max_tokens, bp_config.verbosity_reduce_verbosity, false)
        } else if level >= BackpressureLevel::VerbosityReduce {
            (bp_config.verbosity_reduce_max_tokens, bp_config.verbosity_reduce_verbosity, true)
        } else {
            (DEFAULT_MAX_TOKENS, DEFAULT_VERBOSITY, true)
        };

        let history = context
            .rolling
            .entries()
            .iter()
            .map(|e| (e.role, e.text.clone()))
            .collect();
        let session_state = (context.summary.tokens > 0).then(|| context.summary.summary.clone());

        LlmRequest {
            pinned_prefix: context.pinned.text.clone(),
            history,
            session_state,
            user_text: user_text.to_string(),
            max_tokens,
            verbosity,
            tools_enabled,
        }
    }

    /// Speak a fixed string through TTS without going through the LLM —
    /// the "canned path" errors during THINKING fall back to (§4.3, §7).
    async fn speak_fallback(
        &self,
        session: &Session,
        turn: &Turn,
        outbound: &mpsc::Sender<OutboundMessage>,
        text: &str,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(text.to_string()).await;
        drop(tx);

        let mut stream = self
            .tts
            .start(TtsRequest { text_stream: rx, sample_rate: DEFAULT_SAMPLE_RATE }, turn.cancel.clone())
            .await?;

        let audio_cfg = &session.config.inner.audio;
        let mut packetizer =
            Packetizer::new(session.id, DEFAULT_SAMPLE_RATE, audio_cfg.packet_ms, audio_cfg.overlap_ms, audio_cfg.pad_trailing_chunk);

        while let Some(synth) = stream.next().await {
            for packet in packetizer.push(&synth.samples, synth.is_final, &session.audio_clock) {
                let _ = outbound.send(OutboundMessage::Audio(packet)).await;
            }
            if synth.is_final {
                break;
            }
        }
        Ok(())
    }
}

/// Drains the teed audio, forwards real frames, and fills cadence gaps via
/// [`HeartbeatPolicy`] until the turn's cancellation token fires. Runs as
/// its own task so a crashed or slow animation engine never blocks audio.
async fn run_animation_stage(
    animation: Arc<dyn AnimationEngine>,
    audio_stream: mpsc::Receiver<Vec<f32>>,
    cancel: CancellationToken,
    turn_done: CancellationToken,
    session: Arc<Session>,
    config: crate::config::AnimationConfig,
    outbound: mpsc::Sender<OutboundMessage>,
    signal: Arc<CancellationSignal>,
) {
    let session_id: SessionId = session.id;
    let fps = config.fps.max(1.0);
    let mut raw_stream = match animation
        .start(AnimationRequest { audio_stream, sample_rate: DEFAULT_SAMPLE_RATE }, cancel.clone())
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "animation engine failed to start; continuing audio-only");
            signal.acknowledge(Stage::Animation);
            return;
        }
    };

    let mut policy = HeartbeatPolicy::new(config);
    let mut ticker = tokio::time::interval(Duration::from_secs_f32(1.0 / fps));
    let mut seq: u64 = 0;
    let mut raw_ended = false;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = turn_done.cancelled() => break,
            maybe = raw_stream.next(), if !raw_ended => {
                match maybe {
                    Some(raw) => {
                        let mut weights = raw.weights;
                        pin_non_articulation(&mut weights);
                        let now = Instant::now();
                        policy.record_real_frame(weights, now);
                        let frame = BlendshapeFrame {
                            session_id,
                            seq: next_seq(&mut seq),
                            t_audio_ms: session.audio_clock_ms(),
                            fps,
                            heartbeat: false,
                            weights,
                        };
                        let _ = outbound.try_send(OutboundMessage::Blendshape(frame));
                    }
                    None => raw_ended = true,
                }
            }
            _ = ticker.tick() => {
                let action = policy.tick(Instant::now(), session_id, session.audio_clock_ms(), 0);
                if let AnimationAction::Emit(mut frame) = action {
                    frame.seq = next_seq(&mut seq);
                    let _ = outbound.try_send(OutboundMessage::Blendshape(frame));
                }
            }
        }
    }

    signal.acknowledge(Stage::Animation);
}

fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockAnimationEngine, MockAsrEngine, MockLlmEngine, MockTtsEngine};
    use crate::backpressure::BackpressureController;
    use crate::config::OrchestratorConfig;
    use crate::llm::{ContextBuffer, PinnedPrefix};
    use crate::session::{SessionConfig, TurnState};

    fn test_orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(MockAsrEngine::default()),
            Arc::new(MockLlmEngine {
                response: "hello there friend".to_string(),
                first_token_delay: Duration::from_millis(1),
                token_delay: Duration::from_millis(1),
            }),
            Arc::new(MockTtsEngine {
                sample_rate: DEFAULT_SAMPLE_RATE,
                ms_per_char: 4.0,
                chunk_delay: Duration::from_millis(1),
            }),
            Arc::new(MockAnimationEngine::default()),
            Arc::new(StubSummarizer),
            Arc::new(BackpressureController::new(Default::default())),
        )
    }

    struct StubSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(
            &self,
            _existing: &str,
            folded: &[crate::llm::RollingEntry],
        ) -> std::result::Result<String, String> {
            Ok(format!("summary of {} entries", folded.len()))
        }
    }

    fn test_session() -> Arc<Session> {
        let config = Arc::new(OrchestratorConfig::default());
        let session = Arc::new(Session::new(SessionConfig::new(config)));
        session.apply(TurnEvent::SessionOpen);
        session
    }

    #[tokio::test]
    async fn clean_turn_produces_completed_outcome_and_audio_packets() {
        let orchestrator = test_orchestrator();
        let session = test_session();
        let mut context = ContextBuffer::new(PinnedPrefix::new("you are a helpful voice assistant"), 8_192, 7_500);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(256);

        let handle = orchestrator.begin_turn(&session, "hello".to_string());
        let outcome = orchestrator
            .drive_turn(&session, &handle, &mut context, &outbound_tx)
            .await
            .expect("turn drives to completion");

        match outcome {
            TurnOutcome::Completed { .. } => {}
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(session.state(), TurnState::Listening);

        drop(outbound_tx);
        let mut saw_audio = false;
        let mut saw_ttfa = false;
        while let Some(message) = outbound_rx.recv().await {
            match message {
                OutboundMessage::Audio(_) => saw_audio = true,
                OutboundMessage::Control(ControlEvent::TtfaMeasured { .. }) => saw_ttfa = true,
                _ => {}
            }
        }
        assert!(saw_audio, "expected at least one audio packet");
        assert!(saw_ttfa, "expected a TtfaMeasured control event");
    }

    #[tokio::test]
    async fn llm_that_never_responds_times_out_the_turn() {
        let orchestrator = Orchestrator::new(
            Arc::new(MockAsrEngine::default()),
            Arc::new(MockLlmEngine {
                response: "never arrives".to_string(),
                first_token_delay: Duration::from_secs(30),
                token_delay: Duration::from_millis(1),
            }),
            Arc::new(MockTtsEngine::default()),
            Arc::new(MockAnimationEngine::default()),
            Arc::new(StubSummarizer),
            Arc::new(BackpressureController::new(Default::default())),
        );

        let mut config = OrchestratorConfig::default();
        config.turn.pre_first_audio_timeout_ms = 20;
        let session = Arc::new(Session::new(SessionConfig::new(Arc::new(config))));
        session.apply(TurnEvent::SessionOpen);

        let mut context = ContextBuffer::new(PinnedPrefix::new("persona"), 8_192, 7_500);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(32);

        let handle = orchestrator.begin_turn(&session, "hello?".to_string());
        let outcome = orchestrator
            .drive_turn(&session, &handle, &mut context, &outbound_tx)
            .await
            .expect("turn resolves without a hard error");

        assert!(matches!(outcome, TurnOutcome::TimedOut));
        assert_eq!(session.state(), TurnState::Listening);

        drop(outbound_tx);
        let mut saw_timeout_event = false;
        while let Some(message) = outbound_rx.recv().await {
            if let OutboundMessage::Control(ControlEvent::TurnTimeout { .. }) = message {
                saw_timeout_event = true;
            }
        }
        assert!(saw_timeout_event);
    }

    #[tokio::test]
    async fn barge_in_cancels_a_speaking_turn_and_returns_to_listening() {
        let orchestrator = Orchestrator::new(
            Arc::new(MockAsrEngine::default()),
            Arc::new(MockLlmEngine {
                response: "a very long response that keeps going for a while so we can interrupt it".to_string(),
                first_token_delay: Duration::from_millis(1),
                token_delay: Duration::from_millis(20),
            }),
            Arc::new(MockTtsEngine {
                sample_rate: DEFAULT_SAMPLE_RATE,
                ms_per_char: 4.0,
                chunk_delay: Duration::from_millis(5),
            }),
            Arc::new(MockAnimationEngine::default()),
            Arc::new(StubSummarizer),
            Arc::new(BackpressureController::new(Default::default())),
        );
        let session = test_session();
        let mut context = ContextBuffer::new(PinnedPrefix::new("persona"), 8_192, 7_500);
        let (outbound_tx, _outbound_rx) = mpsc::channel(256);

        let handle = orchestrator.begin_turn(&session, "tell me a long story".to_string());

        let cancel_session = session.clone();
        let cancel_turn = handle.turn.clone();
        let cancel_signal = handle.signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            cancel_session.apply(TurnEvent::BargeIn);
            cancel_signal.raise(CancelReason::UserBargeIn);
            cancel_turn.mark_cancelled(CancelReason::UserBargeIn);
        });

        let outcome = orchestrator
            .drive_turn(&session, &handle, &mut context, &outbound_tx)
            .await
            .expect("cancelled turn still resolves cleanly");

        assert!(matches!(outcome, TurnOutcome::Cancelled { reason: CancelReason::UserBargeIn }));
        assert_eq!(session.state(), TurnState::Listening);
    }
}
