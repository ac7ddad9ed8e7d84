//! Deterministic in-memory engine adapters for tests and local development.
//!
//! These stand in for the real ASR/LLM/TTS/animation engines named out of
//! scope in spec §1. Each one is configurable enough to drive the seed
//! end-to-end scenarios (clean turn, barge-in, pre-first-audio timeout,
//! animation failure) without a network call or a model weight in sight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    AnimationEngine, AnimationRequest, AsrEngine, AsrRequest, BoxStream, EngineHealth, LlmEngine,
    LlmRequest, RawBlendshapeFrame, TtsEngine, TtsRequest,
};
use crate::error::Result;
use crate::pipeline::messages::{LlmToken, SynthesizedAudio, Transcription};

/// Streams a fixed transcript word-by-word as partials, then a final.
pub struct MockAsrEngine {
    pub transcript: String,
    pub partial_delay: Duration,
}

impl Default for MockAsrEngine {
    fn default() -> Self {
        Self {
            transcript: "hello there how are you".to_string(),
            partial_delay: Duration::from_millis(2),
        }
    }
}

#[async_trait]
impl AsrEngine for MockAsrEngine {
    async fn start(
        &self,
        _request: AsrRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<Transcription>> {
        let transcript = self.transcript.clone();
        let delay = self.partial_delay;
        let stream = async_stream::stream! {
            let words: Vec<String> = transcript.split_whitespace().map(str::to_string).collect();
            let mut partial = String::new();
            for (i, word) in words.iter().enumerate() {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                if !partial.is_empty() {
                    partial.push(' ');
                }
                partial.push_str(word);
                yield Transcription { text: partial.clone(), is_final: i == words.len() - 1 };
            }
        };
        Ok(Box::pin(stream))
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth::Ready
    }
}

/// Streams a fixed response word-by-word, truncated to the request's
/// `max_tokens`. `first_token_delay` lets tests simulate a slow or
/// never-responding model (set it past `pre_first_audio_timeout_ms` to
/// exercise the turn-timeout path).
pub struct MockLlmEngine {
    pub response: String,
    pub first_token_delay: Duration,
    pub token_delay: Duration,
}

impl Default for MockLlmEngine {
    fn default() -> Self {
        Self {
            response: "Sure, I can help with that right away.".to_string(),
            first_token_delay: Duration::from_millis(10),
            token_delay: Duration::from_millis(5),
        }
    }
}

#[async_trait]
impl LlmEngine for MockLlmEngine {
    async fn start(
        &self,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<LlmToken>> {
        let mut words: Vec<String> = self
            .response
            .split_whitespace()
            .map(str::to_string)
            .collect();
        words.truncate(request.max_tokens as usize);
        let first_delay = self.first_token_delay;
        let token_delay = self.token_delay;

        let stream = async_stream::stream! {
            for (i, word) in words.iter().enumerate() {
                let delay = if i == 0 { first_delay } else { token_delay };
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                yield LlmToken {
                    text: format!("{word} "),
                    is_end: i + 1 == words.len(),
                };
            }
        };
        Ok(Box::pin(stream))
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth::Ready
    }
}

/// Synthesizes silence proportional to input text length — enough samples
/// to exercise the packetizer's chunking without a real vocoder.
pub struct MockTtsEngine {
    pub sample_rate: u32,
    pub ms_per_char: f32,
    pub chunk_delay: Duration,
}

impl Default for MockTtsEngine {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            ms_per_char: 12.0,
            chunk_delay: Duration::from_millis(1),
        }
    }
}

#[async_trait]
impl TtsEngine for MockTtsEngine {
    async fn start(
        &self,
        mut request: TtsRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<SynthesizedAudio>> {
        let sample_rate = self.sample_rate;
        let ms_per_char = self.ms_per_char;
        let chunk_delay = self.chunk_delay;

        let stream = async_stream::stream! {
            loop {
                let text = tokio::select! {
                    () = cancel.cancelled() => return,
                    text = request.text_stream.recv() => text,
                };
                let Some(text) = text else { break };
                if text.is_empty() {
                    continue;
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(chunk_delay) => {}
                }
                let duration_ms = (text.chars().count() as f32 * ms_per_char).max(1.0);
                let n_samples = ((sample_rate as f32 * duration_ms) / 1000.0) as usize;
                let samples: Vec<f32> = (0..n_samples)
                    .map(|i| 0.2 * (i as f32 * 0.05).sin())
                    .collect();
                yield SynthesizedAudio { samples, sample_rate, is_final: false };
            }
            yield SynthesizedAudio { samples: Vec::new(), sample_rate, is_final: true };
        };
        Ok(Box::pin(stream))
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth::Ready
    }
}

/// Energy-driven jaw articulation only — matches the neutral-pose invariant
/// by construction, since it never touches brow/eye/cheek/nose channels.
/// If `fail_after` is set, the stream silently ends after that many frames,
/// simulating an engine crash (used by the animation-failure-isolation
/// scenario).
pub struct MockAnimationEngine {
    pub fail_after: Option<usize>,
    emitted: Arc<Mutex<usize>>,
}

impl Default for MockAnimationEngine {
    fn default() -> Self {
        Self {
            fail_after: None,
            emitted: Arc::new(Mutex::new(0)),
        }
    }
}

impl MockAnimationEngine {
    #[must_use]
    pub fn crashing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            emitted: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl AnimationEngine for MockAnimationEngine {
    async fn start(
        &self,
        mut request: AnimationRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<RawBlendshapeFrame>> {
        let fail_after = self.fail_after;
        let emitted = self.emitted.clone();

        let stream = async_stream::stream! {
            loop {
                if let Some(limit) = fail_after {
                    if *emitted.lock() >= limit {
                        return;
                    }
                }
                let chunk = tokio::select! {
                    () = cancel.cancelled() => return,
                    chunk = request.audio_stream.recv() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let rms = rms(&chunk);
                let mut weights = [0.0f32; 52];
                weights[crate::pipeline::messages::ARTICULATION_START] = rms.clamp(0.0, 1.0);
                *emitted.lock() += 1;
                yield RawBlendshapeFrame { weights };
            }
        };
        Ok(Box::pin(stream))
    }

    /// Reports `Down` once the simulated crash point has been reached, so
    /// a caller polling health after the stream has silently ended can
    /// tell the engine died rather than finished normally.
    async fn health(&self) -> EngineHealth {
        match self.fail_after {
            Some(limit) if *self.emitted.lock() >= limit => EngineHealth::Down,
            _ => EngineHealth::Ready,
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt() * 4.0
}
