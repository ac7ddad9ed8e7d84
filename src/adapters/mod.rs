//! Uniform streaming/cancellable contracts over the external ASR/LLM/TTS/
//! animation engines (§4.10).
//!
//! Every adapter role exposes the same shape: `start` begins a single-pass,
//! finite lazy sequence of output chunks, and `health` is a best-effort
//! liveness probe. There is deliberately no separate `cancel()` method on
//! the trait — non-blocking cancellation is realized by threading
//! the turn's shared `tokio_util::sync::CancellationToken` into `start`
//! itself, so a returned stream terminates cooperatively wherever it next
//! checks the token, exactly like every other stage (no suspension
//! without checking the token, applied uniformly). Concrete ML engines
//! are out of scope (§1); this module ships deterministic in-memory
//! adapters for tests/dev ([`mock`]) and one real HTTP+SSE streaming
//! `LlmEngine` behind the `http-engines` feature ([`http_llm`]) as a worked
//! example of the narrow streaming contract.

pub mod http_llm;
pub mod mock;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::Role as ContextRole;
use crate::pipeline::messages::{LlmToken, SynthesizedAudio, Transcription};

/// Liveness of an engine adapter, as reported by `health()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHealth {
    Ready,
    Degraded,
    Down,
}

/// A single-pass, finite, `Send` stream — the lazy sequence every adapter
/// role returns from `start`.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// One complete user utterance, as captured by the VAD endpointer
/// (pre-roll included). The real streaming ASR contract also emits partial
/// transcripts as audio arrives; since the orchestrator only calls `start`
/// once VAD has already declared the endpoint, it hands over the whole
/// segment and the adapter is free to emit partials against it before its
/// final.
#[derive(Debug, Clone)]
pub struct AsrRequest {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait AsrEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request cannot be initiated (connection,
    /// init). Stream-level failures should end the stream rather than
    /// surface here.
    async fn start(
        &self,
        request: AsrRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<Transcription>>;

    async fn health(&self) -> EngineHealth;
}

/// One turn's prompt, already composed from PinnedPrefix ⊕ RollingWindow ⊕
/// SessionStateBlock ⊕ user text (§4.5) by the orchestrator. `max_tokens`,
/// `verbosity`, and `tools_enabled` carry whatever the backpressure ladder
/// (§4.8) has clamped them to before this turn launched.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub pinned_prefix: String,
    pub history: Vec<(ContextRole, String)>,
    pub session_state: Option<String>,
    pub user_text: String,
    pub max_tokens: u32,
    pub verbosity: f32,
    pub tools_enabled: bool,
}

#[async_trait]
pub trait LlmEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request cannot be initiated.
    async fn start(
        &self,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<LlmToken>>;

    async fn health(&self) -> EngineHealth;
}

/// Drives one TTS synthesis pass. `text_stream` delivers token text as the
/// LLM produces it (streaming text in); the adapter is expected to begin
/// producing audio before the full response has arrived.
pub struct TtsRequest {
    pub text_stream: mpsc::Receiver<String>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request cannot be initiated.
    async fn start(
        &self,
        request: TtsRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<SynthesizedAudio>>;

    async fn health(&self) -> EngineHealth;
}

/// A single blendshape estimate from the animation engine, before the
/// heartbeat/slow-freeze cadence policy (§4.7) is layered on top by the
/// orchestrator. Only articulation channels are meaningful here; the
/// orchestrator pins the rest to 0 via [`crate::pipeline::messages::pin_non_articulation`].
#[derive(Debug, Clone)]
pub struct RawBlendshapeFrame {
    pub weights: [f32; 52],
}

/// Drives one animation pass. `audio_stream` is a time-aligned copy of the
/// same PCM the packetizer is emitting (the fan-out tee described in the
/// design notes); a slow or crashed animation engine must never be allowed
/// to block that tee.
pub struct AnimationRequest {
    pub audio_stream: mpsc::Receiver<Vec<f32>>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait AnimationEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request cannot be initiated.
    async fn start(
        &self,
        request: AnimationRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<RawBlendshapeFrame>>;

    async fn health(&self) -> EngineHealth;
}
