//! Cadenza: a real-time, multi-session speech-to-speech conversational
//! orchestrator.
//!
//! # Architecture
//!
//! A client opens a session, streams microphone audio in, and receives
//! synthesized agent audio out (optionally with a time-aligned stream of
//! facial blendshape frames). The crate is a thin serving shell over a
//! small set of mechanisms that carry the real latency and correctness
//! contracts:
//!
//! - [`session`]: the per-session turn state machine and the admission
//!   controller that bounds concurrent sessions.
//! - [`pipeline`]: the per-turn orchestrator that wires ASR → LLM → TTS →
//!   Packetizer/Animation, and the cancellation fan-out shared by every
//!   stage.
//! - [`audio`]: the monotonic, emission-driven audio clock and the 20 ms
//!   packetizer with 5 ms cross-fade overlap.
//! - [`llm`]: the pinned-prefix / rolling-window / summary context buffer
//!   and its rollover policy.
//! - [`animation`]: the heartbeat / slow-freeze / drop cadence policy for
//!   the blendshape stream.
//! - [`backpressure`]: the six-level degradation ladder driven by live
//!   metrics.
//! - [`vad`]: energy-based endpoint and barge-in detection.
//! - [`adapters`]: the uniform streaming/cancellable contract the ASR,
//!   LLM, TTS, and animation engines are consumed through.
//!
//! Specific ASR/LLM/TTS/animation engines, the media transport wire
//! format, and persistent analytics storage are external collaborators,
//! consumed through the narrow interfaces in [`adapters`] and
//! [`analytics`].

pub mod adapters;
pub mod analytics;
pub mod animation;
pub mod audio;
pub mod backpressure;
pub mod config;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod vad;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use metrics::WorkerMetrics;
pub use pipeline::{Orchestrator, TurnOutcome};
pub use server::{router, AppState, ServerBuilder};
pub use session::{Session, SessionId, SessionManager, Turn, TurnId};
