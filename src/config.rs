//! Configuration types for the speech-to-speech orchestrator.
//!
//! Mirrors the recognized configuration keys of the design: admission,
//! audio packetization, LLM context limits, animation cadence, and the
//! backpressure/latency targets. Every nested struct implements `Default`
//! so a bare `OrchestratorConfig::default()` is a valid, conservative
//! configuration, and the whole tree round-trips through TOML.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Session admission and capacity settings.
    pub admission: AdmissionConfig,
    /// Audio clock / packetizer settings.
    pub audio: AudioConfig,
    /// LLM context window and rollover settings.
    pub llm_context: LlmContextConfig,
    /// Animation heartbeat / slow-freeze settings.
    pub animation: AnimationConfig,
    /// Backpressure ladder thresholds.
    pub backpressure: BackpressureConfig,
    /// Turn lifetime and latency targets.
    pub turn: TurnConfig,
}

/// `max_concurrent_sessions`, `session_idle_timeout_s`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Hard cap on concurrently active sessions.
    pub max_concurrent_sessions: usize,
    /// Idle sweep threshold in seconds.
    pub session_idle_timeout_s: u64,
    /// Maximum time a session may wait in the SESSION_QUEUE admission queue.
    pub queue_deadline_ms: u64,
    /// Maximum number of sessions allowed to wait in the admission queue.
    pub queue_capacity: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 64,
            session_idle_timeout_s: 300,
            queue_deadline_ms: 2_000,
            queue_capacity: 32,
        }
    }
}

/// `audio_packet_ms` (fixed 20), `audio_overlap_ms` (fixed 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Packet duration in ms. Fixed at 20 by the design; exposed for tests.
    pub packet_ms: u32,
    /// Cross-fade overlap duplicated onto the next packet, in ms.
    pub overlap_ms: u32,
    /// How to handle a trailing partial chunk shorter than `packet_ms`
    /// at end-of-stream: pad with silence (true) or drop it (false).
    pub pad_trailing_chunk: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            packet_ms: 20,
            overlap_ms: 5,
            pad_trailing_chunk: true,
        }
    }
}

/// `llm_max_context_tokens`, `llm_prefix_caching`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmContextConfig {
    /// Hard cap on total context tokens (PinnedPrefix + RollingWindow + SessionStateBlock).
    pub max_context_tokens: u32,
    /// Token total at which rollover/summarization is triggered.
    pub rollover_trigger_tokens: u32,
    /// Maximum fraction of `max_context_tokens` the PinnedPrefix may occupy.
    pub max_pinned_prefix_fraction: f32,
    /// Whether the PinnedPrefix token span may be reused as a cache key
    /// across sessions that share identical prefix bytes.
    pub prefix_caching: bool,
    /// Hard deadline for a single summarization call.
    pub summarization_deadline_ms: u64,
}

impl Default for LlmContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8_192,
            rollover_trigger_tokens: 7_500,
            max_pinned_prefix_fraction: 0.25,
            prefix_caching: true,
            summarization_deadline_ms: 5_000,
        }
    }
}

/// `animation_enabled`, `animation_drop_if_lag_ms`, `animation_slow_freeze_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Gate the whole animation stage on or off.
    pub enabled: bool,
    /// Target frame rate, in Hz, for the blendshape cadence.
    pub fps: f32,
    /// Gap beyond which heartbeat frames are emitted (hold last pose).
    pub heartbeat_gap_ms: u32,
    /// Gap beyond which slow-freeze easing toward neutral begins.
    pub slow_freeze_gap_ms: u32,
    /// Duration of the slow-freeze ease, in ms.
    pub slow_freeze_duration_ms: u32,
    /// Animation lag above which frames are unconditionally dropped.
    pub drop_if_lag_ms: u32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 45.0,
            heartbeat_gap_ms: 100,
            slow_freeze_gap_ms: 100,
            slow_freeze_duration_ms: 150,
            drop_if_lag_ms: 120,
        }
    }
}

/// Thresholds for the six-level backpressure ladder (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub anim_yield_lag_ms: f32,
    pub anim_yield_vram_pct: f32,
    pub verbosity_reduce_ttfa_p95_ms: f32,
    pub verbosity_reduce_vram_pct: f32,
    pub tool_refuse_ttfa_p95_ms: f32,
    pub tool_refuse_vram_pct: f32,
    pub session_queue_ttfa_p95_ms: f32,
    pub session_queue_vram_pct: f32,
    pub session_reject_ttfa_p95_ms: f32,
    pub session_reject_vram_pct: f32,
    pub session_reject_error_rate_pct: f32,
    /// Hysteresis margin subtracted from a level's ttfa trigger when
    /// deciding whether to step *down* out of it (prevents oscillation).
    pub down_hysteresis_ttfa_ms: f32,
    /// Consecutive clear samples required before stepping down one level.
    pub down_confirm_samples: u32,
    /// `max_tokens` cap applied to the LLM request once the ladder reaches
    /// VERBOSITY_REDUCE.
    pub verbosity_reduce_max_tokens: u32,
    /// Verbosity hint passed to the LLM request at VERBOSITY_REDUCE.
    pub verbosity_reduce_verbosity: f32,
    /// `max_tokens` cap applied once the ladder reaches TOOL_REFUSE (tighter
    /// than VERBOSITY_REDUCE's).
    pub tool_refuse_max_tokens: u32,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            anim_yield_lag_ms: 120.0,
            anim_yield_vram_pct: 85.0,
            verbosity_reduce_ttfa_p95_ms: 200.0,
            verbosity_reduce_vram_pct: 90.0,
            tool_refuse_ttfa_p95_ms: 225.0,
            tool_refuse_vram_pct: 93.0,
            session_queue_ttfa_p95_ms: 240.0,
            session_queue_vram_pct: 95.0,
            session_reject_ttfa_p95_ms: 250.0,
            session_reject_vram_pct: 98.0,
            session_reject_error_rate_pct: 5.0,
            down_hysteresis_ttfa_ms: 20.0,
            down_confirm_samples: 2,
            verbosity_reduce_max_tokens: 384,
            verbosity_reduce_verbosity: 0.7,
            tool_refuse_max_tokens: 256,
        }
    }
}

/// `ttfa_target_ms`, `barge_in_cancel_ms`, `turn_pre_first_audio_timeout_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Time-to-first-audio target, p95, in ms.
    pub ttfa_target_ms: u64,
    /// Barge-in cancellation budget, p95, in ms.
    pub barge_in_cancel_ms: u64,
    /// Hard turn timeout before first audio, in ms.
    pub pre_first_audio_timeout_ms: u64,
    /// Per-stage cancellation acknowledgement deadlines, in ms.
    pub stage_cancel_deadline_ms: StageCancelDeadlines,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            ttfa_target_ms: 250,
            barge_in_cancel_ms: 150,
            pre_first_audio_timeout_ms: 500,
            stage_cancel_deadline_ms: StageCancelDeadlines::default(),
        }
    }
}

/// Per-stage deadlines for honoring a CANCEL (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageCancelDeadlines {
    pub llm_ms: u64,
    pub tts_ms: u64,
    pub packetizer_ms: u64,
    pub animation_ms: u64,
}

impl Default for StageCancelDeadlines {
    fn default() -> Self {
        Self {
            llm_ms: 30,
            tts_ms: 30,
            packetizer_ms: 20,
            animation_ms: 20,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load_from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| crate::error::OrchestratorError::Config(e.to_string()))
    }

    /// Persist configuration to a TOML file, creating parent directories
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::OrchestratorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_respects_spec_numbers() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.audio.packet_ms, 20);
        assert_eq!(config.audio.overlap_ms, 5);
        assert_eq!(config.llm_context.max_context_tokens, 8_192);
        assert_eq!(config.llm_context.rollover_trigger_tokens, 7_500);
        assert_eq!(config.turn.ttfa_target_ms, 250);
        assert_eq!(config.turn.barge_in_cancel_ms, 150);
        assert_eq!(config.turn.pre_first_audio_timeout_ms, 500);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = OrchestratorConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let loaded: OrchestratorConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(
            loaded.admission.max_concurrent_sessions,
            config.admission.max_concurrent_sessions
        );
        assert_eq!(
            loaded.backpressure.session_reject_ttfa_p95_ms,
            config.backpressure.session_reject_ttfa_p95_ms
        );
    }

    #[test]
    fn partial_toml_uses_defaults_for_missing_fields() {
        let toml_str = r#"
            [admission]
            max_concurrent_sessions = 8
        "#;
        let config: OrchestratorConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.admission.max_concurrent_sessions, 8);
        assert_eq!(config.audio.packet_ms, 20);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("orchestrator.toml");
        let config = OrchestratorConfig::default();
        config.save_to_file(&path).expect("save");

        let loaded = OrchestratorConfig::load_from_file(&path).expect("load");
        assert_eq!(
            loaded.admission.max_concurrent_sessions,
            config.admission.max_concurrent_sessions
        );
    }
}
