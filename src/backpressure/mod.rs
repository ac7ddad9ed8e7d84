//! The six-level backpressure ladder (§4.8).
//!
//! One `BackpressureController` per process, fed a snapshot of process-wide
//! metrics once a second. Upward transitions (things getting worse) take
//! effect immediately; downward transitions require `down_confirm_samples`
//! consecutive clear readings and only ever step down one level at a time,
//! so a single good sample after a spike can't snap the system back to
//! NORMAL and mask an oscillation.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::BackpressureConfig;

/// Levels of the ladder, ordered from least to most severe. The discriminant
/// order matters: comparisons (`level >= X`) drive the gating logic in the
/// orchestrator and stage adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BackpressureLevel {
    Normal = 0,
    AnimationYield = 1,
    VerbosityReduce = 2,
    ToolRefuse = 3,
    SessionQueue = 4,
    SessionReject = 5,
}

impl BackpressureLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::AnimationYield,
            2 => Self::VerbosityReduce,
            3 => Self::ToolRefuse,
            4 => Self::SessionQueue,
            _ => Self::SessionReject,
        }
    }

    /// One step less severe, or `Normal` if already there.
    fn step_down(self) -> Self {
        Self::from_u8((self as u8).saturating_sub(1))
    }
}

impl std::fmt::Display for BackpressureLevel {
    /// Renders using the ladder's canonical spec names (§4.8), so a
    /// `Degraded{level}` control event reads the same on the wire as the
    /// design document.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "NORMAL",
            Self::AnimationYield => "ANIMATION_YIELD",
            Self::VerbosityReduce => "VERBOSITY_REDUCE",
            Self::ToolRefuse => "TOOL_REFUSE",
            Self::SessionQueue => "SESSION_QUEUE",
            Self::SessionReject => "SESSION_REJECT",
        };
        f.write_str(s)
    }
}

/// A single metrics observation fed into the controller once a second.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub ttfa_p95_ms: f32,
    pub anim_lag_ms: f32,
    pub vram_pct: f32,
    pub error_rate_pct: f32,
    /// Currently active session count, for the ladder's `active ≥ max−N`
    /// trigger rows (§4.8). Zero/zero (the `Default`) never trips these.
    pub active_sessions: usize,
    /// `max_concurrent_sessions` from the admission config, carried here
    /// so `worst_level` doesn't need its own copy of the admission config.
    pub max_concurrent_sessions: usize,
}

impl MetricsSnapshot {
    /// `true` once active sessions are within `headroom` of the cap (e.g.
    /// `headroom = 2` is the VERBOSITY_REDUCE row's "active ≥ max−2").
    /// Saturates rather than underflows when the cap is smaller than the
    /// headroom.
    fn active_within(&self, headroom: usize) -> bool {
        self.max_concurrent_sessions > 0
            && self.active_sessions >= self.max_concurrent_sessions.saturating_sub(headroom)
    }

    fn worst_level(&self, config: &BackpressureConfig) -> BackpressureLevel {
        if self.ttfa_p95_ms >= config.session_reject_ttfa_p95_ms
            || self.vram_pct >= config.session_reject_vram_pct
            || self.error_rate_pct >= config.session_reject_error_rate_pct
            || self.active_within(0)
        {
            return BackpressureLevel::SessionReject;
        }
        if self.ttfa_p95_ms >= config.session_queue_ttfa_p95_ms
            || self.vram_pct >= config.session_queue_vram_pct
            || self.active_within(1)
        {
            return BackpressureLevel::SessionQueue;
        }
        if self.ttfa_p95_ms >= config.tool_refuse_ttfa_p95_ms
            || self.vram_pct >= config.tool_refuse_vram_pct
        {
            return BackpressureLevel::ToolRefuse;
        }
        if self.ttfa_p95_ms >= config.verbosity_reduce_ttfa_p95_ms
            || self.vram_pct >= config.verbosity_reduce_vram_pct
            || self.active_within(2)
        {
            return BackpressureLevel::VerbosityReduce;
        }
        if self.anim_lag_ms >= config.anim_yield_lag_ms || self.vram_pct >= config.anim_yield_vram_pct
        {
            return BackpressureLevel::AnimationYield;
        }
        BackpressureLevel::Normal
    }

    /// Whether this snapshot is clear of the trigger for `level`, with the
    /// down-hysteresis margin applied to the ttfa component so a reading
    /// right at the boundary doesn't immediately re-trigger the level it
    /// just stepped out of.
    fn clears(&self, level: BackpressureLevel, config: &BackpressureConfig) -> bool {
        self.worst_level(config) < level
            && match level {
                BackpressureLevel::AnimationYield => {
                    self.anim_lag_ms < config.anim_yield_lag_ms - config.down_hysteresis_ttfa_ms
                }
                BackpressureLevel::VerbosityReduce => {
                    self.ttfa_p95_ms
                        < config.verbosity_reduce_ttfa_p95_ms - config.down_hysteresis_ttfa_ms
                }
                BackpressureLevel::ToolRefuse => {
                    self.ttfa_p95_ms < config.tool_refuse_ttfa_p95_ms - config.down_hysteresis_ttfa_ms
                }
                BackpressureLevel::SessionQueue => {
                    self.ttfa_p95_ms
                        < config.session_queue_ttfa_p95_ms - config.down_hysteresis_ttfa_ms
                }
                BackpressureLevel::SessionReject => {
                    self.ttfa_p95_ms
                        < config.session_reject_ttfa_p95_ms - config.down_hysteresis_ttfa_ms
                }
                BackpressureLevel::Normal => true,
            }
    }
}

/// Tracks the current ladder level plus the consecutive-clear-sample count
/// needed to confirm a step down. `Send + Sync`, cheap to share via `Arc`.
pub struct BackpressureController {
    config: BackpressureConfig,
    level: AtomicU8,
    clear_streak: AtomicU8,
}

impl BackpressureController {
    #[must_use]
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            level: AtomicU8::new(BackpressureLevel::Normal as u8),
            clear_streak: AtomicU8::new(0),
        }
    }

    #[must_use]
    pub fn level(&self) -> BackpressureLevel {
        BackpressureLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    /// Feed one observation. Returns the resulting level.
    ///
    /// Worse-than-current observations apply immediately (no hysteresis on
    /// the way up — overload must be shed fast). Better observations only
    /// step the ladder down one level at a time, and only once
    /// `down_confirm_samples` consecutive clear readings have been seen.
    pub fn observe(&self, snapshot: MetricsSnapshot) -> BackpressureLevel {
        let current = self.level();
        let worst = snapshot.worst_level(&self.config);

        if worst > current {
            self.level.store(worst as u8, Ordering::Release);
            self.clear_streak.store(0, Ordering::Release);
            return worst;
        }

        if current == BackpressureLevel::Normal {
            self.clear_streak.store(0, Ordering::Release);
            return current;
        }

        if snapshot.clears(current, &self.config) {
            let streak = self.clear_streak.fetch_add(1, Ordering::AcqRel) + 1;
            if streak >= self.config.down_confirm_samples as u8 {
                let next = current.step_down();
                self.level.store(next as u8, Ordering::Release);
                self.clear_streak.store(0, Ordering::Release);
                return next;
            }
        } else {
            self.clear_streak.store(0, Ordering::Release);
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(ttfa: f32) -> MetricsSnapshot {
        MetricsSnapshot {
            ttfa_p95_ms: ttfa,
            ..Default::default()
        }
    }

    #[test]
    fn starts_normal() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        assert_eq!(controller.level(), BackpressureLevel::Normal);
    }

    #[test]
    fn steps_up_immediately_on_a_single_bad_sample() {
        let config = BackpressureConfig::default();
        let controller = BackpressureController::new(config.clone());
        let level = controller.observe(snapshot(config.session_reject_ttfa_p95_ms + 1.0));
        assert_eq!(level, BackpressureLevel::SessionReject);
    }

    #[test]
    fn upward_transition_may_skip_levels() {
        let config = BackpressureConfig::default();
        let controller = BackpressureController::new(config.clone());
        assert_eq!(controller.level(), BackpressureLevel::Normal);
        let level = controller.observe(snapshot(config.session_reject_ttfa_p95_ms + 1.0));
        assert_eq!(level, BackpressureLevel::SessionReject);
    }

    #[test]
    fn downward_transition_requires_confirm_samples_and_steps_one_at_a_time() {
        let mut config = BackpressureConfig::default();
        config.down_confirm_samples = 2;
        let controller = BackpressureController::new(config.clone());

        controller.observe(snapshot(config.session_reject_ttfa_p95_ms + 1.0));
        assert_eq!(controller.level(), BackpressureLevel::SessionReject);

        // A single clear sample is not enough to step down.
        let level = controller.observe(snapshot(0.0));
        assert_eq!(level, BackpressureLevel::SessionReject);

        // Second consecutive clear sample confirms exactly one step down.
        let level = controller.observe(snapshot(0.0));
        assert_eq!(level, BackpressureLevel::SessionQueue);
    }

    #[test]
    fn clear_streak_resets_on_a_non_clear_sample() {
        let mut config = BackpressureConfig::default();
        config.down_confirm_samples = 2;
        let controller = BackpressureController::new(config.clone());
        controller.observe(snapshot(config.session_reject_ttfa_p95_ms + 1.0));

        controller.observe(snapshot(0.0));
        // Back up again resets any accumulated clear streak.
        controller.observe(snapshot(config.session_reject_ttfa_p95_ms + 1.0));
        let level = controller.observe(snapshot(0.0));
        assert_eq!(level, BackpressureLevel::SessionReject);
    }

    fn active_snapshot(active: usize, max: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: active,
            max_concurrent_sessions: max,
            ..Default::default()
        }
    }

    #[test]
    fn active_sessions_at_cap_triggers_session_reject() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        let level = controller.observe(active_snapshot(10, 10));
        assert_eq!(level, BackpressureLevel::SessionReject);
    }

    #[test]
    fn active_sessions_one_below_cap_triggers_session_queue() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        let level = controller.observe(active_snapshot(9, 10));
        assert_eq!(level, BackpressureLevel::SessionQueue);
    }

    #[test]
    fn active_sessions_two_below_cap_triggers_verbosity_reduce() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        let level = controller.observe(active_snapshot(8, 10));
        assert_eq!(level, BackpressureLevel::VerbosityReduce);
    }

    #[test]
    fn active_sessions_with_headroom_stays_normal() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        let level = controller.observe(active_snapshot(5, 10));
        assert_eq!(level, BackpressureLevel::Normal);
    }

    #[test]
    fn active_session_trigger_clears_one_step_at_a_time_as_sessions_close() {
        let mut config = BackpressureConfig::default();
        config.down_confirm_samples = 1;
        let controller = BackpressureController::new(config);

        controller.observe(active_snapshot(10, 10));
        assert_eq!(controller.level(), BackpressureLevel::SessionReject);

        // One session closes: still within the SESSION_QUEUE band, so the
        // ladder steps down exactly one level, not straight to NORMAL.
        let level = controller.observe(active_snapshot(9, 10));
        assert_eq!(level, BackpressureLevel::SessionQueue);
    }
}
