//! Ambient process-wide metrics collection (§4.8, §5).
//!
//! [`WorkerMetrics`] is the single place every pipeline stage reports a
//! latency or outcome into; a periodic sampler (the `server` binary's
//! backpressure-sampling task) drains it once a second into a
//! [`crate::backpressure::MetricsSnapshot`] and feeds the
//! [`crate::backpressure::BackpressureController`]. Counters are plain
//! atomics rather than a pluggable `MetricsCollector` trait object: this
//! crate owns the one consumer (the backpressure ladder) and has no
//! external backend to swap in.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backpressure::MetricsSnapshot;

const TTFA_WINDOW_CAPACITY: usize = 256;

/// Rolling window of recent time-to-first-audio samples, used to compute
/// an approximate p95 without pulling in a dedicated histogram crate.
struct TtfaWindow {
    samples: Vec<f32>,
    cursor: usize,
}

impl TtfaWindow {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(TTFA_WINDOW_CAPACITY),
            cursor: 0,
        }
    }

    fn push(&mut self, ttfa_ms: u64) {
        let sample = ttfa_ms as f32;
        if self.samples.len() < TTFA_WINDOW_CAPACITY {
            self.samples.push(sample);
        } else {
            self.samples[self.cursor] = sample;
            self.cursor = (self.cursor + 1) % TTFA_WINDOW_CAPACITY;
        }
    }

    fn p95(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() as f32 - 1.0) * 0.95).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// Per-process metrics counters. One instance shared via `Arc` across all
/// sessions and stages.
pub struct WorkerMetrics {
    ttfa_window: Mutex<TtfaWindow>,
    anim_lag_ms: AtomicU32,
    vram_pct: AtomicU32,
    turns_total: AtomicU64,
    turns_errored: AtomicU64,
    barge_ins_total: AtomicU64,
    context_rollovers_total: AtomicU64,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttfa_window: Mutex::new(TtfaWindow::new()),
            anim_lag_ms: AtomicU32::new(0),
            vram_pct: AtomicU32::new(0),
            turns_total: AtomicU64::new(0),
            turns_errored: AtomicU64::new(0),
            barge_ins_total: AtomicU64::new(0),
            context_rollovers_total: AtomicU64::new(0),
        }
    }

    /// Record one turn's time-to-first-audio.
    pub fn record_ttfa(&self, ttfa_ms: u64) {
        self.ttfa_window.lock().push(ttfa_ms);
        self.turns_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a turn that ended without a stage error — a clean
    /// completion, or a cancellation (barge-in/user-stop), which per the
    /// error taxonomy (§7) is "not an error; a control-flow signal" and
    /// must not inflate `error_rate_pct`.
    pub fn record_turn_ok(&self) {
        self.turns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_turn_error(&self) {
        self.turns_total.fetch_add(1, Ordering::Relaxed);
        self.turns_errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_barge_in(&self) {
        self.barge_ins_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_rollover(&self) {
        self.context_rollovers_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the animation stage's most recent observed lag (how far
    /// playout has run ahead of the last emitted frame).
    pub fn record_animation_lag(&self, lag_ms: u32) {
        self.anim_lag_ms.store(lag_ms, Ordering::Relaxed);
    }

    /// Update the current VRAM utilization, read from an external
    /// collaborator (the inference host's device query) and reported in
    /// here rather than sampled directly, since GPU accounting is out of
    /// this crate's scope.
    pub fn record_vram_pct(&self, pct: f32) {
        self.vram_pct.store(pct.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn turns_total(&self) -> u64 {
        self.turns_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn error_rate_pct(&self) -> f32 {
        let total = self.turns_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let errored = self.turns_errored.load(Ordering::Relaxed);
        errored as f32 / total as f32 * 100.0
    }

    /// Build the snapshot the backpressure controller samples once a
    /// second. Does not reset any counter: the ttfa window and error rate
    /// are both already rolling/cumulative.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ttfa_p95_ms: self.ttfa_window.lock().p95(),
            anim_lag_ms: self.anim_lag_ms.load(Ordering::Relaxed) as f32,
            vram_pct: f32::from_bits(self.vram_pct.load(Ordering::Relaxed)),
            error_rate_pct: self.error_rate_pct(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_of_a_uniform_window_is_near_the_top() {
        let metrics = WorkerMetrics::new();
        for ms in 1..=100 {
            metrics.record_ttfa(ms);
        }
        let snapshot = metrics.snapshot();
        assert!(snapshot.ttfa_p95_ms >= 94.0 && snapshot.ttfa_p95_ms <= 100.0);
    }

    #[test]
    fn error_rate_reflects_errored_fraction() {
        let metrics = WorkerMetrics::new();
        metrics.record_ttfa(100);
        metrics.record_ttfa(100);
        metrics.record_turn_error();
        assert!((metrics.error_rate_pct() - (100.0 / 3.0)).abs() < 0.01);
    }

    #[test]
    fn vram_and_anim_lag_round_trip_through_atomics() {
        let metrics = WorkerMetrics::new();
        metrics.record_vram_pct(87.5);
        metrics.record_animation_lag(42);
        let snapshot = metrics.snapshot();
        assert!((snapshot.vram_pct - 87.5).abs() < f32::EPSILON);
        assert!((snapshot.anim_lag_ms - 42.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cancelled_turns_count_toward_total_but_not_error_rate() {
        let metrics = WorkerMetrics::new();
        metrics.record_ttfa(100);
        metrics.record_turn_ok();
        metrics.record_turn_ok();
        assert_eq!(metrics.turns_total(), 3);
        assert_eq!(metrics.error_rate_pct(), 0.0);
    }

    #[test]
    fn empty_window_reports_zero_p95() {
        let metrics = WorkerMetrics::new();
        assert_eq!(metrics.snapshot().ttfa_p95_ms, 0.0);
    }
}
