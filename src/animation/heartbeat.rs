//! Heartbeat / slow-freeze / drop cadence for the blendshape stream.
//!
//! The animation stage must keep emitting *something* at roughly `fps`
//! even when no new articulation has arrived (the LLM is still thinking,
//! or TTS is mid-sentence with a pause). Driven off a monotonic timer, not
//! a frame counter, so a stall in the driving stage doesn't wedge the
//! cadence: once the gap since the last real frame passes
//! `heartbeat_gap_ms` we hold the last pose; past `slow_freeze_gap_ms` we
//! ease toward neutral over `slow_freeze_duration_ms`; past
//! `drop_if_lag_ms` of render lag we stop emitting entirely rather than
//! flood a client that can't keep up.

use std::time::Instant;

use crate::config::AnimationConfig;
use crate::pipeline::messages::{pin_non_articulation, BlendshapeFrame};
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq)]
pub enum AnimationAction {
    Emit(BlendshapeFrame),
    Drop,
}

pub struct HeartbeatPolicy {
    config: AnimationConfig,
    last_real_frame_at: Instant,
    freeze_started_at: Option<Instant>,
    last_weights: [f32; 52],
    seq: u64,
}

impl HeartbeatPolicy {
    #[must_use]
    pub fn new(config: AnimationConfig) -> Self {
        Self {
            config,
            last_real_frame_at: Instant::now(),
            freeze_started_at: None,
            last_weights: [0.0; 52],
            seq: 0,
        }
    }

    /// Record a real, audio-driven frame. Resets the heartbeat/freeze
    /// clocks. Channels outside the jaw/mouth articulation span are always
    /// pinned at 0 regardless of what the caller passes, per the
    /// neutral-pose invariant.
    pub fn record_real_frame(&mut self, mut weights: [f32; 52], now: Instant) {
        pin_non_articulation(&mut weights);
        self.last_weights = weights;
        self.last_real_frame_at = now;
        self.freeze_started_at = None;
    }

    /// Decide what to do on a cadence tick when no real frame has arrived
    /// since the last call to [`Self::record_real_frame`].
    pub fn tick(
        &mut self,
        now: Instant,
        session_id: SessionId,
        t_audio_ms: u64,
        render_lag_ms: u32,
    ) -> AnimationAction {
        if render_lag_ms >= self.config.drop_if_lag_ms {
            return AnimationAction::Drop;
        }

        let gap_ms = now.saturating_duration_since(self.last_real_frame_at).as_millis() as u32;

        if gap_ms < self.config.heartbeat_gap_ms {
            return AnimationAction::Drop;
        }

        let seq = self.next_seq();

        if gap_ms < self.config.slow_freeze_gap_ms {
            return AnimationAction::Emit(BlendshapeFrame {
                session_id,
                seq,
                t_audio_ms,
                fps: self.config.fps,
                heartbeat: true,
                weights: self.last_weights,
            });
        }

        let freeze_started_at = *self.freeze_started_at.get_or_insert(now);
        let elapsed_ms = now.saturating_duration_since(freeze_started_at).as_millis() as f32;
        let fraction = (elapsed_ms / self.config.slow_freeze_duration_ms.max(1) as f32).min(1.0);

        let mut weights = self.last_weights;
        for w in &mut weights {
            *w *= 1.0 - fraction;
        }

        AnimationAction::Emit(BlendshapeFrame {
            session_id,
            seq,
            t_audio_ms,
            fps: self.config.fps,
            heartbeat: true,
            weights,
        })
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::messages::{ARTICULATION_END, ARTICULATION_START};
    use std::time::Duration;

    fn config() -> AnimationConfig {
        AnimationConfig {
            enabled: true,
            fps: 45.0,
            heartbeat_gap_ms: 100,
            slow_freeze_gap_ms: 200,
            slow_freeze_duration_ms: 150,
            drop_if_lag_ms: 500,
        }
    }

    #[test]
    fn within_heartbeat_gap_no_frame_is_emitted() {
        let mut policy = HeartbeatPolicy::new(config());
        let now = Instant::now();
        let action = policy.tick(now + Duration::from_millis(50), SessionId::new(), 0, 0);
        assert_eq!(action, AnimationAction::Drop);
    }

    #[test]
    fn past_heartbeat_gap_holds_last_pose() {
        let mut policy = HeartbeatPolicy::new(config());
        let now = Instant::now();
        let mut weights = [0.0; 52];
        weights[ARTICULATION_START] = 0.7;
        policy.record_real_frame(weights, now);

        match policy.tick(now + Duration::from_millis(150), SessionId::new(), 1000, 0) {
            AnimationAction::Emit(frame) => {
                assert!(frame.heartbeat);
                assert_eq!(frame.weights[ARTICULATION_START], 0.7);
            }
            AnimationAction::Drop => panic!("expected a held frame"),
        }
    }

    #[test]
    fn past_slow_freeze_gap_eases_toward_neutral() {
        let mut policy = HeartbeatPolicy::new(config());
        let now = Instant::now();
        let mut weights = [0.0; 52];
        weights[ARTICULATION_START] = 1.0;
        policy.record_real_frame(weights, now);

        // Exactly at the start of the freeze window: fraction should be ~0.
        let first = match policy.tick(now + Duration::from_millis(201), SessionId::new(), 0, 0) {
            AnimationAction::Emit(frame) => frame.weights[ARTICULATION_START],
            AnimationAction::Drop => panic!("expected a frame"),
        };
        assert!(first > 0.9);

        // Fully through the freeze duration: weights should reach neutral.
        let last = match policy.tick(
            now + Duration::from_millis(201 + 150),
            SessionId::new(),
            0,
            0,
        ) {
            AnimationAction::Emit(frame) => frame.weights[ARTICULATION_START],
            AnimationAction::Drop => panic!("expected a frame"),
        };
        assert!(last < 0.01);
    }

    #[test]
    fn excess_render_lag_drops_frames() {
        let mut policy = HeartbeatPolicy::new(config());
        let now = Instant::now();
        let action = policy.tick(now + Duration::from_millis(600), SessionId::new(), 0, 600);
        assert_eq!(action, AnimationAction::Drop);
    }

    #[test]
    fn non_articulation_channels_stay_pinned_at_zero() {
        let mut policy = HeartbeatPolicy::new(config());
        let now = Instant::now();
        let weights = [0.9; 52];
        policy.record_real_frame(weights, now);
        match policy.tick(now + Duration::from_millis(150), SessionId::new(), 0, 0) {
            AnimationAction::Emit(frame) => {
                assert!(frame.weights[..ARTICULATION_START].iter().all(|w| *w == 0.0), "eyes must stay at 0");
                assert!(
                    frame.weights[ARTICULATION_END + 1..].iter().all(|w| *w == 0.0),
                    "brows/cheeks/nose/tongue must stay at 0"
                );
                assert!(
                    frame.weights[ARTICULATION_START..=ARTICULATION_END].iter().all(|w| *w == 0.9),
                    "jaw/mouth channels should pass through audio-driven weights"
                );
            }
            AnimationAction::Drop => panic!("expected a frame"),
        }
    }
}
