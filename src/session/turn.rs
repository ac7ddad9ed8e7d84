//! `Session` and `Turn`: the per-connection and per-utterance state that
//! the turn state machine (§4.2) and the orchestrator (§4.3) operate on.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::fsm::{TurnEvent, TurnState};
use super::{SessionId, TurnId};
use crate::audio::AudioClock;
use crate::config::OrchestratorConfig;
use crate::pipeline::messages::CancelReason;

/// Per-session configuration snapshot, taken at admission time so a running
/// session is unaffected by a config reload.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub inner: Arc<OrchestratorConfig>,
}

impl SessionConfig {
    #[must_use]
    pub fn new(inner: Arc<OrchestratorConfig>) -> Self {
        Self { inner }
    }
}

/// A single conversational turn: one LISTENING→THINKING→SPEAKING cycle (or
/// a prefix of it, if interrupted or timed out). Bounded lifetime: ends at
/// last-packet-emitted, cancel-complete, or the hard pre-first-audio
/// timeout.
pub struct Turn {
    pub id: TurnId,
    pub session_id: SessionId,
    /// Final ASR transcript that opened this turn.
    pub user_text: String,
    /// Cancelled on barge-in, stop, overload-shed, or timeout. Every stage
    /// adapter holds a clone and checks it cooperatively.
    pub cancel: CancellationToken,
    pub started_at: Instant,
    pub first_token_at: Mutex<Option<Instant>>,
    pub first_audio_at: Mutex<Option<Instant>>,
    /// Set once, by whichever stage first observes a cancellation; never
    /// overwritten afterwards.
    pub cancel_reason: Mutex<Option<CancelReason>>,
}

impl Turn {
    #[must_use]
    pub fn new(session_id: SessionId, user_text: String) -> Self {
        Self {
            id: TurnId::new(),
            session_id,
            user_text,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
            first_token_at: Mutex::new(None),
            first_audio_at: Mutex::new(None),
            cancel_reason: Mutex::new(None),
        }
    }

    /// Time-to-first-audio so far, if the first TTS packet has been emitted.
    #[must_use]
    pub fn ttfa_ms(&self) -> Option<u64> {
        self.first_audio_at
            .lock()
            .map(|at| at.saturating_duration_since(self.started_at).as_millis() as u64)
    }

    /// Record the first stage-observed cancellation reason. Idempotent:
    /// only the first call has any effect, matching the write-once
    /// `observed_by`/reason semantics of the cancellation fan-out.
    pub fn mark_cancelled(&self, reason: CancelReason) {
        let mut guard = self.cancel_reason.lock();
        if guard.is_none() {
            *guard = Some(reason);
        }
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A live client connection. Owns the turn state machine and at most one
/// in-flight [`Turn`]. All FSM transitions run through [`Session::apply`],
/// which takes the state lock only for the duration of the pure
/// transition — never across an `.await`.
pub struct Session {
    pub id: SessionId,
    pub config: SessionConfig,
    state: Mutex<TurnState>,
    /// Monotonic audio clock; advances only when a packet is emitted (§4.4),
    /// by exactly the packet's `duration_ms`. Shared directly with the
    /// [`crate::audio::Packetizer`] driving the session's current turn, so
    /// both see the same timeline.
    pub audio_clock: AudioClock,
    current_turn: Mutex<Option<Arc<Turn>>>,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::new(),
            config,
            state: Mutex::new(TurnState::Idle),
            audio_clock: AudioClock::new(),
            current_turn: Mutex::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.lock()
    }

    /// Apply an FSM event. Returns the new state if the transition was
    /// valid, or `None` if the event was a no-op in the current state.
    pub fn apply(&self, event: TurnEvent) -> Option<TurnState> {
        self.touch();
        let mut guard = self.state.lock();
        let next = guard.apply(event)?;
        *guard = next;
        Some(next)
    }

    #[must_use]
    pub fn current_turn(&self) -> Option<Arc<Turn>> {
        self.current_turn.lock().clone()
    }

    /// Begin a new turn. Replaces any prior turn reference; the caller is
    /// responsible for having driven the prior turn to completion first.
    pub fn begin_turn(&self, user_text: String) -> Arc<Turn> {
        let turn = Arc::new(Turn::new(self.id, user_text));
        *self.current_turn.lock() = Some(turn.clone());
        turn
    }

    pub fn clear_turn(&self) {
        *self.current_turn.lock() = None;
    }

    /// Current audio clock position in ms.
    #[must_use]
    pub fn audio_clock_ms(&self) -> u64 {
        self.audio_clock.now_ms()
    }

    /// Advance the audio clock by exactly `duration_ms`, returning the
    /// timestamp of the packet that was just emitted. Overlap bytes are
    /// never passed here: only whole-packet emission advances the clock.
    pub fn advance_audio_clock(&self, duration_ms: u32) -> u64 {
        self.audio_clock.advance(duration_ms)
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn test_session() -> Session {
        Session::new(SessionConfig::new(StdArc::new(OrchestratorConfig::default())))
    }

    #[test]
    fn new_session_starts_idle_with_zero_clock() {
        let session = test_session();
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.audio_clock_ms(), 0);
        assert!(session.current_turn().is_none());
    }

    #[test]
    fn audio_clock_advances_only_by_emitted_duration() {
        let session = test_session();
        assert_eq!(session.advance_audio_clock(20), 0);
        assert_eq!(session.advance_audio_clock(20), 20);
        assert_eq!(session.audio_clock_ms(), 40);
    }

    #[test]
    fn begin_turn_replaces_current_turn() {
        let session = test_session();
        let turn_a = session.begin_turn("hello".to_string());
        assert!(StdArc::ptr_eq(&turn_a, &session.current_turn().unwrap()));
        let turn_b = session.begin_turn("again".to_string());
        assert!(!StdArc::ptr_eq(&turn_a, &turn_b));
        session.clear_turn();
        assert!(session.current_turn().is_none());
    }

    #[test]
    fn turn_cancellation_is_write_once() {
        let turn = Turn::new(SessionId::new(), "hi".to_string());
        turn.mark_cancelled(CancelReason::UserBargeIn);
        turn.mark_cancelled(CancelReason::Timeout);
        assert_eq!(*turn.cancel_reason.lock(), Some(CancelReason::UserBargeIn));
        assert!(turn.is_cancelled());
    }

    #[test]
    fn session_apply_invalid_event_is_noop() {
        let session = test_session();
        assert_eq!(session.apply(TurnEvent::EndpointDetected), None);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[test]
    fn session_apply_drives_full_turn_cycle() {
        let session = test_session();
        assert_eq!(session.apply(TurnEvent::SessionOpen), Some(TurnState::Listening));
        assert_eq!(
            session.apply(TurnEvent::EndpointDetected),
            Some(TurnState::Thinking)
        );
        assert_eq!(
            session.apply(TurnEvent::FirstTokenEmitted),
            Some(TurnState::Speaking)
        );
    }
}
