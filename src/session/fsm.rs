//! The per-session turn state machine (§4.2).
//!
//! `TurnState` and `TurnEvent` are plain data; [`TurnState::apply`] is a
//! pure function with no side effects so it can be exhaustively unit
//! tested. Side effects (starting VAD, launching the LLM, arming cancel)
//! are the caller's responsibility, driven off the returned state.

/// States of the per-session turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    /// Transient: entered on barge-in, left once cancellation completes.
    Interrupted,
}

/// Events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    SessionOpen,
    UserAudioStart,
    EndpointDetected,
    FirstTokenEmitted,
    PreFirstAudioTimeout,
    TtsCompleteAndPlayoutDrained,
    BargeIn,
    CancelComplete,
    SessionClose,
}

impl TurnState {
    /// Apply an event to the current state, returning the next state.
    ///
    /// Returns `None` for an event that is not valid in the current state
    /// (the caller should treat this as a no-op, not an error — stray
    /// events can arrive from a stage that raced the FSM, and the design
    /// requires "only one transition may be in flight", not that invalid
    /// events panic).
    #[must_use]
    pub fn apply(self, event: TurnEvent) -> Option<TurnState> {
        use TurnEvent::{
            BargeIn, CancelComplete, EndpointDetected, FirstTokenEmitted, PreFirstAudioTimeout,
            SessionClose, SessionOpen, TtsCompleteAndPlayoutDrained, UserAudioStart,
        };
        use TurnState::{Idle, Interrupted, Listening, Speaking, Thinking};

        if event == SessionClose {
            return Some(Idle);
        }

        match (self, event) {
            (Idle, SessionOpen | UserAudioStart) => Some(Listening),
            (Listening, EndpointDetected) => Some(Thinking),
            (Thinking, FirstTokenEmitted) => Some(Speaking),
            (Thinking, PreFirstAudioTimeout) => Some(Listening),
            (Speaking, TtsCompleteAndPlayoutDrained) => Some(Listening),
            (Speaking, BargeIn) => Some(Interrupted),
            (Interrupted, CancelComplete) => Some(Listening),
            // A second barge-in while already INTERRUPTED is coalesced.
            (Interrupted, BargeIn) => Some(Interrupted),
            _ => None,
        }
    }

    /// Whether barge-in detection should be armed in this state. Per
    /// §4.2, barge-in is armed throughout LISTENING and SPEAKING.
    #[must_use]
    pub fn barge_in_armed(self) -> bool {
        matches!(self, TurnState::Listening | TurnState::Speaking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TurnEvent::*;
    use TurnState::*;

    #[test]
    fn happy_path_turn() {
        let mut state = Idle;
        state = state.apply(SessionOpen).expect("idle->listening");
        assert_eq!(state, Listening);
        state = state.apply(EndpointDetected).expect("listening->thinking");
        assert_eq!(state, Thinking);
        state = state.apply(FirstTokenEmitted).expect("thinking->speaking");
        assert_eq!(state, Speaking);
        state = state
            .apply(TtsCompleteAndPlayoutDrained)
            .expect("speaking->listening");
        assert_eq!(state, Listening);
    }

    #[test]
    fn pre_first_audio_timeout_returns_to_listening_with_no_partial_output() {
        let state = Thinking.apply(PreFirstAudioTimeout).expect("valid");
        assert_eq!(state, Listening);
    }

    #[test]
    fn barge_in_during_speaking_enters_interrupted_then_listening() {
        let state = Speaking.apply(BargeIn).expect("speaking->interrupted");
        assert_eq!(state, Interrupted);
        let state = state.apply(CancelComplete).expect("interrupted->listening");
        assert_eq!(state, Listening);
    }

    #[test]
    fn second_barge_in_while_interrupted_is_coalesced() {
        let state = Speaking.apply(BargeIn).expect("speaking->interrupted");
        let state_again = state.apply(BargeIn).expect("idempotent barge-in");
        assert_eq!(state_again, Interrupted);
    }

    #[test]
    fn session_close_from_any_state_returns_idle() {
        for state in [Idle, Listening, Thinking, Speaking, Interrupted] {
            assert_eq!(state.apply(SessionClose), Some(Idle));
        }
    }

    #[test]
    fn invalid_event_is_rejected_not_panicking() {
        assert_eq!(Idle.apply(EndpointDetected), None);
        assert_eq!(Listening.apply(FirstTokenEmitted), None);
        assert_eq!(Thinking.apply(BargeIn), None);
    }

    #[test]
    fn barge_in_armed_only_in_listening_and_speaking() {
        assert!(!Idle.barge_in_armed());
        assert!(Listening.barge_in_armed());
        assert!(!Thinking.barge_in_armed());
        assert!(Speaking.barge_in_armed());
        assert!(!Interrupted.barge_in_armed());
    }
}
