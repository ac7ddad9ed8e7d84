//! Cooperative cancellation fan-out (§4.6).
//!
//! A turn owns one [`tokio_util::sync::CancellationToken`]; every stage
//! adapter holds a clone and polls it (via `tokio::select!` alongside its
//! normal work) rather than being interrupted. `CancellationController`
//! layers bookkeeping on top: the reason and trigger timestamp are
//! recorded exactly once, and each stage acknowledges independently so the
//! barge-in latency (time from signal to every live stage acknowledging)
//! can be measured.

use std::collections::HashSet;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Stage;
use crate::pipeline::messages::CancelReason;

/// Tags a turn's [`CancellationToken`] with the reason and wall-clock time
/// it was raised, and tracks which stages have acknowledged it.
pub struct CancellationSignal {
    token: CancellationToken,
    inner: Mutex<SignalState>,
}

struct SignalState {
    reason: Option<CancelReason>,
    raised_at: Option<Instant>,
    observed_by: HashSet<Stage>,
}

impl CancellationSignal {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            inner: Mutex::new(SignalState {
                reason: None,
                raised_at: None,
                observed_by: HashSet::new(),
            }),
        }
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Raise the signal. Idempotent: only the first call records a reason
    /// and timestamp; later calls (e.g. a barge-in racing a system-overload
    /// shed) are no-ops beyond re-cancelling the token, which is itself
    /// idempotent.
    pub fn raise(&self, reason: CancelReason) {
        let mut state = self.inner.lock();
        if state.reason.is_none() {
            state.reason = Some(reason);
            state.raised_at = Some(Instant::now());
        }
        self.token.cancel();
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.lock().reason
    }

    /// Record that `stage` has observed and acted on the cancellation.
    /// Returns `true` the first time a given stage acknowledges; later
    /// acknowledgements from the same stage are no-ops.
    pub fn acknowledge(&self, stage: Stage) -> bool {
        self.inner.lock().observed_by.insert(stage)
    }

    #[must_use]
    pub fn has_acknowledged(&self, stage: Stage) -> bool {
        self.inner.lock().observed_by.contains(&stage)
    }

    /// Milliseconds between the signal being raised and `stage`'s
    /// acknowledgement, if both have happened.
    #[must_use]
    pub fn ack_latency_ms(&self, stage: Stage) -> Option<u64> {
        let state = self.inner.lock();
        if !state.observed_by.contains(&stage) {
            return None;
        }
        state
            .raised_at
            .map(|raised_at| raised_at.elapsed().as_millis() as u64)
    }

    /// Whether every stage in `required` has acknowledged, i.e. the
    /// cancellation is fully drained and the turn can close out.
    #[must_use]
    pub fn fully_acknowledged(&self, required: &[Stage]) -> bool {
        let state = self.inner.lock();
        required.iter().all(|stage| state.observed_by.contains(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_is_idempotent_on_reason() {
        let signal = CancellationSignal::new(CancellationToken::new());
        signal.raise(CancelReason::UserBargeIn);
        signal.raise(CancelReason::SystemOverload);
        assert_eq!(signal.reason(), Some(CancelReason::UserBargeIn));
        assert!(signal.is_raised());
    }

    #[test]
    fn acknowledge_is_per_stage_and_idempotent() {
        let signal = CancellationSignal::new(CancellationToken::new());
        signal.raise(CancelReason::UserBargeIn);
        assert!(signal.acknowledge(Stage::Llm));
        assert!(!signal.acknowledge(Stage::Llm));
        assert!(signal.has_acknowledged(Stage::Llm));
        assert!(!signal.has_acknowledged(Stage::Tts));
    }

    #[test]
    fn fully_acknowledged_requires_every_listed_stage() {
        let signal = CancellationSignal::new(CancellationToken::new());
        signal.raise(CancelReason::UserStop);
        let required = [Stage::Llm, Stage::Tts, Stage::Animation];
        assert!(!signal.fully_acknowledged(&required));
        signal.acknowledge(Stage::Llm);
        signal.acknowledge(Stage::Tts);
        assert!(!signal.fully_acknowledged(&required));
        signal.acknowledge(Stage::Animation);
        assert!(signal.fully_acknowledged(&required));
    }

    #[test]
    fn child_token_observes_cancellation() {
        let signal = CancellationSignal::new(CancellationToken::new());
        let child = signal.child_token();
        assert!(!child.is_cancelled());
        signal.raise(CancelReason::Timeout);
        assert!(child.is_cancelled());
    }
}
