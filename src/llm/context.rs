//! `ContextBuffer`: PinnedPrefix + RollingWindow + SessionStateBlock (§4.5).
//!
//! Token accounting uses a cheap heuristic (`chars / 4`) rather than a real
//! tokenizer — close enough to drive rollover decisions, and it keeps this
//! module free of a model-specific dependency. Rollover is triggered when
//! the running total crosses `rollover_trigger_tokens` and replaces the
//! RollingWindow's oldest entries with a fresh SessionStateBlock summary.
//! It is idempotent: calling it again before new turns have accumulated
//! past the trigger is a no-op.

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};

fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

/// The immutable system/persona preamble. Fixed for the lifetime of a
/// session; never rewritten by rollover.
#[derive(Debug, Clone)]
pub struct PinnedPrefix {
    pub text: String,
    pub tokens: u32,
}

impl PinnedPrefix {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = estimate_tokens(&text);
        Self { text, tokens }
    }
}

/// One turn's worth of conversational history.
#[derive(Debug, Clone)]
pub struct RollingEntry {
    pub role: Role,
    pub text: String,
    pub tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Append-only turn history. Rollover removes a prefix of entries from the
/// front once they have been folded into the [`SessionStateBlock`].
#[derive(Debug, Clone, Default)]
pub struct RollingWindow {
    entries: Vec<RollingEntry>,
}

impl RollingWindow {
    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        let text = text.into();
        let tokens = estimate_tokens(&text);
        self.entries.push(RollingEntry { role, text, tokens });
    }

    #[must_use]
    pub fn tokens(&self) -> u32 {
        self.entries.iter().map(|e| e.tokens).sum()
    }

    #[must_use]
    pub fn entries(&self) -> &[RollingEntry] {
        &self.entries
    }

    fn drain_oldest(&mut self, count: usize) -> Vec<RollingEntry> {
        let count = count.min(self.entries.len());
        self.entries.drain(..count).collect()
    }
}

/// A running summary standing in for entries folded out of the
/// RollingWindow by rollover.
#[derive(Debug, Clone, Default)]
pub struct SessionStateBlock {
    pub summary: String,
    pub tokens: u32,
}

impl SessionStateBlock {
    fn replace(&mut self, summary: String) {
        self.tokens = estimate_tokens(&summary);
        self.summary = summary;
    }
}

/// Produces a summary of folded-out entries, given the existing summary (if
/// any) and the entries being replaced. Implemented by whichever LLM
/// adapter the orchestrator is configured with; a dedicated summarization
/// call and the main turn's LLM call are both valid implementation choices.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        existing_summary: &str,
        folded: &[RollingEntry],
    ) -> std::result::Result<String, String>;
}

/// The full per-session LLM context: pinned prefix, rolling window, and
/// summary block, token-capped at `max_context_tokens`.
pub struct ContextBuffer {
    pub pinned: PinnedPrefix,
    pub rolling: RollingWindow,
    pub summary: SessionStateBlock,
    max_context_tokens: u32,
    rollover_trigger_tokens: u32,
    rollover_count: u64,
}

impl ContextBuffer {
    #[must_use]
    pub fn new(pinned: PinnedPrefix, max_context_tokens: u32, rollover_trigger_tokens: u32) -> Self {
        Self {
            pinned,
            rolling: RollingWindow::default(),
            summary: SessionStateBlock::default(),
            max_context_tokens,
            rollover_trigger_tokens,
            rollover_count: 0,
        }
    }

    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.pinned.tokens + self.rolling.tokens() + self.summary.tokens
    }

    /// Number of times [`Self::rollover`] has successfully folded entries
    /// into the summary block, for the per-session `context_rollover_count`
    /// analytics field (§6).
    #[must_use]
    pub fn rollover_count(&self) -> u64 {
        self.rollover_count
    }

    #[must_use]
    pub fn needs_rollover(&self) -> bool {
        self.total_tokens() >= self.rollover_trigger_tokens
    }

    /// Fold the oldest half of the rolling window into the summary block,
    /// calling `summarizer` with a deadline. No-op if rollover isn't
    /// currently needed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ContextOverflow`] if the summarization
    /// call fails or exceeds `deadline_ms`, or if the buffer is still over
    /// `max_context_tokens` after folding (nothing left to fold).
    pub async fn rollover(
        &mut self,
        summarizer: &dyn Summarizer,
        deadline_ms: u64,
    ) -> Result<()> {
        if !self.needs_rollover() {
            return Ok(());
        }

        let fold_count = self.rolling.entries().len().div_ceil(2).max(1);
        let folded = {
            let mut window = self.rolling.clone();
            let folded = window.drain_oldest(fold_count);
            self.rolling = window;
            folded
        };

        if folded.is_empty() {
            return Err(OrchestratorError::ContextOverflow(
                "rolling window is empty; nothing left to fold".to_string(),
            ));
        }

        let deadline = std::time::Duration::from_millis(deadline_ms);
        let summary_text = tokio::time::timeout(
            deadline,
            summarizer.summarize(&self.summary.summary, &folded),
        )
        .await
        .map_err(|_| OrchestratorError::ContextOverflow("summarization deadline exceeded".to_string()))?
        .map_err(OrchestratorError::ContextOverflow)?;

        self.summary.replace(summary_text);

        if self.total_tokens() > self.max_context_tokens {
            return Err(OrchestratorError::ContextOverflow(
                "context still over budget after rollover".to_string(),
            ));
        }

        self.rollover_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(
            &self,
            _existing: &str,
            folded: &[RollingEntry],
        ) -> std::result::Result<String, String> {
            Ok(format!("summary of {} entries", folded.len()))
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _existing: &str,
            _folded: &[RollingEntry],
        ) -> std::result::Result<String, String> {
            Err("upstream unavailable".to_string())
        }
    }

    struct SlowSummarizer;

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        async fn summarize(
            &self,
            _existing: &str,
            _folded: &[RollingEntry],
        ) -> std::result::Result<String, String> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok("late".to_string())
        }
    }

    fn buffer_with_entries(n: usize) -> ContextBuffer {
        let mut buffer = ContextBuffer::new(PinnedPrefix::new("you are a helpful assistant"), 8_192, 100);
        for i in 0..n {
            buffer.rolling.push(Role::User, format!("message number {i} ".repeat(20)));
        }
        buffer
    }

    #[test]
    fn needs_rollover_reflects_trigger_threshold() {
        let buffer = ContextBuffer::new(PinnedPrefix::new("hi"), 8_192, 7_500);
        assert!(!buffer.needs_rollover());
    }

    #[test]
    fn rollover_triggers_at_exactly_the_threshold_not_one_token_under() {
        let mut buffer = ContextBuffer::new(PinnedPrefix::new(""), 8_192, 7_500);
        // Pinned prefix contributes 0 tokens (empty text); push one entry
        // whose estimated token count lands exactly on the boundary.
        buffer.rolling.push(Role::User, "x".repeat(7_500 * 4));
        assert_eq!(buffer.total_tokens(), 7_500);
        assert!(buffer.needs_rollover());

        let mut under = ContextBuffer::new(PinnedPrefix::new(""), 8_192, 7_500);
        under.rolling.push(Role::User, "x".repeat(7_500 * 4 - 4));
        assert_eq!(under.total_tokens(), 7_499);
        assert!(!under.needs_rollover());
    }

    #[tokio::test]
    async fn rollover_folds_oldest_entries_into_summary() {
        let mut buffer = buffer_with_entries(10);
        assert!(buffer.needs_rollover());
        let before = buffer.rolling.entries().len();

        buffer.rollover(&StubSummarizer, 5_000).await.expect("rollover succeeds");

        assert!(buffer.rolling.entries().len() < before);
        assert!(buffer.summary.tokens > 0);
    }

    #[tokio::test]
    async fn second_rollover_without_a_new_turn_does_no_additional_summarization() {
        // Trigger is small relative to the entries so a single fold (half
        // of three entries, rounded up = two) clears it, unlike
        // `buffer_with_entries`'s fixture where one fold still leaves the
        // window over its own (much larger) trigger.
        let mut buffer = ContextBuffer::new(PinnedPrefix::new(""), 8_192, 25);
        buffer.rolling.push(Role::User, "x".repeat(40));
        buffer.rolling.push(Role::User, "x".repeat(40));
        buffer.rolling.push(Role::User, "x".repeat(40));
        assert!(buffer.needs_rollover());

        buffer.rollover(&StubSummarizer, 5_000).await.expect("first rollover succeeds");
        assert!(!buffer.needs_rollover(), "one fold should clear the trigger for this fixture");

        let entries_after_first = buffer.rolling.entries().len();
        let summary_after_first = buffer.summary.summary.clone();
        let count_after_first = buffer.rollover_count();

        buffer.rollover(&StubSummarizer, 5_000).await.expect("second call is a no-op, not an error");

        assert_eq!(buffer.rolling.entries().len(), entries_after_first);
        assert_eq!(buffer.summary.summary, summary_after_first);
        assert_eq!(buffer.rollover_count(), count_after_first);
    }

    #[tokio::test]
    async fn rollover_is_noop_when_not_needed() {
        let mut buffer = ContextBuffer::new(PinnedPrefix::new("hi"), 8_192, 7_500);
        buffer.rolling.push(Role::User, "hello");
        buffer.rollover(&StubSummarizer, 5_000).await.expect("noop");
        assert_eq!(buffer.summary.tokens, 0);
    }

    #[tokio::test]
    async fn rollover_propagates_summarizer_failure_as_context_overflow() {
        let mut buffer = buffer_with_entries(10);
        let result = buffer.rollover(&FailingSummarizer, 5_000).await;
        assert!(matches!(result, Err(OrchestratorError::ContextOverflow(_))));
    }

    #[tokio::test]
    async fn rollover_enforces_its_deadline() {
        let mut buffer = buffer_with_entries(10);
        let result = buffer.rollover(&SlowSummarizer, 10).await;
        assert!(matches!(result, Err(OrchestratorError::ContextOverflow(_))));
    }
}
