//! LLM context management (§4.5): the pinned/rolling/summary context
//! buffer and the token accounting that drives rollover.

pub mod context;

pub use context::{
    ContextBuffer, PinnedPrefix, Role, RollingEntry, RollingWindow, SessionStateBlock, Summarizer,
};
