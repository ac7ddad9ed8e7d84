//! Animation cadence policy: heartbeat, slow-freeze, and drop (§4.7).

pub mod heartbeat;

pub use heartbeat::{AnimationAction, HeartbeatPolicy};
