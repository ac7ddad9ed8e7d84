//! Message types, cancellation bookkeeping, and the stage orchestrator that
//! together drive one conversational turn (§4.3).

pub mod cancellation;
pub mod messages;
pub mod orchestrator;

pub use cancellation::CancellationSignal;
pub use orchestrator::{Orchestrator, TurnOutcome};
