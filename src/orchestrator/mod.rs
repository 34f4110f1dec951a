//! Round-based streaming orchestration of model output and tool calls.
//!
//! A session alternates between streaming one model response and executing
//! the tool calls it requested, until the model stops, the round budget runs
//! out (one forced tool-less call then ends it), the deadline passes, or an
//! error occurs. Every session ends with exactly one `done` or `error` event.

pub mod accumulator;
pub mod budget;
pub mod dedup;
pub mod events;
pub mod finalizer;
pub mod round;
pub mod router;
pub mod runner;

pub use accumulator::ToolCallAccumulator;
pub use budget::{SessionBudget, TimeoutGuard};
pub use dedup::DuplicateCallDetector;
pub use events::{EventStream, StreamEvent};
pub use finalizer::ForcedFinalizer;
pub use round::{RoundOutcome, RoundState};
pub use router::{classify, ToolRoute, ToolRouter};
pub use runner::{StreamOrchestrator, StreamRequest};
