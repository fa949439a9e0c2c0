//! Candidate streams and the engine that works through them.

pub mod engine;
pub mod report;
pub mod streams;

pub use engine::{DispatchEngine, format_reply};
pub use report::{RunReport, StreamReport};
pub use streams::StreamKind;
