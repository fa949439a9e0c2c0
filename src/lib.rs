//! tldr-dispatch: a policy-gated, stateful dispatcher for community content.
//!
//! Each invocation loads persisted state, works through the candidate streams in
//! priority order, answers at most a handful of items within the run and daily
//! caps, and writes state back once at the end.

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod responder;
pub mod source;
pub mod state;
pub mod stats;
pub mod text;
