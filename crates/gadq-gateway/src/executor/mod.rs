//! End-to-end run orchestration.
//!
//! parse -> choose chain -> issue token -> self-check -> policy gate ->
//! invoke chain -> record outcome, all under one trace id.

pub mod run;

pub use run::{Executor, ExecutorSettings, RunOutcome, RunState};
