//! Policy gate (blacklist, per-origin rate limiting, token checks).
//!
//! Evaluated once per run between token issuance and chain invocation.

pub mod engine;
pub mod window;

pub use engine::{GateReason, GateVerdict, PolicyGate, PolicyLimits};
pub use window::RequestWindows;
