//! gadq gateway library entry.
//!
//! This crate wires the policy gate, the audit trail, the chain registry,
//! and the executor into a runnable stack. It is intended to be consumed by
//! the binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod audit;
pub mod chains;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod policy;
