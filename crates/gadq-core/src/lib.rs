//! gadq core: capability tokens, source descriptions, error types, and clocks.
//!
//! This crate defines the token wire format, the signing/verification service,
//! and the error surface shared by the gateway runtime and any tooling that
//! needs to mint or inspect tokens. It carries no async runtime or file-log
//! dependencies so it can be reused in multiple contexts.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `GadqError`/`Result` or, for token
//! validation, as a `TokenFault` verdict.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod error;
pub mod protocol;
pub mod token;

/// Shared result type.
pub use error::{GadqError, Result};
