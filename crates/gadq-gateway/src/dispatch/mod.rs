//! Chain registry exports.
//!
//! Re-exports the registry and the `Chain` trait so chain implementations can
//! depend on this module directly.

pub mod registry;

pub use registry::{Chain, ChainRegistry};
