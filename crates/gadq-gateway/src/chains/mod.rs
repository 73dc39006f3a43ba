//! Built-in demonstration chains.
//!
//! Each one re-validates the token it is handed before doing any work.

pub mod detect;

pub use detect::DetectChain;
