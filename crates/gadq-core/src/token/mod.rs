//! Capability token issuance and validation.
//!
//! - `keys`: lazily created, persisted Ed25519 keypair (cached per store).
//! - `service`: canonical payload signing, schema/signature/freshness checks.

pub mod fault;
pub mod keys;
pub mod service;

pub use fault::TokenFault;
pub use keys::{KeyPair, KeyStore, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use service::{TokenService, TtlBounds, MAX_TTL, MIN_TTL};
