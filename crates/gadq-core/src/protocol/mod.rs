//! Wire-level contracts (capability tokens, action-description sources).
//!
//! Defines the serialized token shape shared by issuers, the policy gate, and
//! the audit trail, plus the parsed form of an action description.

pub mod source;
pub mod token;

pub use source::{ChainImport, FunctionDecl, GadParser, ParsedSource, SourceParser};
pub use token::{CapabilityToken, TokenClaims, TokenPayload};
