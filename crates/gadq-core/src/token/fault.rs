use thiserror::Error;

/// Why a token was rejected.
///
/// Callers of `TokenService::validate` only ever see a boolean; the fault is
/// kept for logs and for callers that need a specific reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenFault {
    #[error("invalid schema: {0}")]
    Schema(String),
    #[error("ttl {ttl} outside [{min}, {max}]")]
    TtlOutOfRange { ttl: i64, min: i64, max: i64 },
    #[error("embedded pubkey required but absent")]
    MissingPubkey,
    #[error("malformed pubkey")]
    BadKey,
    #[error("malformed signature")]
    BadSignature,
    #[error("signature does not verify")]
    SignatureMismatch,
    #[error("expired (age {age}s, ttl {ttl}s)")]
    Expired { age: i64, ttl: i64 },
    #[error("key store: {0}")]
    KeyStore(String),
}

impl TokenFault {
    /// Structural problems (as opposed to cryptographic or temporal ones).
    pub fn is_schema(&self) -> bool {
        matches!(self, TokenFault::Schema(_) | TokenFault::TtlOutOfRange { .. })
    }
}
