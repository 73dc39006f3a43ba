//! Shared error type across gadq crates.

use thiserror::Error;

/// Stable error codes (used in audit records and error-shaped results).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid input / malformed request.
    BadRequest,
    /// Action description could not be found.
    SourceNotFound,
    /// Rejected by the policy gate.
    PolicyDenied,
    /// Process cannot continue safely (bad config, broken keypair).
    ConfigFatal,
    /// Key storage unavailable or corrupt.
    KeyStore,
    /// The selected chain failed.
    ChainFailed,
    /// Audit sink failure.
    Audit,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::SourceNotFound => "SOURCE_NOT_FOUND",
            ErrorCode::PolicyDenied => "POLICY_DENIED",
            ErrorCode::ConfigFatal => "CONFIG_FATAL",
            ErrorCode::KeyStore => "KEY_STORE",
            ErrorCode::ChainFailed => "CHAIN_FAILED",
            ErrorCode::Audit => "AUDIT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, GadqError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum GadqError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("execution blocked by policy gate: {0}")]
    PolicyDenied(String),
    #[error("configuration fatal: {0}")]
    Config(String),
    #[error("key store: {0}")]
    KeyStore(String),
    #[error("chain failed: {0}")]
    Chain(String),
    #[error("audit: {0}")]
    Audit(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl GadqError {
    /// Map error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GadqError::BadRequest(_) => ErrorCode::BadRequest,
            GadqError::SourceNotFound(_) => ErrorCode::SourceNotFound,
            GadqError::PolicyDenied(_) => ErrorCode::PolicyDenied,
            GadqError::Config(_) => ErrorCode::ConfigFatal,
            GadqError::KeyStore(_) => ErrorCode::KeyStore,
            GadqError::Chain(_) => ErrorCode::ChainFailed,
            GadqError::Audit(_) => ErrorCode::Audit,
            GadqError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for faults that mean the process cannot safely continue
    /// issuing tokens.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GadqError::Config(_) | GadqError::KeyStore(_))
    }
}
