//! Capability token wire format.
//!
//! ```json
//! {"payload":"{\"created\":1700000000,\"origin\":\"user:paulo\",...}",
//!  "signature":"<hex>","ttl":10,"pubkey":"<hex>"}
//! ```
//!
//! `payload` is kept as the exact signed string. Re-serializing it would
//! break signature verification.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::token::TokenFault;

/// Signed capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Canonical JSON payload (exact bytes that were signed).
    pub payload: String,
    /// Hex-encoded Ed25519 signature over `payload`.
    pub signature: String,
    /// Lifetime in seconds, counted from `created`.
    pub ttl: i64,
    /// Hex-encoded verifying key, when the issuer embedded it.
    /// An explicit `null` is a schema error, not "no key".
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_pubkey"
    )]
    pub pubkey: Option<String>,
}

fn present_pubkey<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    String::deserialize(d).map(Some)
}

impl CapabilityToken {
    /// Strictly decode a loosely-typed token (e.g. read from a file or the wire).
    pub fn from_value(v: &Value) -> Result<Self, TokenFault> {
        serde_json::from_value(v.clone())
            .map_err(|e| TokenFault::Schema(format!("token shape: {e}")))
    }

    /// Encode as a JSON value (the shape the audit trail masks).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn has_embedded_key(&self) -> bool {
        self.pubkey.is_some()
    }

    /// Parse the claims carried in `payload` without checking the signature.
    pub fn claims(&self) -> Result<TokenClaims, TokenFault> {
        TokenClaims::parse(&self.payload)
    }
}

/// Payload as issued. Field order is alphabetical so the compact encoding is
/// canonical (sorted keys, no whitespace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub created: i64,
    pub origin: String,
    pub permissions: Vec<String>,
    pub target: String,
}

impl TokenPayload {
    /// Canonical compact JSON encoding.
    pub fn canonical(&self) -> Result<String, TokenFault> {
        serde_json::to_string(self).map_err(|e| TokenFault::Schema(format!("encode payload: {e}")))
    }
}

/// Claims recovered from an untrusted payload. Only `created` is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub created: i64,
    pub origin: Option<String>,
    pub target: Option<String>,
    pub permissions: Vec<String>,
}

impl TokenClaims {
    pub fn parse(payload: &str) -> Result<Self, TokenFault> {
        let v: Value = serde_json::from_str(payload)
            .map_err(|e| TokenFault::Schema(format!("payload is not json: {e}")))?;
        let obj = v
            .as_object()
            .ok_or_else(|| TokenFault::Schema("payload is not an object".into()))?;

        let created = obj
            .get("created")
            .and_then(Value::as_i64)
            .ok_or_else(|| TokenFault::Schema("payload.created must be an integer".into()))?;

        let permissions = obj
            .get("permissions")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|p| p.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        Ok(Self {
            created,
            origin: obj.get("origin").and_then(Value::as_str).map(str::to_string),
            target: obj.get("target").and_then(Value::as_str).map(str::to_string),
            permissions,
        })
    }
}
