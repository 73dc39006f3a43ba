//! Token issuance and validation.
//!
//! `validate` is fail-closed: every anomaly (shape, encoding, key, signature,
//! age) yields `false` and nothing is raised. `verify` exposes the same checks
//! with a typed [`TokenFault`] for callers that need the reason.

use std::path::PathBuf;
use std::sync::Arc;

use ed25519_dalek::{Signature, Signer, VerifyingKey};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::{GadqError, Result};
use crate::protocol::token::{CapabilityToken, TokenClaims, TokenPayload};

use super::fault::TokenFault;
use super::keys::KeyStore;

pub const MIN_TTL: i64 = 1;
pub const MAX_TTL: i64 = 60 * 60;

/// Inclusive TTL range accepted at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlBounds {
    pub min: i64,
    pub max: i64,
}

impl Default for TtlBounds {
    fn default() -> Self {
        Self { min: MIN_TTL, max: MAX_TTL }
    }
}

impl TtlBounds {
    pub fn contains(&self, ttl: i64) -> bool {
        (self.min..=self.max).contains(&ttl)
    }
}

pub struct TokenService {
    keys: KeyStore,
    bounds: TtlBounds,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(key_dir, TtlBounds::default(), Arc::new(SystemClock))
    }

    pub fn with_clock(key_dir: impl Into<PathBuf>, bounds: TtlBounds, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: KeyStore::new(key_dir),
            bounds,
            clock,
        }
    }

    pub fn bounds(&self) -> TtlBounds {
        self.bounds
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Hex-encoded process verifying key.
    pub fn pubkey_hex(&self) -> Result<String> {
        Ok(self.keys.keypair()?.pubkey_hex())
    }

    /// Issue a token with the verifying key embedded.
    ///
    /// Only key storage faults can fail here; they are fatal for the caller.
    pub fn generate(
        &self,
        origin: &str,
        target: &str,
        permissions: &[String],
        ttl: i64,
    ) -> Result<CapabilityToken> {
        self.issue(origin, target, permissions, ttl, true)
    }

    /// Issue a token without the verifying key (verifiers use their local key).
    pub fn generate_detached(
        &self,
        origin: &str,
        target: &str,
        permissions: &[String],
        ttl: i64,
    ) -> Result<CapabilityToken> {
        self.issue(origin, target, permissions, ttl, false)
    }

    fn issue(
        &self,
        origin: &str,
        target: &str,
        permissions: &[String],
        ttl: i64,
        embed_pubkey: bool,
    ) -> Result<CapabilityToken> {
        let kp = self.keys.keypair()?;

        let payload = TokenPayload {
            created: self.now(),
            origin: origin.to_string(),
            permissions: permissions.to_vec(),
            target: target.to_string(),
        }
        .canonical()
        .map_err(|f| GadqError::Internal(f.to_string()))?;

        let signature = kp.signing_key().sign(payload.as_bytes());

        tracing::debug!(%origin, %target, ttl, "token issued");

        Ok(CapabilityToken {
            payload,
            signature: hex::encode(signature.to_bytes()),
            ttl,
            pubkey: embed_pubkey.then(|| kp.pubkey_hex()),
        })
    }

    /// Structural check: ttl inside bounds and a payload object with an
    /// integer `created`.
    pub fn schema_check(&self, token: &CapabilityToken) -> std::result::Result<TokenClaims, TokenFault> {
        if !self.bounds.contains(token.ttl) {
            return Err(TokenFault::TtlOutOfRange {
                ttl: token.ttl,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }
        token.claims()
    }

    /// Schema, then signature, then freshness.
    pub fn verify(
        &self,
        token: &CapabilityToken,
        require_embedded_key: bool,
    ) -> std::result::Result<TokenClaims, TokenFault> {
        let claims = self.schema_check(token)?;

        let vk = match &token.pubkey {
            Some(h) => decode_verifying_key(h)?,
            None if require_embedded_key => return Err(TokenFault::MissingPubkey),
            None => *self
                .keys
                .keypair()
                .map_err(|e| TokenFault::KeyStore(e.to_string()))?
                .verifying_key(),
        };

        let sig_bytes = hex::decode(&token.signature).map_err(|_| TokenFault::BadSignature)?;
        let sig = Signature::from_slice(&sig_bytes).map_err(|_| TokenFault::BadSignature)?;
        vk.verify_strict(token.payload.as_bytes(), &sig)
            .map_err(|_| TokenFault::SignatureMismatch)?;

        let age = self.now().saturating_sub(claims.created);
        if age >= token.ttl {
            return Err(TokenFault::Expired { age, ttl: token.ttl });
        }

        Ok(claims)
    }

    /// Fail-closed verdict.
    pub fn validate(&self, token: &CapabilityToken, require_embedded_key: bool) -> bool {
        match self.verify(token, require_embedded_key) {
            Ok(_) => true,
            Err(fault) => {
                tracing::debug!(%fault, "token rejected");
                false
            }
        }
    }

    /// Fail-closed verdict for an untyped token.
    pub fn validate_value(&self, token: &Value, require_embedded_key: bool) -> bool {
        match CapabilityToken::from_value(token) {
            Ok(t) => self.validate(&t, require_embedded_key),
            Err(fault) => {
                tracing::debug!(%fault, "token rejected");
                false
            }
        }
    }

    fn now(&self) -> i64 {
        i64::try_from(self.clock.now_secs()).unwrap_or(i64::MAX)
    }
}

fn decode_verifying_key(h: &str) -> std::result::Result<VerifyingKey, TokenFault> {
    let bytes: [u8; 32] = hex::decode(h)
        .map_err(|_| TokenFault::BadKey)?
        .as_slice()
        .try_into()
        .map_err(|_| TokenFault::BadKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| TokenFault::BadKey)
}
