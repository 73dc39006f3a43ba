use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use gadq_core::clock::Clock;
use gadq_core::protocol::CapabilityToken;
use gadq_core::token::{TokenFault, TokenService};

use crate::audit::{AuditEvent, AuditLog, Component, EventKind, TraceId};
use crate::config::PolicySection;

use super::window::RequestWindows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimits {
    pub window_s: u64,
    pub max_requests: usize,
}

impl From<&PolicySection> for PolicyLimits {
    fn from(p: &PolicySection) -> Self {
        Self {
            window_s: p.rate_limit_window_s,
            max_requests: p.rate_limit_max,
        }
    }
}

/// Why the gate decided the way it did (stable strings, recorded in the trail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    Ok,
    OriginBlacklisted,
    InvalidTokenSchema,
    RateLimitExceededAndBlacklisted,
    SignatureInvalidOrMissingPubkey,
    SignatureInvalid,
    /// Gate state lock poisoned; fail closed.
    Unavailable,
}

impl GateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            GateReason::Ok => "ok",
            GateReason::OriginBlacklisted => "origin_blacklisted",
            GateReason::InvalidTokenSchema => "invalid_token_schema",
            GateReason::RateLimitExceededAndBlacklisted => "rate_limit_exceeded_and_blacklisted",
            GateReason::SignatureInvalidOrMissingPubkey => "signature_invalid_or_missing_pubkey",
            GateReason::SignatureInvalid => "signature_invalid",
            GateReason::Unavailable => "gate_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateVerdict {
    pub allowed: bool,
    pub reason: GateReason,
}

impl GateVerdict {
    fn allow() -> Self {
        Self { allowed: true, reason: GateReason::Ok }
    }

    fn deny(reason: GateReason) -> Self {
        Self { allowed: false, reason }
    }
}

enum RateOutcome {
    Admitted(usize),
    Exceeded(usize),
    AlreadyBlacklisted,
}

#[derive(Debug)]
struct GateState {
    windows: RequestWindows,
    blacklist: HashSet<String>,
}

/// Pre-execution checkpoint.
/// Construct once at startup, then share via Arc.
///
/// Window and blacklist mutations happen under one lock, so concurrent
/// requests from the same origin see sequential semantics. Nothing else
/// (audit I/O, signature checks) runs while the lock is held.
pub struct PolicyGate {
    limits: PolicyLimits,
    tokens: Arc<TokenService>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    state: Mutex<GateState>,
}

impl PolicyGate {
    pub fn new(
        limits: PolicyLimits,
        tokens: Arc<TokenService>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limits,
            tokens,
            audit,
            clock,
            state: Mutex::new(GateState {
                windows: RequestWindows::new(limits.window_s),
                blacklist: HashSet::new(),
            }),
        }
    }

    pub fn limits(&self) -> PolicyLimits {
        self.limits
    }

    /// Ordered checks: blacklist, schema, rate, signature/freshness.
    /// The first failing check decides; each check leaves one audit record.
    pub fn validate_before_execution(
        &self,
        token: &CapabilityToken,
        origin: &str,
        trace_id: &TraceId,
    ) -> GateVerdict {
        self.evaluate(Ok(token), token.to_value(), origin, trace_id)
    }

    /// Same as [`validate_before_execution`](Self::validate_before_execution)
    /// for a token that has not been decoded yet; an undecodable token is a
    /// schema failure.
    pub fn validate_raw_before_execution(
        &self,
        token: &Value,
        origin: &str,
        trace_id: &TraceId,
    ) -> GateVerdict {
        match CapabilityToken::from_value(token) {
            Ok(t) => self.evaluate(Ok(&t), token.clone(), origin, trace_id),
            Err(fault) => self.evaluate(Err(fault), token.clone(), origin, trace_id),
        }
    }

    fn evaluate(
        &self,
        token: std::result::Result<&CapabilityToken, TokenFault>,
        token_value: Value,
        origin: &str,
        trace_id: &TraceId,
    ) -> GateVerdict {
        let emit = |kind: EventKind| {
            self.audit.append(
                &AuditEvent::new(trace_id, Component::Gate, kind)
                    .with_origin(origin)
                    .with_token_value(token_value.clone()),
            );
        };

        // 1) blacklist
        match self.is_listed(origin) {
            Some(false) => emit(EventKind::BlacklistCheck { result: "ok".into() }),
            Some(true) => return self.reject(&emit, origin, GateReason::OriginBlacklisted),
            None => return self.reject(&emit, origin, GateReason::Unavailable),
        }

        // 2) schema
        let token = match token.and_then(|t| self.tokens.schema_check(t).map(|_| t)) {
            Ok(t) => t,
            Err(fault) => {
                tracing::debug!(%origin, %fault, "token schema rejected");
                emit(EventKind::SchemaCheck {
                    result: GateReason::InvalidTokenSchema.as_str().into(),
                });
                return GateVerdict::deny(GateReason::InvalidTokenSchema);
            }
        };
        emit(EventKind::SchemaCheck { result: "ok".into() });

        // 3) rate accounting
        match self.record_request(origin) {
            Some(RateOutcome::Admitted(count)) => emit(EventKind::RateCheck {
                result: "ok".into(),
                count,
            }),
            Some(RateOutcome::Exceeded(count)) => {
                tracing::warn!(%origin, count, max = self.limits.max_requests, "rate limit exceeded; origin blacklisted");
                emit(EventKind::RateCheck {
                    result: GateReason::RateLimitExceededAndBlacklisted.as_str().into(),
                    count,
                });
                return GateVerdict::deny(GateReason::RateLimitExceededAndBlacklisted);
            }
            Some(RateOutcome::AlreadyBlacklisted) => {
                return self.reject(&emit, origin, GateReason::OriginBlacklisted)
            }
            None => return self.reject(&emit, origin, GateReason::Unavailable),
        }

        // 4) signature + freshness
        if let Err(fault) = self.tokens.verify(token, false) {
            tracing::debug!(%origin, %fault, "token signature rejected");
            emit(EventKind::SignatureCheck { result: "invalid".into() });
            let reason = if token.has_embedded_key() {
                GateReason::SignatureInvalid
            } else {
                GateReason::SignatureInvalidOrMissingPubkey
            };
            return GateVerdict::deny(reason);
        }
        emit(EventKind::SignatureCheck { result: "valid".into() });

        // 5) accept
        emit(EventKind::GateFinal { result: "ok".into() });
        GateVerdict::allow()
    }

    fn reject(&self, emit: &dyn Fn(EventKind), origin: &str, reason: GateReason) -> GateVerdict {
        tracing::debug!(%origin, reason = reason.as_str(), "gate rejected");
        emit(EventKind::BlacklistCheck { result: reason.as_str().into() });
        GateVerdict::deny(reason)
    }

    /// None when the state lock is poisoned.
    fn is_listed(&self, origin: &str) -> Option<bool> {
        let st = self.state.lock().ok()?;
        Some(st.blacklist.contains(origin))
    }

    // Prune + append + compare + blacklist as one critical section.
    fn record_request(&self, origin: &str) -> Option<RateOutcome> {
        let now = self.clock.now_secs();
        let mut st = self.state.lock().ok()?;

        if st.blacklist.contains(origin) {
            return Some(RateOutcome::AlreadyBlacklisted);
        }

        let count = st.windows.record(origin, now);
        if count > self.limits.max_requests {
            st.blacklist.insert(origin.to_string());
            st.windows.forget(origin);
            return Some(RateOutcome::Exceeded(count));
        }

        if count == 1 {
            // new or revived origin: opportunistically drop idle ones
            st.windows.sweep(now);
        }
        Some(RateOutcome::Admitted(count))
    }

    pub fn is_blacklisted(&self, origin: &str) -> bool {
        // poisoned state counts as listed (fail closed)
        self.is_listed(origin).unwrap_or(true)
    }

    /// Requests from `origin` currently inside the window.
    pub fn request_count(&self, origin: &str) -> usize {
        let now = self.clock.now_secs();
        self.state
            .lock()
            .map(|mut st| st.windows.count(origin, now))
            .unwrap_or(0)
    }

    pub fn blacklisted(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .state
            .lock()
            .map(|st| st.blacklist.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}
