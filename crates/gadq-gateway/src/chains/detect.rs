use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use gadq_core::error::Result;
use gadq_core::protocol::CapabilityToken;
use gadq_core::token::TokenService;

use crate::dispatch::Chain;

/// Simulated object detection.
pub struct DetectChain {
    name: &'static str,
    work: Duration,
    confidence: f64,
    tokens: Arc<TokenService>,
}

impl DetectChain {
    /// Immediate answer.
    pub fn python(tokens: Arc<TokenService>) -> Self {
        Self { name: "python", work: Duration::ZERO, confidence: 0.92, tokens }
    }

    /// Fast, reliable (100 ms).
    pub fn rust(tokens: Arc<TokenService>) -> Self {
        Self { name: "rust", work: Duration::from_millis(100), confidence: 0.90, tokens }
    }

    /// Slow (3 s); useful for exercising caller-side latency budgets.
    pub fn slow(tokens: Arc<TokenService>) -> Self {
        Self { name: "slow", work: Duration::from_secs(3), confidence: 0.85, tokens }
    }
}

#[async_trait]
impl Chain for DetectChain {
    fn chain(&self) -> &'static str {
        self.name
    }

    async fn invoke(&self, input: &str, token: &CapabilityToken) -> Result<Value> {
        if !self.tokens.validate(token, false) {
            return Ok(json!({ "error": "invalid_or_expired_token", "chain": self.name }));
        }

        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }

        Ok(json!({
            "chain": self.name,
            "target": "object_detected",
            "confidence": self.confidence,
            "image": input,
        }))
    }
}
