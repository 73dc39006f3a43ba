use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use gadq_core::error::Result;
use gadq_core::protocol::CapabilityToken;

/// A pluggable action, invoked only after the policy gate approved the run.
///
/// Implementations are opaque to the executor: any `Err` is recorded as
/// chain failure data, never propagated as a run failure.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Registry key (the `<chain>` in `use chain.<chain>("<target>")`).
    fn chain(&self) -> &'static str;
    async fn invoke(&self, input: &str, token: &CapabilityToken) -> Result<Value>;
}

/// Chains keyed by name.
#[derive(Default)]
pub struct ChainRegistry {
    chains: DashMap<&'static str, Arc<dyn Chain>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
        }
    }

    pub fn register(&self, chain: Arc<dyn Chain>) {
        if self.chains.insert(chain.chain(), chain).is_some() {
            tracing::warn!("chain registered twice; previous implementation replaced");
        }
    }

    pub fn get(&self, chain: &str) -> Option<Arc<dyn Chain>> {
        self.chains.get(chain).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, chain: &str) -> bool {
        self.chains.contains_key(chain)
    }

    pub fn registered(&self) -> Vec<&'static str> {
        let mut out: Vec<_> = self.chains.iter().map(|e| *e.key()).collect();
        out.sort_unstable();
        out
    }
}
