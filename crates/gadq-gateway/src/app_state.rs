//! Shared application state.
//!
//! Builds every component once from config and wires them explicitly: the
//! token service and audit log are shared by the policy gate, the chains,
//! and the executor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gadq_core::clock::{Clock, SystemClock};
use gadq_core::error::{GadqError, Result};
use gadq_core::protocol::GadParser;
use gadq_core::token::TokenService;

use crate::audit::{AuditLog, AuditLogConfig, RotatorHandle};
use crate::chains::DetectChain;
use crate::config::GadqConfig;
use crate::dispatch::ChainRegistry;
use crate::executor::{Executor, ExecutorSettings};
use crate::policy::{PolicyGate, PolicyLimits};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GadqConfig,
    tokens: Arc<TokenService>,
    audit: Arc<AuditLog>,
    gate: Arc<PolicyGate>,
    chains: Arc<ChainRegistry>,
    executor: Executor,
}

impl AppState {
    pub fn new(cfg: GadqConfig) -> Result<Self> {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    /// Build application state on an explicit clock.
    pub fn with_clock(cfg: GadqConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        cfg.validate()?;

        // 1) leaf services
        let tokens = Arc::new(TokenService::with_clock(
            PathBuf::from(&cfg.tokens.key_dir),
            cfg.tokens.bounds(),
            Arc::clone(&clock),
        ));
        let audit = Arc::new(AuditLog::with_clock(
            AuditLogConfig::from(&cfg.audit),
            Arc::clone(&clock),
        ));
        let gate = Arc::new(PolicyGate::new(
            PolicyLimits::from(&cfg.policy),
            Arc::clone(&tokens),
            Arc::clone(&audit),
            clock,
        ));

        // 2) built-in chains
        let chains = Arc::new(ChainRegistry::new());
        chains.register(Arc::new(DetectChain::python(Arc::clone(&tokens))));
        chains.register(Arc::new(DetectChain::rust(Arc::clone(&tokens))));
        chains.register(Arc::new(DetectChain::slow(Arc::clone(&tokens))));

        // default chain <-> registry sanity check
        if !chains.contains(&cfg.executor.default_chain) {
            return Err(GadqError::Config(format!(
                "executor.default_chain refers to unregistered chain: {} (registered: {:?})",
                cfg.executor.default_chain,
                chains.registered()
            )));
        }

        // 3) executor
        let parser = Arc::new(GadParser::new()?);
        let executor = Executor::new(
            Arc::clone(&tokens),
            Arc::clone(&gate),
            Arc::clone(&audit),
            Arc::clone(&chains),
            parser,
            ExecutorSettings::from(&cfg),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner { cfg, tokens, audit, gate, chains, executor }),
        })
    }

    pub fn cfg(&self) -> &GadqConfig {
        &self.inner.cfg
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn tokens(&self) -> Arc<TokenService> {
        Arc::clone(&self.inner.tokens)
    }

    pub fn audit(&self) -> Arc<AuditLog> {
        Arc::clone(&self.inner.audit)
    }

    pub fn gate(&self) -> Arc<PolicyGate> {
        Arc::clone(&self.inner.gate)
    }

    pub fn chains(&self) -> Arc<ChainRegistry> {
        Arc::clone(&self.inner.chains)
    }

    /// Start the periodic rotation task when `audit.background_rotation` is on.
    pub fn spawn_rotator(&self) -> Option<RotatorHandle> {
        let a = &self.inner.cfg.audit;
        a.background_rotation.then(|| {
            RotatorHandle::spawn(self.audit(), Duration::from_secs(a.rotation_check_interval_s))
        })
    }
}
