use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinError;

use gadq_core::error::{GadqError, Result};
use gadq_core::protocol::{CapabilityToken, ParsedSource, SourceParser};
use gadq_core::token::TokenService;

use crate::audit::{AuditEvent, AuditLog, Component, EventKind, TraceId};
use crate::config::GadqConfig;
use crate::dispatch::{Chain, ChainRegistry};
use crate::policy::PolicyGate;

/// Run lifecycle. `Denied` and a missing source end the run before any
/// chain is invoked. So does a ttl outside the token service bounds: it is
/// rejected as `BadRequest` right after `ChainChosen`, before a token is
/// minted, rather than surfacing later as a self-check or schema failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Start,
    Parsed,
    ChainChosen,
    TokenIssued,
    TokenSelfChecked,
    PolicyAllowed,
    PolicyDenied,
    ChainInvoked,
    Success,
    ChainError,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_chain: String,
    pub default_target: String,
    pub permissions: Vec<String>,
    pub input: String,
    pub embed_pubkey: bool,
}

impl From<&GadqConfig> for ExecutorSettings {
    fn from(cfg: &GadqConfig) -> Self {
        Self {
            default_chain: cfg.executor.default_chain.clone(),
            default_target: cfg.executor.default_target.clone(),
            permissions: cfg.executor.permissions.clone(),
            input: cfg.executor.input.clone(),
            embed_pubkey: cfg.tokens.embed_pubkey,
        }
    }
}

/// Composite result. Returned whether the chain succeeded or failed.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub parsed: ParsedSource,
    pub token: CapabilityToken,
    pub result: Value,
    pub trace_id: TraceId,
    pub chain: String,
    pub state: RunState,
    /// Chain wall time; callers enforce their own latency budget with it.
    pub chain_elapsed_s: Option<f64>,
    pub duration_s: f64,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Success
    }
}

pub struct Executor {
    tokens: Arc<TokenService>,
    gate: Arc<PolicyGate>,
    audit: Arc<AuditLog>,
    chains: Arc<ChainRegistry>,
    parser: Arc<dyn SourceParser>,
    settings: ExecutorSettings,
}

/// Per-run bookkeeping.
struct RunCtx<'a> {
    trace_id: TraceId,
    origin: &'a str,
    started: Instant,
    state: RunState,
}

impl RunCtx<'_> {
    fn advance(&mut self, next: RunState) {
        tracing::debug!(trace_id = %self.trace_id, from = ?self.state, to = ?next, "run state");
        self.state = next;
    }
}

impl Executor {
    pub fn new(
        tokens: Arc<TokenService>,
        gate: Arc<PolicyGate>,
        audit: Arc<AuditLog>,
        chains: Arc<ChainRegistry>,
        parser: Arc<dyn SourceParser>,
        settings: ExecutorSettings,
    ) -> Self {
        Self { tokens, gate, audit, chains, parser, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run the action description stored at `source`.
    ///
    /// Returns `Err` only before the chain is called: `SourceNotFound`,
    /// `BadRequest` (unparseable source, ttl out of bounds), `Config` /
    /// `KeyStore` (fatal) or `PolicyDenied`. Chain failures, panics included,
    /// are reported inside the returned outcome.
    pub async fn run(&self, source: impl AsRef<Path>, origin: &str, ttl: i64) -> Result<RunOutcome> {
        let path = source.as_ref();
        let mut ctx = self.begin(origin, path.display().to_string());

        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => {
                let (result, err) = if e.kind() == ErrorKind::NotFound {
                    ("file_not_found", GadqError::SourceNotFound(path.display().to_string()))
                } else {
                    ("source_unreadable", GadqError::BadRequest(format!("{}: {e}", path.display())))
                };
                self.emit(&ctx, EventKind::Error { result: result.into() }, None);
                return Err(err);
            }
        };

        self.execute(&mut ctx, &text, ttl).await
    }

    /// Run an in-memory action description.
    pub async fn run_source(&self, text: &str, origin: &str, ttl: i64) -> Result<RunOutcome> {
        let mut ctx = self.begin(origin, "<inline>".into());
        self.execute(&mut ctx, text, ttl).await
    }

    fn begin<'a>(&self, origin: &'a str, source: String) -> RunCtx<'a> {
        let ctx = RunCtx {
            trace_id: TraceId::new(),
            origin,
            started: Instant::now(),
            state: RunState::Start,
        };
        tracing::info!(trace_id = %ctx.trace_id, %origin, %source, "run started");
        self.emit(&ctx, EventKind::Start { source }, None);
        ctx
    }

    async fn execute(&self, ctx: &mut RunCtx<'_>, text: &str, ttl: i64) -> Result<RunOutcome> {
        let parsed = self.parser.parse(text).inspect_err(|_| {
            self.emit(ctx, EventKind::Error { result: "parse_failed".into() }, None);
        })?;
        ctx.advance(RunState::Parsed);
        self.emit(
            ctx,
            EventKind::Parsed {
                imports: parsed.imports.clone(),
                functions: parsed.functions.clone(),
            },
            None,
        );

        let (chain, alias) = self.choose_chain(&parsed)?;
        ctx.advance(RunState::ChainChosen);
        self.emit(ctx, EventKind::ChooseChain { chosen: alias.clone() }, None);

        if !self.tokens.bounds().contains(ttl) {
            self.emit(ctx, EventKind::Error { result: "ttl_out_of_range".into() }, None);
            let b = self.tokens.bounds();
            return Err(GadqError::BadRequest(format!(
                "ttl {ttl} outside [{}, {}]",
                b.min, b.max
            )));
        }

        let token = self.issue(ctx.origin, &alias, ttl).inspect_err(|_| {
            self.emit(ctx, EventKind::Error { result: "token_generation_failed".into() }, None);
        })?;
        ctx.advance(RunState::TokenIssued);
        self.emit(ctx, EventKind::TokenGenerated, Some(&token));

        // A freshly minted token that does not verify means the keypair is broken.
        if !self.tokens.validate(&token, false) {
            self.emit(ctx, EventKind::Error { result: "token_validation_failed".into() }, Some(&token));
            tracing::error!(trace_id = %ctx.trace_id, "token failed self-check right after issuance");
            return Err(GadqError::Config(
                "token validation failed immediately after generation".into(),
            ));
        }
        ctx.advance(RunState::TokenSelfChecked);

        let verdict = self.gate.validate_before_execution(&token, ctx.origin, &ctx.trace_id);
        self.emit(
            ctx,
            EventKind::PolicyResult {
                ok: verdict.allowed,
                reason: verdict.reason.as_str().into(),
            },
            None,
        );
        if !verdict.allowed {
            ctx.advance(RunState::PolicyDenied);
            tracing::info!(trace_id = %ctx.trace_id, reason = verdict.reason.as_str(), "run denied");
            return Err(GadqError::PolicyDenied(verdict.reason.as_str().into()));
        }
        ctx.advance(RunState::PolicyAllowed);

        let input = self.settings.input.clone();
        self.emit(ctx, EventKind::CallChain { chain: alias.clone(), input: input.clone() }, None);
        ctx.advance(RunState::ChainInvoked);

        let call_started = Instant::now();
        let (result, chain_elapsed_s) = match invoke_isolated(chain, input, token.clone()).await {
            Ok(result) => {
                let elapsed_s = call_started.elapsed().as_secs_f64();
                ctx.advance(RunState::Success);
                self.emit(
                    ctx,
                    EventKind::ChainResult {
                        chain: alias.clone(),
                        elapsed_s,
                        result: result.clone(),
                    },
                    None,
                );
                (result, Some(elapsed_s))
            }
            Err(e) => {
                ctx.advance(RunState::ChainError);
                tracing::warn!(trace_id = %ctx.trace_id, chain = %alias, error = %e, "chain failed");
                self.emit(
                    ctx,
                    EventKind::ChainException { chain: alias.clone(), error: e.to_string() },
                    None,
                );
                (
                    json!({ "error": "chain_execution_error", "details": e.to_string() }),
                    None,
                )
            }
        };

        let duration_s = ctx.started.elapsed().as_secs_f64();
        self.emit(ctx, EventKind::End { duration_s }, None);
        tracing::info!(trace_id = %ctx.trace_id, state = ?ctx.state, duration_s, "run finished");

        Ok(RunOutcome {
            parsed,
            token,
            result,
            trace_id: ctx.trace_id.clone(),
            chain: alias,
            state: ctx.state,
            chain_elapsed_s,
            duration_s,
        })
    }

    /// First import's chain if registered, else the default chain.
    fn choose_chain(&self, parsed: &ParsedSource) -> Result<(Arc<dyn Chain>, String)> {
        if let Some(imp) = parsed.first_import() {
            if let Some(chain) = self.chains.get(&imp.chain) {
                return Ok((chain, format!("{}:{}", imp.chain, imp.target)));
            }
            tracing::debug!(chain = %imp.chain, "unregistered chain; using default");
        }

        let s = &self.settings;
        let chain = self.chains.get(&s.default_chain).ok_or_else(|| {
            GadqError::Config(format!("default chain not registered: {}", s.default_chain))
        })?;
        Ok((chain, format!("{}:{}", s.default_chain, s.default_target)))
    }

    fn issue(&self, origin: &str, target: &str, ttl: i64) -> Result<CapabilityToken> {
        let perms = &self.settings.permissions;
        if self.settings.embed_pubkey {
            self.tokens.generate(origin, target, perms, ttl)
        } else {
            self.tokens.generate_detached(origin, target, perms, ttl)
        }
    }

    fn emit(&self, ctx: &RunCtx<'_>, kind: EventKind, token: Option<&CapabilityToken>) {
        let mut ev = AuditEvent::new(&ctx.trace_id, Component::Executor, kind).with_origin(ctx.origin);
        if let Some(t) = token {
            ev = ev.with_token(t);
        }
        self.audit.append(&ev);
    }
}

/// Invoke `chain` on its own task. A panic inside the chain comes back as a
/// `GadqError::Chain` instead of unwinding through the run.
async fn invoke_isolated(
    chain: Arc<dyn Chain>,
    input: String,
    token: CapabilityToken,
) -> Result<Value> {
    tokio::spawn(async move { chain.invoke(&input, &token).await })
        .await
        .unwrap_or_else(|e| Err(GadqError::Chain(join_failure(e))))
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".into());
    format!("chain panicked: {msg}")
}
