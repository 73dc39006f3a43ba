//! End-to-end orchestration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use gadq_core::clock::{Clock, ManualClock};
use gadq_core::error::{GadqError, Result};
use gadq_core::protocol::{CapabilityToken, GadParser};
use gadq_core::token::{TokenService, TtlBounds, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use gadq_gateway::app_state::AppState;
use gadq_gateway::audit::{AuditLog, AuditLogConfig};
use gadq_gateway::chains::DetectChain;
use gadq_gateway::config::GadqConfig;
use gadq_gateway::dispatch::{Chain, ChainRegistry};
use gadq_gateway::executor::{Executor, ExecutorSettings, RunState};
use gadq_gateway::policy::PolicyGate;

use harness::{limits, read_events, T0};

struct Fixture {
    dir: TempDir,
    state: AppState,
}

impl Fixture {
    fn new(rate_limit_max: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = GadqConfig::with_defaults();
        cfg.tokens.key_dir = dir.path().join("keys").display().to_string();
        cfg.audit.path = dir.path().join("logs/events.ndjson").display().to_string();
        cfg.policy.rate_limit_max = rate_limit_max;

        let state = AppState::with_clock(cfg, Arc::new(ManualClock::new(T0))).unwrap();
        Self { dir, state }
    }

    fn source(&self, name: &str, text: &str) -> PathBuf {
        let p = self.dir.path().join(name);
        fs::write(&p, text).unwrap();
        p
    }

    fn trace_events(&self, trace_id: &str) -> Vec<Value> {
        read_events(self.state.audit().path())
            .into_iter()
            .filter(|e| e["trace_id"] == trace_id)
            .collect()
    }
}

fn actions(events: &[Value], component: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e["component"] == component)
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect()
}

struct BrokenChain;

#[async_trait]
impl Chain for BrokenChain {
    fn chain(&self) -> &'static str {
        "broken"
    }

    async fn invoke(&self, _input: &str, _token: &CapabilityToken) -> Result<Value> {
        Err(GadqError::Chain("sensor offline".into()))
    }
}

struct PanickingChain;

#[async_trait]
impl Chain for PanickingChain {
    fn chain(&self) -> &'static str {
        "boom"
    }

    async fn invoke(&self, _input: &str, _token: &CapabilityToken) -> Result<Value> {
        let frames: Vec<u8> = Vec::new();
        let idx = frames.len() + 3;
        Ok(Value::from(frames[idx]))
    }
}

/// First read returns `first`, every later read returns `later`.
struct JumpingClock {
    first: u64,
    later: u64,
    reads: AtomicUsize,
}

impl Clock for JumpingClock {
    fn now_secs(&self) -> u64 {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first
        } else {
            self.later
        }
    }
}

#[tokio::test]
async fn default_chain_end_to_end() {
    let fx = Fixture::new(5);
    let src = fx.source("plain.gad", "fn main(image):\n    print(image)\n");

    let out = fx.state.executor().run(&src, "user:paulo", 10).await.unwrap();

    assert!(out.succeeded());
    assert_eq!(out.chain, "python:detect");
    assert!(out.parsed.imports.is_empty());
    assert_eq!(out.parsed.functions[0].name, "main");
    assert_eq!(out.result["chain"], "python");
    assert_eq!(out.result["confidence"], 0.92);
    assert_eq!(out.result["image"], "simulated.jpg");
    assert!(out.chain_elapsed_s.is_some());
    assert!(fx.state.tokens().validate(&out.token, true));

    let claims = out.token.claims().unwrap();
    assert_eq!(claims.origin.as_deref(), Some("user:paulo"));
    assert_eq!(claims.target.as_deref(), Some("python:detect"));
    assert_eq!(claims.permissions, ["vision"]);

    let events = fx.trace_events(out.trace_id.as_str());
    assert_eq!(events.first().unwrap()["action"], "start");
    assert_eq!(events.last().unwrap()["action"], "end");
    assert_eq!(
        actions(&events, "executor"),
        [
            "start",
            "parsed",
            "choose_chain",
            "token_generated",
            "aisand_result",
            "call_chain",
            "chain_result",
            "end"
        ]
    );
    assert_eq!(actions(&events, "AISand").last().unwrap(), "aisand_final");

    let gate = events.iter().find(|e| e["action"] == "aisand_result").unwrap();
    assert_eq!(gate["ok"], true);
    assert_eq!(gate["reason"], "ok");
}

#[tokio::test]
async fn first_import_selects_registered_chain() {
    let fx = Fixture::new(5);
    let src = fx.source(
        "fast.gad",
        "use chain.rust(\"classify\") as fast\nuse chain.python(\"detect\") as slowpoke\n",
    );

    let out = fx.state.executor().run(&src, "user:paulo", 10).await.unwrap();
    assert_eq!(out.chain, "rust:classify");
    assert_eq!(out.result["chain"], "rust");
    assert_eq!(out.token.claims().unwrap().target.as_deref(), Some("rust:classify"));
}

#[tokio::test]
async fn unknown_chain_falls_back_to_default() {
    let fx = Fixture::new(5);
    let out = fx
        .state
        .executor()
        .run_source("use chain.cobol(\"ledger\") as old\n", "user:paulo", 10)
        .await
        .unwrap();
    assert_eq!(out.chain, "python:detect");
    assert!(out.succeeded());
}

#[tokio::test]
async fn chain_failure_is_captured_as_data() {
    let fx = Fixture::new(5);
    fx.state.chains().register(Arc::new(BrokenChain));

    let out = fx
        .state
        .executor()
        .run_source("use chain.broken(\"camera\") as cam\n", "user:paulo", 10)
        .await
        .unwrap();

    assert_eq!(out.state, RunState::ChainError);
    assert_eq!(out.result["error"], "chain_execution_error");
    assert!(out.result["details"].as_str().unwrap().contains("sensor offline"));
    assert!(out.chain_elapsed_s.is_none());

    let events = fx.trace_events(out.trace_id.as_str());
    let acts = actions(&events, "executor");
    assert!(acts.contains(&"chain_exception".to_string()));
    assert!(!acts.contains(&"chain_result".to_string()));
    assert_eq!(acts.last().unwrap(), "end");
}

#[tokio::test]
async fn chain_panic_is_captured_as_data() {
    let fx = Fixture::new(5);
    fx.state.chains().register(Arc::new(PanickingChain));

    let out = fx
        .state
        .executor()
        .run_source("use chain.boom(\"x\") as b\n", "user:paulo", 10)
        .await
        .unwrap();

    assert_eq!(out.state, RunState::ChainError);
    assert_eq!(out.chain, "boom:x");
    assert_eq!(out.result["error"], "chain_execution_error");
    assert!(out.result["details"].as_str().unwrap().contains("index out of bounds"));

    let events = fx.trace_events(out.trace_id.as_str());
    let acts = actions(&events, "executor");
    assert_eq!(&acts[acts.len() - 3..], ["call_chain", "chain_exception", "end"]);
}

#[tokio::test]
async fn missing_source_aborts_before_issuance() {
    let fx = Fixture::new(5);
    let err = fx
        .state
        .executor()
        .run(fx.dir.path().join("nope.gad"), "user:paulo", 10)
        .await
        .unwrap_err();
    assert!(matches!(err, GadqError::SourceNotFound(_)));

    let events = read_events(fx.state.audit().path());
    let acts: Vec<&str> = events.iter().map(|e| e["action"].as_str().unwrap()).collect();
    assert_eq!(acts, ["start", "error"]);
    assert_eq!(events[1]["result"], "file_not_found");
}

#[tokio::test]
async fn policy_denial_stops_the_run() {
    let fx = Fixture::new(1);
    let exec = fx.state.executor();

    assert!(exec.run_source("", "user:eve", 10).await.unwrap().succeeded());

    let err = exec.run_source("", "user:eve", 10).await.unwrap_err();
    match err {
        GadqError::PolicyDenied(reason) => assert_eq!(reason, "rate_limit_exceeded_and_blacklisted"),
        other => panic!("unexpected {other:?}"),
    }

    let err = exec.run_source("", "user:eve", 10).await.unwrap_err();
    assert_eq!(err.to_string(), "execution blocked by policy gate: origin_blacklisted");

    // denied runs never reach the chain
    let events = read_events(fx.state.audit().path());
    let calls = events.iter().filter(|e| e["action"] == "call_chain").count();
    assert_eq!(calls, 1);
    let denied = events
        .iter()
        .filter(|e| e["action"] == "aisand_result" && e["ok"] == false)
        .count();
    assert_eq!(denied, 2);
}

#[tokio::test]
async fn ttl_outside_bounds_is_rejected() {
    let fx = Fixture::new(5);
    for ttl in [0, 3601] {
        let err = fx.state.executor().run_source("", "user:paulo", ttl).await.unwrap_err();
        assert_eq!(err.code().as_str(), "BAD_REQUEST");
        assert!(!err.is_fatal());
    }

    // rejected before a token exists or the gate is consulted
    let events = read_events(fx.state.audit().path());
    assert!(events.iter().all(|e| e["action"] != "token_generated"));
    assert!(events.iter().all(|e| e["component"] != "AISand"));
    let errors: Vec<&Value> = events.iter().filter(|e| e["action"] == "error").collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e["result"] == "ttl_out_of_range"));
    assert_eq!(fx.state.gate().request_count("user:paulo"), 0);
}

#[tokio::test]
async fn broken_keypair_is_fatal() {
    let fx = Fixture::new(5);
    let key_dir = PathBuf::from(&fx.state.cfg().tokens.key_dir);
    fs::create_dir_all(&key_dir).unwrap();
    fs::write(key_dir.join(PRIVATE_KEY_FILE), [7u8; 32]).unwrap();
    fs::write(key_dir.join(PUBLIC_KEY_FILE), [9u8; 32]).unwrap();

    let err = fx.state.executor().run_source("", "user:paulo", 10).await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
}

#[tokio::test]
async fn token_failing_self_check_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let log_clock = Arc::new(ManualClock::new(T0));
    // issuance reads the clock once; the self-check sees an hour later
    let token_clock = Arc::new(JumpingClock {
        first: T0,
        later: T0 + 3600,
        reads: AtomicUsize::new(0),
    });

    let tokens = Arc::new(TokenService::with_clock(
        dir.path().join("keys"),
        TtlBounds::default(),
        token_clock,
    ));
    let audit = Arc::new(AuditLog::with_clock(
        AuditLogConfig {
            path: dir.path().join("events.ndjson"),
            max_bytes: 1024 * 1024,
            backup_count: 5,
        },
        log_clock.clone(),
    ));
    let gate = Arc::new(PolicyGate::new(limits(10, 5), tokens.clone(), audit.clone(), log_clock));
    let chains = Arc::new(ChainRegistry::new());
    chains.register(Arc::new(DetectChain::python(tokens.clone())));

    let exec = Executor::new(
        tokens,
        gate.clone(),
        audit.clone(),
        chains,
        Arc::new(GadParser::new().unwrap()),
        ExecutorSettings {
            default_chain: "python".into(),
            default_target: "detect".into(),
            permissions: vec!["vision".into()],
            input: "simulated.jpg".into(),
            embed_pubkey: true,
        },
    );

    let err = exec.run_source("", "user:paulo", 10).await.unwrap_err();
    assert!(matches!(err, GadqError::Config(_)), "{err:?}");
    assert!(err.is_fatal());

    let events = read_events(audit.path());
    let acts: Vec<&str> = events.iter().map(|e| e["action"].as_str().unwrap()).collect();
    assert_eq!(acts, ["start", "parsed", "choose_chain", "token_generated", "error"]);
    assert_eq!(events[4]["result"], "token_validation_failed");
    assert_eq!(gate.request_count("user:paulo"), 0);
}
