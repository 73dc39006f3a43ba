use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;
use serde_json::Value;

use gadq_core::protocol::{CapabilityToken, ChainImport, FunctionDecl};

/// Correlates every record of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Placeholder for gate calls made outside an orchestrated run.
    pub fn none() -> Self {
        Self("none".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Component {
    #[serde(rename = "executor")]
    Executor,
    #[serde(rename = "AISand")]
    Gate,
}

/// Every action the trail can record. Serialized flat into the envelope with
/// the variant name as `action`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventKind {
    Start {
        source: String,
    },
    Error {
        result: String,
    },
    Parsed {
        imports: Vec<ChainImport>,
        functions: Vec<FunctionDecl>,
    },
    ChooseChain {
        chosen: String,
    },
    TokenGenerated,
    BlacklistCheck {
        result: String,
    },
    SchemaCheck {
        result: String,
    },
    RateCheck {
        result: String,
        count: usize,
    },
    SignatureCheck {
        result: String,
    },
    #[serde(rename = "aisand_final")]
    GateFinal {
        result: String,
    },
    #[serde(rename = "aisand_result")]
    PolicyResult {
        ok: bool,
        reason: String,
    },
    CallChain {
        chain: String,
        input: String,
    },
    ChainResult {
        chain: String,
        elapsed_s: f64,
        result: Value,
    },
    ChainException {
        chain: String,
        error: String,
    },
    End {
        duration_s: f64,
    },
}

impl EventKind {
    pub fn action(&self) -> &'static str {
        match self {
            EventKind::Start { .. } => "start",
            EventKind::Error { .. } => "error",
            EventKind::Parsed { .. } => "parsed",
            EventKind::ChooseChain { .. } => "choose_chain",
            EventKind::TokenGenerated => "token_generated",
            EventKind::BlacklistCheck { .. } => "blacklist_check",
            EventKind::SchemaCheck { .. } => "schema_check",
            EventKind::RateCheck { .. } => "rate_check",
            EventKind::SignatureCheck { .. } => "signature_check",
            EventKind::GateFinal { .. } => "aisand_final",
            EventKind::PolicyResult { .. } => "aisand_result",
            EventKind::CallChain { .. } => "call_chain",
            EventKind::ChainResult { .. } => "chain_result",
            EventKind::ChainException { .. } => "chain_exception",
            EventKind::End { .. } => "end",
        }
    }
}

/// Host/process identity attached to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessMeta {
    pub host: String,
    pub pid: u32,
    pub user: String,
}

impl ProcessMeta {
    /// Identity of the running process (computed once).
    pub fn current() -> &'static ProcessMeta {
        static META: OnceLock<ProcessMeta> = OnceLock::new();
        META.get_or_init(|| ProcessMeta {
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".into()),
            pid: std::process::id(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".into()),
        })
    }
}

/// Common envelope. `ts` and `meta` are filled in by the log when absent;
/// `token` is masked by the log before serialization.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub trace_id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    pub component: Component,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ProcessMeta>,
}

impl AuditEvent {
    pub fn new(trace_id: &TraceId, component: Component, kind: EventKind) -> Self {
        Self {
            trace_id: trace_id.clone(),
            ts: None,
            component,
            kind,
            origin: None,
            token: None,
            meta: None,
        }
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }

    pub fn with_token(mut self, token: &CapabilityToken) -> Self {
        self.token = Some(token.to_value());
        self
    }

    pub fn with_token_value(mut self, token: Value) -> Self {
        self.token = Some(token);
        self
    }

    pub fn action(&self) -> &'static str {
        self.kind.action()
    }
}
