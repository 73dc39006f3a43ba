use serde::Deserialize;

use gadq_core::error::{GadqError, Result};
use gadq_core::token::{TtlBounds, MAX_TTL, MIN_TTL};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GadqConfig {
    pub version: u32,

    #[serde(default)]
    pub tokens: TokensSection,

    #[serde(default)]
    pub policy: PolicySection,

    #[serde(default)]
    pub audit: AuditSection,

    #[serde(default)]
    pub executor: ExecutorSection,
}

impl GadqConfig {
    /// Config with every section at its default (as if `version: 1` only).
    pub fn with_defaults() -> Self {
        Self {
            version: 1,
            tokens: TokensSection::default(),
            policy: PolicySection::default(),
            audit: AuditSection::default(),
            executor: ExecutorSection::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GadqError::BadRequest(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.tokens.validate()?;
        self.policy.validate()?;
        self.audit.validate()?;

        let b = self.tokens.bounds();
        if !b.contains(self.executor.default_ttl) {
            return Err(GadqError::BadRequest(format!(
                "executor.default_ttl must be within [{}, {}]",
                b.min, b.max
            )));
        }
        if self.executor.default_chain.is_empty() {
            return Err(GadqError::BadRequest("executor.default_chain must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokensSection {
    #[serde(default = "default_key_dir")]
    pub key_dir: String,

    #[serde(default = "default_min_ttl")]
    pub min_ttl: i64,

    #[serde(default = "default_max_ttl")]
    pub max_ttl: i64,

    #[serde(default = "default_true")]
    pub embed_pubkey: bool,
}

impl Default for TokensSection {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
            min_ttl: default_min_ttl(),
            max_ttl: default_max_ttl(),
            embed_pubkey: true,
        }
    }
}

impl TokensSection {
    pub fn bounds(&self) -> TtlBounds {
        TtlBounds { min: self.min_ttl, max: self.max_ttl }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_ttl < 1 || self.max_ttl < self.min_ttl {
            return Err(GadqError::BadRequest(
                "tokens: require 1 <= min_ttl <= max_ttl".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default = "default_rate_limit_window_s")]
    pub rate_limit_window_s: u64,

    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            rate_limit_window_s: default_rate_limit_window_s(),
            rate_limit_max: default_rate_limit_max(),
        }
    }
}

impl PolicySection {
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_window_s == 0 {
            return Err(GadqError::BadRequest("policy.rate_limit_window_s must be >= 1".into()));
        }
        if self.rate_limit_max == 0 {
            return Err(GadqError::BadRequest("policy.rate_limit_max must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSection {
    #[serde(default = "default_audit_path")]
    pub path: String,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    #[serde(default = "default_backup_count")]
    pub backup_count: usize,

    #[serde(default = "default_rotation_check_interval_s")]
    pub rotation_check_interval_s: u64,

    #[serde(default)]
    pub background_rotation: bool,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            max_bytes: default_max_bytes(),
            backup_count: default_backup_count(),
            rotation_check_interval_s: default_rotation_check_interval_s(),
            background_rotation: false,
        }
    }
}

impl AuditSection {
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(GadqError::BadRequest("audit.path must not be empty".into()));
        }
        if self.max_bytes == 0 {
            return Err(GadqError::BadRequest("audit.max_bytes must be >= 1".into()));
        }
        if self.backup_count == 0 {
            return Err(GadqError::BadRequest("audit.backup_count must be >= 1".into()));
        }
        if self.rotation_check_interval_s == 0 {
            return Err(GadqError::BadRequest(
                "audit.rotation_check_interval_s must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
    #[serde(default = "default_origin")]
    pub default_origin: String,

    #[serde(default = "default_ttl")]
    pub default_ttl: i64,

    #[serde(default = "default_chain")]
    pub default_chain: String,

    #[serde(default = "default_target")]
    pub default_target: String,

    #[serde(default = "default_permissions")]
    pub permissions: Vec<String>,

    #[serde(default = "default_input")]
    pub input: String,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            default_origin: default_origin(),
            default_ttl: default_ttl(),
            default_chain: default_chain(),
            default_target: default_target(),
            permissions: default_permissions(),
            input: default_input(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_key_dir() -> String {
    "keys".into()
}
fn default_min_ttl() -> i64 {
    MIN_TTL
}
fn default_max_ttl() -> i64 {
    MAX_TTL
}
fn default_rate_limit_window_s() -> u64 {
    10
}
fn default_rate_limit_max() -> usize {
    5
}
fn default_audit_path() -> String {
    "logs/events.ndjson".into()
}
fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_backup_count() -> usize {
    5
}
fn default_rotation_check_interval_s() -> u64 {
    30
}
fn default_origin() -> String {
    "user:paulo".into()
}
fn default_ttl() -> i64 {
    10
}
fn default_chain() -> String {
    "python".into()
}
fn default_target() -> String {
    "detect".into()
}
fn default_permissions() -> Vec<String> {
    vec!["vision".into()]
}
fn default_input() -> String {
    "simulated.jpg".into()
}
