//! Runtime config loader (strict parsing).

pub mod schema;

use std::fs;

use gadq_core::error::{GadqError, Result};

pub use schema::{AuditSection, ExecutorSection, GadqConfig, PolicySection, TokensSection};

pub fn load_from_file(path: &str) -> Result<GadqConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| GadqError::Config(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GadqConfig> {
    let cfg: GadqConfig = serde_yaml::from_str(s)
        .map_err(|e| GadqError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
