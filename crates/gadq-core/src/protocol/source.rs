//! Action-description sources.
//!
//! A source is human-authored text such as:
//!
//! ```text
//! use chain.python("detect") as vision
//! fn main(image):
//!     vision(image)
//! ```
//!
//! The runtime only consumes the first import; everything else is carried
//! through to the run result untouched.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GadqError, Result};

/// `use chain.<chain>("<target>") as <alias>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainImport {
    pub chain: String,
    pub target: String,
    pub alias: String,
}

/// `fn <name>(<args>):`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub args: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSource {
    pub imports: Vec<ChainImport>,
    pub functions: Vec<FunctionDecl>,
    pub raw: String,
}

impl ParsedSource {
    pub fn first_import(&self) -> Option<&ChainImport> {
        self.imports.first()
    }
}

/// Turns action-description text into imports and function declarations.
pub trait SourceParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<ParsedSource>;
}

/// Pattern-based parser for `.gad` action descriptions.
#[derive(Debug, Clone)]
pub struct GadParser {
    import_re: Regex,
    fn_re: Regex,
}

impl GadParser {
    pub fn new() -> Result<Self> {
        let import_re = Regex::new(r#"use\s+chain\.(\w+)\("([^"]+)"\)\s+as\s+(\w+)"#)
            .map_err(|e| GadqError::Internal(format!("import pattern: {e}")))?;
        let fn_re = Regex::new(r"fn\s+(\w+)\((.*?)\)\s*:")
            .map_err(|e| GadqError::Internal(format!("fn pattern: {e}")))?;
        Ok(Self { import_re, fn_re })
    }
}

impl SourceParser for GadParser {
    fn parse(&self, text: &str) -> Result<ParsedSource> {
        let imports = self
            .import_re
            .captures_iter(text)
            .map(|c| ChainImport {
                chain: c[1].to_string(),
                target: c[2].to_string(),
                alias: c[3].to_string(),
            })
            .collect();

        let functions = self
            .fn_re
            .captures_iter(text)
            .map(|c| FunctionDecl {
                name: c[1].to_string(),
                args: c[2].trim().to_string(),
            })
            .collect();

        Ok(ParsedSource {
            imports,
            functions,
            raw: text.to_string(),
        })
    }
}
