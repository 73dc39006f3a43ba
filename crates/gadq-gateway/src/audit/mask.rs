//! Credential masking for stored tokens.
//!
//! Rules (also binding for any reader that re-exposes stored records):
//! - `signature` / `pubkey`: `first6...last6` when longer than 12 chars,
//!   otherwise [`SECRET_PLACEHOLDER`].
//! - `payload`: re-parsed, `origin` rewritten as `first3...last3` when longer
//!   than 8 chars (otherwise [`ORIGIN_PLACEHOLDER`]), then re-serialized
//!   compactly. A payload that does not round-trip becomes
//!   [`SECRET_PLACEHOLDER`].
//!
//! Masking is idempotent and never fails.

use serde_json::Value;

pub const SECRET_PLACEHOLDER: &str = "****";
pub const ORIGIN_PLACEHOLDER: &str = "***";

const SECRET_KEEP: usize = 6;
const ORIGIN_KEEP: usize = 3;

/// Masked copy of a token. Non-object values are returned unchanged.
pub fn mask_token(token: &Value) -> Value {
    let Some(obj) = token.as_object() else {
        return token.clone();
    };

    let masked = obj
        .iter()
        .map(|(k, v)| {
            let v = match k.as_str() {
                "signature" | "pubkey" => Value::String(mask_secret(&text_of(v))),
                "payload" => mask_payload(v),
                _ => v.clone(),
            };
            (k.clone(), v)
        })
        .collect();
    Value::Object(masked)
}

fn mask_payload(v: &Value) -> Value {
    let masked = v
        .as_str()
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .and_then(|mut p| {
            if let Some(origin) = p.get_mut("origin") {
                *origin = Value::String(mask_origin(&text_of(origin)));
            }
            serde_json::to_string(&p).ok()
        });
    Value::String(masked.unwrap_or_else(|| SECRET_PLACEHOLDER.to_string()))
}

pub(crate) fn mask_secret(s: &str) -> String {
    keep_ends(s, SECRET_KEEP, 0).unwrap_or_else(|| SECRET_PLACEHOLDER.to_string())
}

pub(crate) fn mask_origin(s: &str) -> String {
    // at least 2 chars stay hidden
    keep_ends(s, ORIGIN_KEEP, 2).unwrap_or_else(|| ORIGIN_PLACEHOLDER.to_string())
}

fn keep_ends(s: &str, keep: usize, min_hidden: usize) -> Option<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= keep * 2 + min_hidden {
        return None;
    }
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    Some(format!("{head}...{tail}"))
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
