//! Error-tolerant parsing of settings and manifest documents.
//!
//! Settings and manifests are written by people, so they may contain comments
//! and trailing commas. Failures are turned into [`ParseError`] values that
//! travel alongside the data instead of aborting the caller.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// A settings or manifest document that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse JSON text that may contain comments and trailing commas.
///
/// Blank input yields `Value::Null`.
pub fn parse_jsonc(text: &str) -> Result<Value, ParseError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    json5::from_str::<Value>(text)
        .map_err(|e| ParseError::new(format!("Configuration parse error: {}", e)))
}

/// Parse JSONC text and deserialize it into `T`.
pub fn parse_jsonc_as<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = parse_jsonc(text)?;
    serde_json::from_value(value).map_err(|e| ParseError::new(format!("Invalid document: {}", e)))
}
