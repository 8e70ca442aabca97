//! Settings edit requests.
//!
//! Edits are performed by an external [`SettingsEditor`]. This module only
//! shapes the requests and picks which subject they apply to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::cascade::{Cascade, Subject};

/// One step of a key path into a settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(u64),
}

/// Set `value` at `path` in a subject's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationUpdateParams {
    pub path: Vec<PathSegment>,
    pub value: Value,
}

impl ConfigurationUpdateParams {
    /// Convert the arguments of an `updateConfiguration` command.
    ///
    /// Accepted shape: `[path, value, null?, "json"?]`. When the fourth
    /// argument is `"json"`, `value` is JSON text and is decoded first.
    pub fn from_command_args(args: &[Value]) -> Result<Self, EditError> {
        if !(2..=4).contains(&args.len()) {
            return Err(EditError::InvalidCommandArgs(format!(
                "expected 2 to 4 arguments, got {}",
                args.len()
            )));
        }
        if args.get(2).is_some_and(|v| !v.is_null()) {
            return Err(EditError::InvalidCommandArgs(
                "third argument must be null".to_string(),
            ));
        }

        let path: Vec<PathSegment> = match &args[0] {
            Value::Array(_) => serde_json::from_value(args[0].clone()).map_err(|e| {
                EditError::InvalidCommandArgs(format!("invalid key path: {}", e))
            })?,
            _ => {
                return Err(EditError::InvalidCommandArgs(
                    "key path must be an array".to_string(),
                ))
            }
        };

        let value = match args.get(3) {
            None | Some(Value::Null) => args[1].clone(),
            Some(Value::String(kind)) if kind == "json" => {
                let text = args[1].as_str().ok_or_else(|| {
                    EditError::InvalidCommandArgs("json value must be a string".to_string())
                })?;
                serde_json::from_str(text).map_err(|e| {
                    EditError::InvalidCommandArgs(format!("invalid json value: {}", e))
                })?
            }
            Some(other) => {
                return Err(EditError::InvalidCommandArgs(format!(
                    "unknown value kind: {}",
                    other
                )))
            }
        };

        Ok(Self { path, value })
    }
}

/// Change a single extension's entry in a subject's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExtensionSettingsArgs {
    #[serde(rename = "extensionID")]
    pub extension_id: String,

    /// Edit applied inside the extension's settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit: Option<ConfigurationUpdateParams>,

    /// Toggle the extension (clears or sets `disabled`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Remove the extension's entry entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<bool>,
}

impl UpdateExtensionSettingsArgs {
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            edit: None,
            enabled: None,
            remove: None,
        }
    }

    pub fn with_edit(mut self, edit: ConfigurationUpdateParams) -> Self {
        self.edit = Some(edit);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_remove(mut self) -> Self {
        self.remove = Some(true);
        self
    }
}

/// Errors from settings edits.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("Invalid updateConfiguration arguments: {0}")]
    InvalidCommandArgs(String),

    #[error("No settings subject to edit")]
    NoSubject,

    #[error("Unknown settings subject '{0}'")]
    UnknownSubject(String),

    #[error("Settings edit rejected: {0}")]
    Rejected(String),
}

/// Result type for settings edits.
pub type EditResult<T> = Result<T, EditError>;

/// Performs settings edits on behalf of the controller.
#[async_trait]
pub trait SettingsEditor: Send + Sync {
    async fn update_extension_settings(
        &self,
        subject_id: &str,
        args: UpdateExtensionSettingsArgs,
    ) -> EditResult<()>;
}

/// Pick the subject an edit applies to.
///
/// An explicit subject must exist in the cascade. Otherwise the highest
/// precedence subject is used.
pub fn target_subject<'a>(
    cascade: Option<&'a Cascade>,
    explicit: Option<&str>,
) -> EditResult<&'a Subject> {
    let cascade = cascade.ok_or(EditError::NoSubject)?;
    match explicit {
        Some(id) => cascade
            .subject(id)
            .ok_or_else(|| EditError::UnknownSubject(id.to_string())),
        None => cascade.highest_precedence().ok_or(EditError::NoSubject),
    }
}
