//! Activation filtering.
//!
//! Decides which configured extensions should be running for the current
//! document. Evaluation is total: an event that isn't `*` or a well-formed
//! `onLanguage:<id>` simply never matches, so one odd entry can't hide an
//! extension that also lists a matching event.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::reconcile::ConfiguredExtension;

/// The document the user is looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContext {
    /// Language of the document, e.g. `go`.
    #[serde(default)]
    pub language_id: Option<String>,

    /// Root the document belongs to. Clients are keyed by it.
    #[serde(default)]
    pub root_uri: Option<String>,
}

impl DocumentContext {
    pub fn new(language_id: Option<String>, root_uri: Option<String>) -> Self {
        Self {
            language_id,
            root_uri,
        }
    }
}

/// A parsed activation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationEvent {
    /// `*`: always active.
    Always,

    /// `onLanguage:<id>`: active for documents in that language.
    OnLanguage(String),

    /// Any other event. Never matches.
    Unrecognized(String),
}

impl From<&str> for ActivationEvent {
    fn from(s: &str) -> Self {
        if s == "*" {
            return ActivationEvent::Always;
        }
        match s.strip_prefix("onLanguage:") {
            Some(language) if !language.is_empty() => {
                ActivationEvent::OnLanguage(language.to_string())
            }
            _ => ActivationEvent::Unrecognized(s.to_string()),
        }
    }
}

impl fmt::Display for ActivationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationEvent::Always => write!(f, "*"),
            ActivationEvent::OnLanguage(language) => write!(f, "onLanguage:{}", language),
            ActivationEvent::Unrecognized(event) => write!(f, "{}", event),
        }
    }
}

impl ActivationEvent {
    pub fn matches(&self, document: Option<&DocumentContext>) -> bool {
        match self {
            ActivationEvent::Always => true,
            ActivationEvent::OnLanguage(language) => document
                .and_then(|d| d.language_id.as_deref())
                .is_some_and(|current| current == language),
            ActivationEvent::Unrecognized(_) => false,
        }
    }
}

/// Whether one extension should be active.
///
/// Disabled extensions and extensions without a valid manifest never are.
pub fn should_activate(extension: &ConfiguredExtension, document: Option<&DocumentContext>) -> bool {
    if !extension.is_enabled {
        return false;
    }
    let Some(manifest) = extension.parsed_manifest() else {
        return false;
    };

    manifest
        .activation_events
        .iter()
        .any(|e| ActivationEvent::from(e.as_str()).matches(document))
}

/// The extensions that should be active for `document`, in input order.
pub fn activated_extensions<'a>(
    extensions: &'a [ConfiguredExtension],
    document: Option<&DocumentContext>,
) -> Vec<&'a ConfiguredExtension> {
    let active: Vec<_> = extensions
        .iter()
        .filter(|ext| should_activate(ext, document))
        .collect();
    tracing::debug!(
        configured = extensions.len(),
        active = active.len(),
        language = ?document.and_then(|d| d.language_id.as_deref()),
        "Applied activation filter"
    );
    active
}
