//! Extension manifest parsing.
//!
//! A registry record carries the manifest as raw JSON text. It declares:
//! - Metadata (title, description)
//! - The platform the extension runs on
//! - Activation events deciding when it should run
//! - Initialization options passed to the extension on connect

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::settings::{parse_jsonc_as, ParseError};

/// Content type bundles are expected to be served with.
pub const BUNDLE_CONTENT_TYPE: &str = "application/json";

/// Extension manifest parsed from a registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Human-readable display name.
    #[serde(default)]
    pub title: Option<String>,

    /// Short description.
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub readme: Option<String>,

    /// Where and how the extension runs.
    pub platform: Platform,

    /// Events that cause the extension to be activated (`*`, `onLanguage:go`).
    #[serde(default)]
    pub activation_events: Vec<String>,

    /// Initialization options sent to the extension when it connects.
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

impl ExtensionManifest {
    /// Parse a raw manifest. Comments and trailing commas are allowed.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        parse_jsonc_as(raw)
    }
}

/// Execution platform of an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Platform {
    /// A script bundle executed in an isolated background worker.
    Bundle {
        url: String,

        #[serde(default, rename = "contentType", skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },

    /// A container image run server-side.
    Docker { image: String },

    /// An existing WebSocket server.
    #[serde(rename = "websocket")]
    WebSocket { url: String },

    /// A TCP server.
    Tcp { address: String },

    /// A command executed server-side.
    Exec { command: String },
}

impl Platform {
    pub fn kind(&self) -> &'static str {
        match self {
            Platform::Bundle { .. } => "bundle",
            Platform::Docker { .. } => "docker",
            Platform::WebSocket { .. } => "websocket",
            Platform::Tcp { .. } => "tcp",
            Platform::Exec { .. } => "exec",
        }
    }
}
