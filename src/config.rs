use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ControllerError, ControllerResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub endpoint: EndpointConfig,
    pub registry: RegistryConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directives. `RUST_LOG` takes precedence.
    pub filter: String,
}

/// Where server-backed extensions are reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub secure: bool,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// GraphQL endpoint of the extension registry.
    pub url: String,
    pub token: Option<String>,
}

/// Runtime used to execute bundle extensions as background workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "nova_controller=info".to_string(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost:3080".to_string(),
            secure: false,
            path: "/.api/lsp".to_string(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3080/.api/graphql".to_string(),
            token: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "deno".to_string(),
            args: vec!["run".to_string(), "--allow-net".to_string()],
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("nova")
            .join("controller.toml")
    }

    /// Load config from the default path, or return defaults if it can't be read
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to load config, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> ControllerResult<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.validate();
        Ok(config)
    }

    /// Normalise values that would otherwise produce broken endpoints
    pub fn validate(&mut self) {
        let path = self.endpoint.path.trim();
        self.endpoint.path = if path.is_empty() {
            EndpointConfig::default().path
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        self.endpoint.host = self
            .endpoint
            .host
            .trim()
            .trim_end_matches('/')
            .to_string();

        if self.logging.filter.trim().is_empty() {
            self.logging.filter = LoggingConfig::default().filter;
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> ControllerResult<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> ControllerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ControllerError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> ControllerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ControllerError::Config(format!("Failed to serialize config: {}", e)))
    }
}
