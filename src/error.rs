//! Error types for the controller
//!
//! Subsystems have their own error types; this one collects them for callers
//! that drive the controller as a whole.

use thiserror::Error;

use crate::client::ClientError;
use crate::extensions::AggregateError;
use crate::handshake::HandshakeError;
use crate::settings::{EditError, ParseError};

/// Errors that can occur in the controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// `Controller::run` called while another run is in progress
    #[error("Controller is already running")]
    AlreadyRunning,

    /// Malformed settings or cascade description
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Registry or reconciliation failures
    #[error(transparent)]
    Extensions(#[from] AggregateError),

    /// Settings edit failures
    #[error(transparent)]
    Edit(#[from] EditError),

    /// Extension client failures
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Client/page channel failures
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;
