//! Error types for extension clients.

use std::io;

use thiserror::Error;

use crate::extensions::ExtensionId;

/// An extension whose platform can't be used. Fatal to that extension's
/// activation; no connection is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Extension '{extension}' bundle has unsupported content type '{content_type}'")]
    UnsupportedContentType {
        extension: ExtensionId,
        content_type: String,
    },
}

/// Failure to open a transport to an extension.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Failed to start worker '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        match err {
            tokio_tungstenite::tungstenite::Error::Io(e) => ConnectError::Io(e),
            other => ConnectError::WebSocket(Box::new(other)),
        }
    }
}

impl ConnectError {
    /// The remote endpoint actively refused the connection.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, ConnectError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused)
    }
}

/// A session that failed before it became active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitializationError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Failed to connect: {0}")]
    Connect(String),

    /// The extension answered `initialize` with an error.
    #[error("Initialize failed ({code}): {message}")]
    Response {
        code: i64,
        message: String,
        /// The extension asked to be retried.
        retry: bool,
    },

    #[error("Transport closed during initialization")]
    Closed,
}

impl From<ConnectError> for InitializationError {
    fn from(err: ConnectError) -> Self {
        if err.is_connection_refused() {
            InitializationError::ConnectionRefused(err.to_string())
        } else {
            InitializationError::Connect(err.to_string())
        }
    }
}
