//! Client/page handshake.
//!
//! Two independently started contexts, the client (which owns the settings)
//! and a page (which wants to read and edit them), find each other over a
//! two-party channel. After the handshake, the page sends `EditSettings` and
//! `GetSettings` requests and the client answers with `Settings`.

pub mod channel;
mod connection;
mod message;

use thiserror::Error;

pub use channel::{pair, MessageSink, MessageSource, StreamChannel};
pub use connection::{
    connect, connect_to_client, connect_to_page, ClientConnection, Connection, PageConnection,
    PageRequest,
};
pub use message::{Envelope, Message, Role};

/// Errors on a client/page channel.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Channel closed before the peer answered")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for handshake operations.
pub type HandshakeResult<T> = Result<T, HandshakeError>;
