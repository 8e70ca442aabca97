//! Extension clients.
//!
//! # Architecture
//!
//! ```text
//! ClientConnectionManager
//! ├── clients: BTreeMap<ClientKey, Client>
//! ├── retry_windows: HashMap<ExtensionId, RetryWindow>
//! └── context: Connector + endpoint + update channel
//!
//! Client
//! ├── ErrorHandler (shares its extension's RetryWindow)
//! └── session task: connect -> initialize -> active -> (closed -> retry)
//! ```
//!
//! The manager keeps one client per activated extension and root. Each client
//! runs its sessions on its own task; failures only ever affect that client.

mod client;
mod error;
mod manager;
pub mod retry;
pub mod session;
pub mod transport;
mod websocket;
mod worker;

use std::collections::BTreeMap;

use serde::Serialize;

pub use client::{Client, ClientContext};
pub use error::{ClientError, ConnectError, InitializationError};
pub use manager::{ClientConnectionManager, ClientEntry};
pub use retry::{
    CloseAction, ErrorAction, ErrorHandler, InitializationAction, RetryWindow, SharedRetryWindow,
};
pub use transport::{
    endpoint_url, resolve_target, Connector, DefaultConnector, Transport, TransportEvent,
    TransportPeer, TransportTarget,
};

use crate::extensions::ExtensionId;
use crate::settings::ConfigurationUpdateParams;

/// Identifies a client: one per activated extension per root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientKey {
    pub extension_id: ExtensionId,
    pub root_uri: Option<String>,
}

impl ClientKey {
    pub fn new(extension_id: impl Into<ExtensionId>, root_uri: Option<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            root_uri,
        }
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.root_uri {
            Some(root) => write!(f, "{} ({})", self.extension_id, root),
            None => write!(f, "{}", self.extension_id),
        }
    }
}

/// Lifecycle state of a client.
///
/// `Stopped` and `ActivateFailed` are final until the client is activated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClientState {
    Initial,
    Connecting,
    Initializing,
    Active,
    ActivateFailed,
    ShuttingDown,
    Stopped,
}

impl ClientState {
    /// Whether a session is in progress.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ClientState::Connecting | ClientState::Initializing | ClientState::Active
        )
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClientState::Initial => "initial",
            ClientState::Connecting => "connecting",
            ClientState::Initializing => "initializing",
            ClientState::Active => "active",
            ClientState::ActivateFailed => "activate failed",
            ClientState::ShuttingDown => "shutting down",
            ClientState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Current state of every managed client.
pub type ClientStates = BTreeMap<ClientKey, ClientState>;

/// An extension asked for a setting to be changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationUpdateRequest {
    pub extension_id: ExtensionId,
    pub params: ConfigurationUpdateParams,
}
