//! Transport selection and the message channel clients talk over.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::{ClientError, ConnectError};
use super::ClientKey;
use crate::config::{EndpointConfig, WorkerConfig};
use crate::extensions::{ExtensionManifest, Platform, BUNDLE_CONTENT_TYPE};

/// Where a client connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    /// Run a bundle in an isolated background worker.
    Worker { bundle_url: String },

    /// Connect to a server-backed extension over a WebSocket.
    Socket { url: String },
}

/// Pick the transport for an extension from its manifest platform.
pub fn resolve_target(
    key: &ClientKey,
    manifest: &ExtensionManifest,
    endpoint: &EndpointConfig,
) -> Result<TransportTarget, ClientError> {
    match &manifest.platform {
        Platform::Bundle { url, content_type } => match content_type.as_deref() {
            None | Some(BUNDLE_CONTENT_TYPE) => Ok(TransportTarget::Worker {
                bundle_url: url.clone(),
            }),
            Some(other) => Err(ClientError::UnsupportedContentType {
                extension: key.extension_id.clone(),
                content_type: other.to_string(),
            }),
        },
        Platform::Docker { .. }
        | Platform::WebSocket { .. }
        | Platform::Tcp { .. }
        | Platform::Exec { .. } => Ok(TransportTarget::Socket {
            url: endpoint_url(endpoint, &key.extension_id, key.root_uri.as_deref()),
        }),
    }
}

/// Socket address for a server-backed extension.
///
/// The extension id and root are part of the URL so concurrent connections can
/// be told apart in server logs.
pub fn endpoint_url(endpoint: &EndpointConfig, extension_id: &str, root_uri: Option<&str>) -> String {
    let scheme = if endpoint.secure { "wss" } else { "ws" };
    format!(
        "{}://{}{}?mode={}&rootUri={}",
        scheme,
        endpoint.host,
        endpoint.path,
        urlencoding::encode(extension_id),
        urlencoding::encode(root_uri.unwrap_or_default())
    )
}

/// Something received from an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One JSON-RPC frame.
    Message(String),

    /// A transport-level error. The transport may still be usable.
    Error(String),

    Closed,
}

/// Duplex text channel to a running extension.
///
/// Dropping the transport closes it.
#[derive(Debug)]
pub struct Transport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The extension side of an in-process [`Transport`].
#[derive(Debug)]
pub struct TransportPeer {
    pub tx: mpsc::UnboundedSender<TransportEvent>,
    pub rx: mpsc::UnboundedReceiver<String>,
}

impl Transport {
    pub fn new(
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { tx, rx }
    }

    /// A transport whose other end is handed back to the caller.
    pub fn in_process() -> (Self, TransportPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self::new(out_tx, in_rx),
            TransportPeer {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }

    /// Queue a frame. Returns `false` if the transport is gone.
    pub fn send(&self, frame: String) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub async fn recv(&mut self) -> TransportEvent {
        self.rx.recv().await.unwrap_or(TransportEvent::Closed)
    }
}

/// Opens transports. Injected so tests can use in-process transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &TransportTarget) -> Result<Transport, ConnectError>;
}

/// Connects over WebSockets and spawns bundle workers.
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    worker: WorkerConfig,
}

impl DefaultConnector {
    pub fn new(worker: WorkerConfig) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, target: &TransportTarget) -> Result<Transport, ConnectError> {
        match target {
            TransportTarget::Socket { url } => super::websocket::connect(url).await,
            TransportTarget::Worker { bundle_url } => {
                super::worker::spawn(&self.worker, bundle_url).await
            }
        }
    }
}
