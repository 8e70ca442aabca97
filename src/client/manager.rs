//! Client connection manager.
//!
//! Keeps exactly one client per activated extension and root. Every time the
//! configured extensions or the document change, the manager re-applies the
//! activation filter: clients for extensions that are no longer activated are
//! stopped, newly activated extensions get a fresh client.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};

use super::client::{Client, ClientContext};
use super::retry::{ErrorHandler, RetryWindow, SharedRetryWindow};
use super::transport::Connector;
use super::{ClientKey, ClientState, ClientStates, ConfigurationUpdateRequest};
use crate::config::EndpointConfig;
use crate::extensions::{
    activated_extensions, ConfiguredExtension, DocumentContext, ExtensionId, ExtensionManifest,
};

/// A client and its state, for operational surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEntry {
    pub key: ClientKey,
    pub state: ClientState,
}

/// Owns the live clients and their retry windows.
pub struct ClientConnectionManager {
    context: ClientContext,

    clients: Mutex<BTreeMap<ClientKey, Client>>,

    /// One window per extension, kept for the lifetime of the manager.
    retry_windows: StdMutex<HashMap<ExtensionId, SharedRetryWindow>>,
}

impl ClientConnectionManager {
    /// Create a manager. Configuration updates requested by extensions arrive
    /// on the returned receiver.
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: EndpointConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConfigurationUpdateRequest>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (states, _) = watch::channel(ClientStates::new());
        let manager = Self {
            context: ClientContext {
                connector,
                endpoint,
                updates,
                states: Arc::new(states),
            },
            clients: Mutex::new(BTreeMap::new()),
            retry_windows: StdMutex::new(HashMap::new()),
        };
        (manager, updates_rx)
    }

    /// Bring the running clients in line with `extensions` and `document`.
    pub async fn set_environment(
        &self,
        extensions: &[ConfiguredExtension],
        document: Option<&DocumentContext>,
    ) {
        let root = document.and_then(|d| d.root_uri.clone());
        let wanted: BTreeMap<ClientKey, (&ExtensionManifest, Option<&String>)> =
            activated_extensions(extensions, document)
                .into_iter()
                .filter_map(|ext| {
                    let manifest = ext.parsed_manifest()?;
                    Some((
                        ClientKey::new(ext.extension_id.clone(), root.clone()),
                        (manifest, ext.raw_manifest.as_ref()),
                    ))
                })
                .collect();

        let mut clients = self.clients.lock().await;

        let stale: Vec<ClientKey> = clients
            .iter()
            .filter(|(key, client)| match wanted.get(*key) {
                None => true,
                Some((manifest, raw)) => {
                    client.manifest() != *manifest || client.raw_manifest() != raw.map(String::as_str)
                }
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            if let Some(client) = clients.remove(&key) {
                tracing::info!(client = %key, "Deactivating extension");
                client.stop().await;
                self.context.states.send_modify(|states| {
                    states.remove(&key);
                });
            }
        }

        for (key, (manifest, raw)) in wanted {
            if clients.contains_key(&key) {
                continue;
            }

            tracing::info!(client = %key, platform = manifest.platform.kind(), "Activating extension");
            let handler = ErrorHandler::new(key.extension_id.clone(), self.window_for(&key.extension_id));
            let client = Client::new(
                key.clone(),
                manifest.clone(),
                raw.cloned(),
                handler,
                self.context.clone(),
            );
            // Failures leave the client in `ActivateFailed`, where it stays visible.
            let _ = client.activate().await;
            clients.insert(key, client);
        }
    }

    fn window_for(&self, extension_id: &str) -> SharedRetryWindow {
        let mut windows = self
            .retry_windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        windows
            .entry(extension_id.to_string())
            .or_insert_with(|| Arc::new(StdMutex::new(RetryWindow::new())))
            .clone()
    }

    /// Snapshot of every client's state.
    pub fn clients(&self) -> Vec<ClientEntry> {
        self.context
            .states
            .borrow()
            .iter()
            .map(|(key, state)| ClientEntry {
                key: key.clone(),
                state: *state,
            })
            .collect()
    }

    /// Watch every client's state.
    pub fn subscribe(&self) -> watch::Receiver<ClientStates> {
        self.context.states.subscribe()
    }

    pub async fn client(&self, key: &ClientKey) -> Option<Client> {
        self.clients.lock().await.get(key).cloned()
    }

    /// A copy of an extension's retry window, if it has one.
    pub fn retry_window(&self, extension_id: &str) -> Option<RetryWindow> {
        let windows = self
            .retry_windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        windows.get(extension_id).map(|w| {
            w.lock().unwrap_or_else(PoisonError::into_inner).clone()
        })
    }

    /// Stop every client.
    pub async fn shutdown(&self) {
        let mut clients = self.clients.lock().await;
        for (key, client) in std::mem::take(&mut *clients) {
            tracing::debug!(client = %key, "Stopping client");
            client.stop().await;
        }
        self.context.states.send_replace(ClientStates::new());
    }
}
