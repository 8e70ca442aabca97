//! A client for one activated extension.
//!
//! The client owns at most one session task at a time. Stopping cancels the
//! task, including any pending reconnect delay, and waits for it to finish
//! before the next activation starts.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::error::{ClientError, InitializationError};
use super::retry::{CloseAction, ErrorAction, ErrorHandler, InitializationAction};
use super::session::{InitializeParams, Session, SessionEvent};
use super::transport::{resolve_target, Connector, TransportTarget};
use super::{ClientKey, ClientState, ClientStates, ConfigurationUpdateRequest};
use crate::config::EndpointConfig;
use crate::extensions::ExtensionManifest;

/// Collaborators shared by all clients of a manager.
#[derive(Clone)]
pub struct ClientContext {
    pub connector: Arc<dyn Connector>,
    pub endpoint: EndpointConfig,

    /// Configuration updates requested by extensions.
    pub updates: mpsc::UnboundedSender<ConfigurationUpdateRequest>,

    /// State of every client, for operational surfaces.
    pub states: Arc<watch::Sender<ClientStates>>,
}

/// A running session task and the means to stop it.
struct SessionTask {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct ClientInner {
    key: ClientKey,
    manifest: ExtensionManifest,
    raw_manifest: Option<String>,
    context: ClientContext,
    handler: StdMutex<ErrorHandler>,
    state: watch::Sender<ClientState>,

    /// Serializes activate/stop so sessions never overlap.
    session: Mutex<Option<SessionTask>>,
}

/// Handle to an extension client. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

enum Exit {
    Stopped,
    Done(ClientState),
}

impl Client {
    pub fn new(
        key: ClientKey,
        manifest: ExtensionManifest,
        raw_manifest: Option<String>,
        handler: ErrorHandler,
        context: ClientContext,
    ) -> Self {
        let (state, _) = watch::channel(ClientState::Initial);
        context.states.send_modify(|states| {
            states.insert(key.clone(), ClientState::Initial);
        });
        Self {
            inner: Arc::new(ClientInner {
                key,
                manifest,
                raw_manifest,
                context,
                handler: StdMutex::new(handler),
                state,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> &ClientKey {
        &self.inner.key
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.inner.manifest
    }

    pub fn raw_manifest(&self) -> Option<&str> {
        self.inner.raw_manifest.as_deref()
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Whether the client has a session that `stop` would end.
    pub fn needs_stop(&self) -> bool {
        self.state().is_running()
    }

    /// Start a session unless one is already running.
    ///
    /// An unusable platform leaves the client in `ActivateFailed` without
    /// attempting a connection.
    pub async fn activate(&self) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;
        self.activate_locked(&mut session)
    }

    /// Stop the running session, if any, and wait for it to end.
    pub async fn stop(&self) {
        let mut session = self.inner.session.lock().await;
        self.stop_locked(&mut session).await;
    }

    /// Stop, then activate again. The new session starts only after the old
    /// one has fully ended.
    pub async fn restart(&self) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;
        self.stop_locked(&mut session).await;
        self.activate_locked(&mut session)
    }

    fn activate_locked(&self, session: &mut Option<SessionTask>) -> Result<(), ClientError> {
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Ok(());
        }

        let target = match resolve_target(&self.inner.key, &self.inner.manifest, &self.inner.context.endpoint) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(extension = %self.inner.key.extension_id, error = %e, "Extension cannot be activated");
                self.inner.set_state(ClientState::ActivateFailed);
                return Err(e);
            }
        };

        let (stop, stop_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let exit = inner.run(target, stop_rx).await;
            if let Exit::Done(state) = exit {
                inner.set_state(state);
            }
        });
        *session = Some(SessionTask { stop, task });
        Ok(())
    }

    async fn stop_locked(&self, session: &mut Option<SessionTask>) {
        let Some(SessionTask { stop, task }) = session.take() else {
            return;
        };

        // If the task already ended on its own, keep the state it left.
        if stop.send(()).is_err() || task.is_finished() {
            let _ = task.await;
            return;
        }
        if let Err(e) = task.await {
            tracing::error!(extension = %self.inner.key.extension_id, "Client task failed: {}", e);
        }
        self.inner.set_state(ClientState::Stopped);
    }
}

impl ClientInner {
    fn set_state(&self, state: ClientState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(extension = %self.key.extension_id, ?previous, ?state, "Client state changed");
        }
        self.context.states.send_modify(|states| {
            states.insert(self.key.clone(), state);
        });
    }

    fn handler(&self) -> std::sync::MutexGuard<'_, ErrorHandler> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect, initialize and serve until stopped or given up on.
    async fn run(&self, target: TransportTarget, mut stop_rx: oneshot::Receiver<()>) -> Exit {
        loop {
            self.set_state(ClientState::Connecting);
            let connected = tokio::select! {
                _ = &mut stop_rx => return Exit::Stopped,
                result = self.context.connector.connect(&target) => result,
            };

            let mut session = match connected {
                Ok(transport) => Session::new(self.key.extension_id.clone(), transport),
                Err(e) => match self.initialization_failed(e.into()) {
                    Some(delay) => {
                        if sleep_or_stop(delay, &mut stop_rx).await {
                            return Exit::Stopped;
                        }
                        continue;
                    }
                    None => return Exit::Done(ClientState::ActivateFailed),
                },
            };

            self.set_state(ClientState::Initializing);
            let params = InitializeParams {
                root: self.key.root_uri.clone(),
                initialization_options: self.manifest.args.clone(),
            };
            let initialized = tokio::select! {
                _ = &mut stop_rx => {
                    session.shutdown();
                    return Exit::Stopped;
                }
                result = session.initialize(params) => result,
            };
            if let Err(e) = initialized {
                match self.initialization_failed(e) {
                    Some(delay) => {
                        if sleep_or_stop(delay, &mut stop_rx).await {
                            return Exit::Stopped;
                        }
                        continue;
                    }
                    None => return Exit::Done(ClientState::ActivateFailed),
                }
            }

            self.handler().reset_session();
            self.set_state(ClientState::Active);
            tracing::info!(extension = %self.key.extension_id, root = ?self.key.root_uri, "Extension active");

            loop {
                let event = tokio::select! {
                    _ = &mut stop_rx => {
                        self.set_state(ClientState::ShuttingDown);
                        session.shutdown();
                        return Exit::Stopped;
                    }
                    event = session.next_event() => event,
                };

                match event {
                    SessionEvent::RuntimeError(message) => {
                        let action = self.handler().error(&message);
                        if action == ErrorAction::ShutDown {
                            self.set_state(ClientState::ShuttingDown);
                            session.shutdown();
                            return Exit::Done(ClientState::Stopped);
                        }
                    }
                    SessionEvent::ConfigurationUpdate { id, params } => {
                        let request = ConfigurationUpdateRequest {
                            extension_id: self.key.extension_id.clone(),
                            params,
                        };
                        if self.context.updates.send(request).is_err() {
                            tracing::warn!(extension = %self.key.extension_id, "Dropping configuration update, nobody is listening");
                        }
                        session.respond(&id, Ok(serde_json::Value::Null));
                    }
                    SessionEvent::Closed => {
                        let action = self.handler().closed();
                        match action {
                            CloseAction::DoNotReconnect => return Exit::Done(ClientState::Stopped),
                            CloseAction::Reconnect(delay) => {
                                self.set_state(ClientState::Connecting);
                                if sleep_or_stop(delay, &mut stop_rx).await {
                                    return Exit::Stopped;
                                }
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// The retry delay, or `None` to give up.
    fn initialization_failed(&self, err: InitializationError) -> Option<Duration> {
        match self.handler().initialization_failed(&err) {
            InitializationAction::DoNotRetry => None,
            InitializationAction::RetryAfter(delay) => Some(delay),
        }
    }
}

/// Sleep for `delay`. Returns `true` if stopped first.
async fn sleep_or_stop(delay: Duration, stop_rx: &mut oneshot::Receiver<()>) -> bool {
    tokio::select! {
        _ = stop_rx => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::retry::{RetryWindow, FAST_RETRY_DELAY, SLOW_RETRY_DELAY};
    use crate::client::testing::{self, FakeExtension, TestConnector};
    use crate::client::ConnectError;

    fn manifest(platform: &str) -> ExtensionManifest {
        ExtensionManifest::parse(&format!(
            r#"{{"platform": {}, "activationEvents": ["*"], "args": {{"x": 1}}}}"#,
            platform
        ))
        .unwrap()
    }

    fn tcp() -> ExtensionManifest {
        manifest(r#"{"type": "tcp", "address": "h:1"}"#)
    }

    fn client(connector: Arc<TestConnector>, manifest: ExtensionManifest) -> (Client, Arc<StdMutex<RetryWindow>>, mpsc::UnboundedReceiver<ConfigurationUpdateRequest>) {
        let window = Arc::new(StdMutex::new(RetryWindow::new()));
        let (context, updates) = testing::context(connector);
        let key = ClientKey::new("acme/go", Some("git://repo".to_string()));
        let handler = ErrorHandler::new("acme/go", window.clone());
        (Client::new(key, manifest, None, handler, context), window, updates)
    }

    #[tokio::test]
    async fn test_activate_reaches_active() {
        let (connector, mut peers) = TestConnector::new();
        let (client, _, _) = client(connector, tcp());
        let mut state = client.subscribe_state();

        client.activate().await.unwrap();
        let mut ext = FakeExtension::accept(&mut peers).await;
        let init = ext.initialize().await;
        assert_eq!(init["root"], serde_json::json!("git://repo"));
        assert_eq!(init["initializationOptions"], serde_json::json!({"x": 1}));

        testing::wait_for(&mut state, ClientState::Active).await;
        assert!(client.needs_stop());

        client.stop().await;
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(!client.needs_stop());
        assert!(ext.saw_shutdown().await);
    }

    #[tokio::test]
    async fn test_unsupported_bundle_fails_without_connecting() {
        let (connector, _peers) = TestConnector::new();
        let (client, _, _) = client(
            connector.clone(),
            manifest(r#"{"type": "bundle", "url": "u", "contentType": "text/plain"}"#),
        );

        let err = client.activate().await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedContentType { .. }));
        assert_eq!(client.state(), ClientState::ActivateFailed);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_permanent() {
        let (connector, _peers) = TestConnector::new();
        connector.fail_next(ConnectError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        let (client, _, _) = client(connector.clone(), tcp());
        let mut state = client.subscribe_state();

        client.activate().await.unwrap();
        testing::wait_for(&mut state, ClientState::ActivateFailed).await;
        assert_eq!(connector.attempts(), 1);

        // Dead end until activated again.
        client.stop().await;
        assert_eq!(client.state(), ClientState::ActivateFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_connect_failure_retries() {
        let (connector, mut peers) = TestConnector::new();
        connector.fail_next(ConnectError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        )));
        let (client, window, _) = client(connector.clone(), tcp());
        let mut state = client.subscribe_state();

        client.activate().await.unwrap();
        let mut ext = FakeExtension::accept(&mut peers).await;
        ext.initialize().await;
        testing::wait_for(&mut state, ClientState::Active).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(window.lock().unwrap().len(), 1);

        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_reconnects_then_gives_up() {
        let (connector, mut peers) = TestConnector::new();
        let (client, window, _) = client(connector.clone(), tcp());
        let mut state = client.subscribe_state();
        client.activate().await.unwrap();

        // Each close within the minute records an attempt; the fifth gives up.
        for _ in 0..5 {
            let mut ext = FakeExtension::accept(&mut peers).await;
            ext.initialize().await;
            testing::wait_for(&mut state, ClientState::Active).await;
            drop(ext);
        }

        testing::wait_for(&mut state, ClientState::Stopped).await;
        assert_eq!(window.lock().unwrap().len(), 4);
        assert_eq!(connector.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_reconnect() {
        let (connector, mut peers) = TestConnector::new();
        let (client, _, _) = client(connector.clone(), tcp());
        let mut state = client.subscribe_state();
        client.activate().await.unwrap();

        let mut ext = FakeExtension::accept(&mut peers).await;
        ext.initialize().await;
        testing::wait_for(&mut state, ClientState::Active).await;
        drop(ext);
        testing::wait_for(&mut state, ClientState::Connecting).await;

        client.stop().await;
        assert_eq!(client.state(), ClientState::Stopped);
        tokio::time::advance(FAST_RETRY_DELAY + SLOW_RETRY_DELAY).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_runtime_errors_shut_down_after_five() {
        let (connector, mut peers) = TestConnector::new();
        let (client, _, _) = client(connector, tcp());
        let mut state = client.subscribe_state();
        client.activate().await.unwrap();

        let mut ext = FakeExtension::accept(&mut peers).await;
        ext.initialize().await;
        testing::wait_for(&mut state, ClientState::Active).await;

        for _ in 0..6 {
            ext.send_raw("not json");
        }
        testing::wait_for(&mut state, ClientState::Stopped).await;
        assert!(ext.saw_shutdown().await);
    }

    #[tokio::test]
    async fn test_configuration_update_forwarded() {
        let (connector, mut peers) = TestConnector::new();
        let (client, _, mut updates) = client(connector, tcp());
        let mut state = client.subscribe_state();
        client.activate().await.unwrap();

        let mut ext = FakeExtension::accept(&mut peers).await;
        ext.initialize().await;
        testing::wait_for(&mut state, ClientState::Active).await;

        let result = ext
            .request("configuration/update", serde_json::json!({"path": ["k"], "value": true}))
            .await;
        assert_eq!(result, Ok(serde_json::Value::Null));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.extension_id, "acme/go");
        assert_eq!(update.params.value, serde_json::json!(true));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_restart_runs_one_session_at_a_time() {
        let (connector, mut peers) = TestConnector::new();
        let (client, _, _) = client(connector.clone(), tcp());
        let mut state = client.subscribe_state();
        client.activate().await.unwrap();

        let mut first = FakeExtension::accept(&mut peers).await;
        first.initialize().await;
        testing::wait_for(&mut state, ClientState::Active).await;

        client.restart().await.unwrap();
        assert!(first.saw_shutdown().await);

        let mut second = FakeExtension::accept(&mut peers).await;
        second.initialize().await;
        testing::wait_for(&mut state, ClientState::Active).await;
        assert_eq!(connector.attempts(), 2);

        // Activating an active client is a no-op.
        client.activate().await.unwrap();
        assert_eq!(connector.attempts(), 2);
        client.stop().await;
    }
}
