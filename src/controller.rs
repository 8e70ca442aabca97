//! The controller context object.
//!
//! A [`Controller`] is built once at startup from its collaborators and owns
//! everything else: the settings resolver, the reconciler, and the client
//! connection manager. Nothing in the crate reaches it through global state;
//! callers hold an `Arc<Controller>` and pass it where it's needed.
//!
//! ```text
//! update_cascade ──► SettingsResolver ──► Reconciler ──► ConfiguredView
//!                                                            │
//! set_document ─────────────────────────────────────────────►│
//!                                                            ▼
//!                                            ClientConnectionManager
//!                                                            │
//!            SettingsEditor ◄── configuration updates ◄──────┘
//!                   ▲
//!  attach_page ─────┘ (EditSettings)
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::client::{ClientConnectionManager, ConfigurationUpdateRequest, Connector};
use crate::config::Config;
use crate::error::{ControllerError, ControllerResult};
use crate::extensions::{
    AggregateError, ConfiguredExtension, ConfiguredSearchResults, DocumentContext, Reconciler,
    RegistryClient,
};
use crate::handshake::{PageConnection, PageRequest};
use crate::settings::{
    target_subject, Cascade, ConfigurationUpdateParams, RawCascade, SettingsEditor,
    SettingsResolver, UpdateExtensionSettingsArgs,
};

/// The configured-extensions view as seen by consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfiguredView {
    /// No cascade has been resolved yet.
    Loading,
    Ready(Arc<Vec<ConfiguredExtension>>),
    /// The merged settings are broken or the registry failed. Blocks the whole view.
    Failed(AggregateError),
}

pub struct Controller {
    settings: SettingsResolver,
    reconciler: Reconciler,
    editor: Arc<dyn SettingsEditor>,
    manager: ClientConnectionManager,
    document: watch::Sender<Option<DocumentContext>>,
    view: watch::Sender<ConfiguredView>,

    /// Taken by `run` for its duration.
    updates: Mutex<Option<mpsc::UnboundedReceiver<ConfigurationUpdateRequest>>>,
}

impl Controller {
    pub fn new(
        config: &Config,
        registry: Arc<dyn RegistryClient>,
        editor: Arc<dyn SettingsEditor>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (manager, updates) = ClientConnectionManager::new(connector, config.endpoint.clone());
        let (document, _) = watch::channel(None);
        let (view, _) = watch::channel(ConfiguredView::Loading);

        Self {
            settings: SettingsResolver::new(),
            reconciler: Reconciler::new(registry),
            editor,
            manager,
            document,
            view,
            updates: Mutex::new(Some(updates)),
        }
    }

    pub fn settings(&self) -> &SettingsResolver {
        &self.settings
    }

    pub fn manager(&self) -> &ClientConnectionManager {
        &self.manager
    }

    /// Feed a new raw cascade. Returns `false` if nothing changed.
    pub fn update_cascade(&self, raw: RawCascade) -> bool {
        self.settings.update(raw)
    }

    /// Set the current document. Returns `false` if it's the same one.
    pub fn set_document(&self, document: Option<DocumentContext>) -> bool {
        self.document.send_if_modified(|current| {
            if *current == document {
                return false;
            }
            *current = document;
            true
        })
    }

    pub fn document(&self) -> Option<DocumentContext> {
        self.document.borrow().clone()
    }

    /// Watch the configured-extensions view.
    pub fn configured_extensions(&self) -> watch::Receiver<ConfiguredView> {
        self.view.subscribe()
    }

    /// Reconcile the current cascade and bring the clients in line with it.
    pub async fn refresh(&self) {
        let Some(cascade) = self.settings.current() else {
            return;
        };

        let view = match self.reconciler.configured_extensions(&cascade).await {
            Ok(extensions) => {
                tracing::debug!(count = extensions.len(), "Configured extensions resolved");
                ConfiguredView::Ready(Arc::new(extensions))
            }
            Err(e) => {
                tracing::warn!("Failed to resolve configured extensions: {}", e);
                ConfiguredView::Failed(e)
            }
        };
        self.view.send_replace(view);
        self.apply_environment().await;
    }

    /// Re-apply activation to the last resolved view.
    ///
    /// While the view is loading or failed, running clients are left alone.
    async fn apply_environment(&self) {
        let extensions = match &*self.view.borrow() {
            ConfiguredView::Ready(extensions) => Arc::clone(extensions),
            _ => return,
        };
        let document = self.document();
        self.manager
            .set_environment(&extensions, document.as_ref())
            .await;
    }

    /// Drive reconciliation until `shutdown` completes, then stop every client.
    pub async fn run<F>(&self, shutdown: F) -> ControllerResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut updates = self
            .updates
            .lock()
            .await
            .take()
            .ok_or(ControllerError::AlreadyRunning)?;

        let mut cascades = self.settings.subscribe();
        let mut documents = self.document.subscribe();
        tokio::pin!(shutdown);

        tracing::info!("Controller started");
        self.refresh().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                changed = cascades.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.refresh().await;
                }
                changed = documents.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.apply_environment().await;
                }
                Some(request) = updates.recv() => {
                    let extension = request.extension_id.clone();
                    if let Err(e) = self.update_configuration(&request.extension_id, request.params).await {
                        tracing::warn!(extension = %extension, "Configuration update failed: {}", e);
                    }
                }
            }
        }

        *self.updates.lock().await = Some(updates);
        self.shutdown().await;
        tracing::info!("Controller stopped");
        Ok(())
    }

    /// Edit an extension's settings.
    ///
    /// Applies to `subject` if given, otherwise to the highest precedence
    /// subject of the current cascade.
    pub async fn update_extension_settings(
        &self,
        args: UpdateExtensionSettingsArgs,
        subject: Option<&str>,
    ) -> ControllerResult<()> {
        let cascade = self.settings.current();
        let subject = target_subject(cascade.as_deref(), subject)?;
        tracing::debug!(
            extension = %args.extension_id,
            subject = %subject.id,
            "Updating extension settings"
        );
        self.editor
            .update_extension_settings(&subject.id, args)
            .await?;
        Ok(())
    }

    /// A running extension asked to change one of its settings.
    pub async fn update_configuration(
        &self,
        extension_id: &str,
        params: ConfigurationUpdateParams,
    ) -> ControllerResult<()> {
        self.update_extension_settings(
            UpdateExtensionSettingsArgs::new(extension_id).with_edit(params),
            None,
        )
        .await
    }

    /// Configured view of a single extension, added or not.
    pub async fn extension(&self, extension_id: &str) -> ControllerResult<ConfiguredExtension> {
        let cascade = self.cascade_or_empty();
        Ok(self
            .reconciler
            .for_extension_id(&cascade, extension_id)
            .await?)
    }

    /// Search the registry, listing added extensions first.
    pub async fn search(&self, query: &str) -> ControllerResult<ConfiguredSearchResults> {
        let cascade = self.cascade_or_empty();
        Ok(self.reconciler.search(&cascade, query).await?)
    }

    fn cascade_or_empty(&self) -> Arc<Cascade> {
        self.settings.current().unwrap_or_else(|| {
            Arc::new(Cascade {
                subjects: Vec::new(),
                merged: None,
            })
        })
    }

    /// Serve a page: apply its edits and answer its settings requests.
    pub fn attach_page(self: &Arc<Self>, mut page: PageConnection) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = page.next_request().await {
                match request {
                    PageRequest::EditSettings(edit) => {
                        let extension = edit.extension_id.clone();
                        if let Err(e) = controller.update_extension_settings(edit, None).await {
                            tracing::warn!(extension = %extension, "Settings edit from page failed: {}", e);
                        }
                    }
                    PageRequest::GetSettings => {
                        let settings = controller
                            .settings
                            .merged_text()
                            .unwrap_or_else(|| "{}".to_string());
                        if let Err(e) = page.send_settings(settings).await {
                            tracing::warn!("Failed to send settings to page: {}", e);
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Page disconnected");
        })
    }

    /// Stop every client.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
