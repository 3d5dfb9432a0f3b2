//! Sync Orchestrator - coordinates the stores for user actions
//!
//! Stores never call each other. Every cross-store effect (re-pointing the
//! thread after the directory changed, refreshing the directory after a
//! reply) is an explicit step here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::core::{ChatSession, Message, SessionId};
use crate::gateway::{Gateway, ModelStatus};

use super::catalog::ModelCatalog;
use super::directory::{ChatDirectory, ConfirmDelete};
use super::errors::SyncError;
use super::events::EventSink;
use super::settings::SettingsDraft;
use super::thread::MessageThread;

/// Outcome of each part of `startup`
#[derive(Debug)]
pub struct StartupReport {
    pub settings: Result<(), SyncError>,
    pub directory: Result<(), SyncError>,
    pub catalog: Result<(), SyncError>,
    pub thread: Result<(), SyncError>,
}

impl StartupReport {
    pub fn is_ok(&self) -> bool {
        self.settings.is_ok() && self.directory.is_ok() && self.catalog.is_ok() && self.thread.is_ok()
    }

    /// Failures in the order the parts are listed
    pub fn errors(&self) -> Vec<&SyncError> {
        [&self.settings, &self.directory, &self.catalog, &self.thread]
            .into_iter()
            .filter_map(|r| r.as_ref().err())
            .collect()
    }
}

/// Owner of the four stores
#[derive(Clone)]
pub struct SyncOrchestrator {
    gateway: Arc<dyn Gateway>,
    directory: ChatDirectory,
    thread: MessageThread,
    catalog: ModelCatalog,
    settings: SettingsDraft,
    events: EventSink,
    use_internet: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(gateway: Arc<dyn Gateway>, events: EventSink, config: &Config) -> Self {
        let credential = Config::catalog_token_from_env();
        Self {
            directory: ChatDirectory::new(gateway.clone(), events.clone()),
            thread: MessageThread::new(gateway.clone(), events.clone())
                .with_placeholder(config.thread.placeholder.clone()),
            catalog: ModelCatalog::new(gateway.clone(), events.clone())
                .with_page_size(config.catalog.page_size)
                .with_install_notice(Duration::from_millis(config.catalog.install_notice_ms))
                .with_credential(credential),
            settings: SettingsDraft::with_initial(gateway.clone(), events.clone(), config.generation),
            gateway,
            events,
            use_internet: Arc::new(AtomicBool::new(false)),
        }
    }

    // ========== Store access ==========

    pub fn directory(&self) -> &ChatDirectory {
        &self.directory
    }

    pub fn thread(&self) -> &MessageThread {
        &self.thread
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &SettingsDraft {
        &self.settings
    }

    pub fn use_internet(&self) -> bool {
        self.use_internet.load(Ordering::Relaxed)
    }

    pub fn set_use_internet(&self, enabled: bool) {
        self.use_internet.store(enabled, Ordering::Relaxed);
        tracing::debug!("Internet lookups {}", if enabled { "enabled" } else { "disabled" });
    }

    // ========== Lifecycle ==========

    /// Load settings, the chat list and the first catalog page concurrently,
    /// then open the active chat
    ///
    /// A failing part does not stop the others.
    pub async fn startup(&self) -> StartupReport {
        tracing::info!("Starting sync");
        let (settings, directory, catalog) = futures::future::join3(
            self.settings.load(),
            self.directory.list(),
            self.catalog.refresh(),
        )
        .await;
        let thread = self.sync_thread().await;

        StartupReport {
            settings: settings.map(|_| ()),
            directory,
            catalog: catalog.map(|_| ()),
            thread,
        }
    }

    /// Point the thread at the directory's active chat if they differ
    async fn sync_thread(&self) -> Result<(), SyncError> {
        let active = self.directory.active();
        if active == self.thread.session() {
            return Ok(());
        }
        match active {
            Some(id) => match self.thread.switch_to(&id).await {
                Err(SyncError::SessionGone(gone)) => {
                    // The chat vanished server-side; the list tells us what is left
                    tracing::info!("Active chat {} is gone, refreshing chats", gone);
                    self.directory.list().await?;
                    match self.directory.active() {
                        Some(next) if next != gone => self.thread.switch_to(&next).await,
                        Some(_) => Err(SyncError::SessionGone(gone)),
                        None => {
                            self.thread.close();
                            Ok(())
                        }
                    }
                }
                other => other,
            },
            None => {
                self.thread.close();
                Ok(())
            }
        }
    }

    // ========== Chats ==========

    /// Re-list chats and follow the active one
    pub async fn refresh_chats(&self) -> Result<(), SyncError> {
        let listed = self.directory.list().await;
        let synced = self.sync_thread().await;
        listed.and(synced)
    }

    pub async fn switch_chat(&self, id: &SessionId) -> Result<(), SyncError> {
        self.directory.set_active(id)?;
        self.thread.switch_to(id).await
    }

    /// Create a chat and open it; a new chat has no messages to fetch
    pub async fn new_chat(&self, title: Option<&str>) -> Result<ChatSession, SyncError> {
        let session = self.directory.create(title).await?;
        self.thread.open_empty(&session.id);
        Ok(session)
    }

    pub async fn delete_chat(
        &self,
        id: &SessionId,
        confirm: &dyn ConfirmDelete,
    ) -> Result<(), SyncError> {
        self.directory.delete(id, confirm).await?;
        self.thread.forget(id);
        self.sync_thread().await
    }

    // ========== Messages ==========

    /// Send `text` to the active chat with the selected model and committed
    /// settings
    ///
    /// After a reply the chat list is refreshed so ordering and `model_used`
    /// follow the server.
    pub async fn send(&self, text: &str) -> Result<Message, SyncError> {
        let session = self.directory.active();
        let model = self.catalog.selected();
        let reply = self
            .thread
            .send(
                session.as_ref(),
                text,
                model.as_deref(),
                self.settings.committed(),
                self.use_internet(),
            )
            .await?;

        if let Err(e) = self.refresh_chats().await {
            tracing::debug!("Chat refresh after reply failed: {}", e);
        }
        Ok(reply)
    }

    // ========== Models ==========

    pub async fn install(&self, name: &str) -> Result<(), SyncError> {
        self.catalog.install(name).await
    }

    /// Select `name` and have the backend load it
    ///
    /// If the backend cannot load it the previous selection is restored.
    pub async fn select_model(&self, name: &str) -> Result<(), SyncError> {
        let previous = self.catalog.selected();
        self.catalog.select(name)?;
        if previous.as_deref() == Some(name) {
            return Ok(());
        }

        match self.gateway.load_model(name).await {
            Ok(()) => {
                tracing::info!("Backend switched to {}", name);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Backend could not load {}: {}", name, e);
                self.catalog.revert_selection(name, previous);
                self.events
                    .error(format!("Could not load {}: {}", name, e.detail()));
                Err(e.into())
            }
        }
    }

    /// Reset the backend's dialog context; stored chats are untouched
    pub async fn clear_history(&self) -> Result<(), SyncError> {
        match self.gateway.clear_history().await {
            Ok(()) => {
                tracing::info!("Backend dialog history cleared");
                self.events.info("Dialog history cleared");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Clearing dialog history failed: {}", e);
                self.events
                    .error(format!("Could not clear history: {}", e.detail()));
                Err(e.into())
            }
        }
    }

    pub async fn on_scroll_near_end(&self) -> Result<Option<usize>, SyncError> {
        self.catalog.on_scroll_near_end().await
    }

    pub async fn refresh_catalog(&self) -> Result<usize, SyncError> {
        self.catalog.refresh().await
    }

    pub async fn set_credential(&self, value: &str) -> Result<usize, SyncError> {
        self.catalog.set_credential(value).await
    }

    /// What the backend currently has loaded
    pub async fn model_status(&self) -> Result<ModelStatus, SyncError> {
        self.gateway.model_status().await.map_err(|e| {
            tracing::warn!("Model status query failed: {}", e);
            self.events
                .error(format!("Could not read model status: {}", e.detail()));
            SyncError::from(e)
        })
    }
}
