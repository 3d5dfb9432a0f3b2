//! Settings Draft Controller - generation parameters with commit/revert
//!
//! The committed copy changes only when the gateway echoes a successful
//! commit. While the dialog is open, edits go to a draft that is clamped at
//! the point of edit.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::GenerationSettings;
use crate::gateway::Gateway;

use super::errors::SyncError;
use super::events::{EventSink, SyncEvent};

#[derive(Debug, Default)]
struct SettingsInner {
    committed: GenerationSettings,
    draft: Option<GenerationSettings>,
}

/// Settings Draft store
#[derive(Clone)]
pub struct SettingsDraft {
    inner: Arc<RwLock<SettingsInner>>,
    gateway: Arc<dyn Gateway>,
    events: EventSink,
}

impl SettingsDraft {
    pub fn new(gateway: Arc<dyn Gateway>, events: EventSink) -> Self {
        Self::with_initial(gateway, events, GenerationSettings::default())
    }

    /// Start from `initial` until `load` reports the stored settings
    pub fn with_initial(
        gateway: Arc<dyn Gateway>,
        events: EventSink,
        initial: GenerationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SettingsInner {
                committed: initial.clamped(),
                draft: None,
            })),
            gateway,
            events,
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, SettingsInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("SettingsDraft read lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, SettingsInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("SettingsDraft write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn committed(&self) -> GenerationSettings {
        self.read_inner().committed
    }

    pub fn draft(&self) -> Option<GenerationSettings> {
        self.read_inner().draft
    }

    pub fn is_open(&self) -> bool {
        self.read_inner().draft.is_some()
    }

    /// Fetch the stored settings; on failure the current committed copy stays
    pub async fn load(&self) -> Result<GenerationSettings, SyncError> {
        match self.gateway.get_settings().await {
            Ok(stored) => {
                let stored = stored.clamped();
                self.write_inner().committed = stored;
                tracing::debug!("Loaded settings {:?}", stored);
                self.events.emit(SyncEvent::SettingsCommitted(stored));
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!("Failed to load settings: {}", e);
                self.events
                    .error(format!("Could not load settings: {}", e.detail()));
                Err(e.into())
            }
        }
    }

    /// Open the dialog with a copy of the committed settings
    pub fn open(&self) -> GenerationSettings {
        let draft = {
            let mut inner = self.write_inner();
            let draft = inner.committed;
            inner.draft = Some(draft);
            draft
        };
        self.events.emit(SyncEvent::DraftChanged(Some(draft)));
        draft
    }

    fn edit<F>(&self, f: F) -> Result<GenerationSettings, SyncError>
    where
        F: FnOnce(&mut GenerationSettings),
    {
        let draft = {
            let mut inner = self.write_inner();
            let draft = inner.draft.as_mut().ok_or(SyncError::DraftClosed)?;
            f(draft);
            *draft = draft.clamped();
            *draft
        };
        self.events.emit(SyncEvent::DraftChanged(Some(draft)));
        Ok(draft)
    }

    pub fn set_max_tokens(&self, value: u32) -> Result<GenerationSettings, SyncError> {
        self.edit(|d| d.max_tokens = value)
    }

    pub fn set_temperature(&self, value: f32) -> Result<GenerationSettings, SyncError> {
        if !value.is_finite() {
            return Err(SyncError::InvalidSetting("temperature"));
        }
        self.edit(|d| d.temperature = value)
    }

    pub fn set_top_p(&self, value: f32) -> Result<GenerationSettings, SyncError> {
        if !value.is_finite() {
            return Err(SyncError::InvalidSetting("top_p"));
        }
        self.edit(|d| d.top_p = value)
    }

    /// Send the draft; the gateway's echo becomes the committed copy
    ///
    /// On failure the committed copy is untouched and the draft stays open.
    pub async fn commit(&self) -> Result<GenerationSettings, SyncError> {
        let draft = self.draft().ok_or(SyncError::DraftClosed)?;

        match self.gateway.commit_settings(&draft).await {
            Ok(stored) => {
                {
                    let mut inner = self.write_inner();
                    inner.committed = stored;
                    inner.draft = None;
                }
                tracing::info!(
                    "Settings committed: max_tokens={} temperature={} top_p={}",
                    stored.max_tokens,
                    stored.temperature,
                    stored.top_p
                );
                self.events.emit(SyncEvent::SettingsCommitted(stored));
                self.events.emit(SyncEvent::DraftChanged(None));
                Ok(stored)
            }
            Err(e) => {
                tracing::warn!("Failed to commit settings: {}", e);
                self.events
                    .error(format!("Could not save settings: {}", e.detail()));
                Err(e.into())
            }
        }
    }

    /// Close the dialog without saving
    pub fn cancel(&self) {
        let was_open = self.write_inner().draft.take().is_some();
        if was_open {
            self.events.emit(SyncEvent::DraftChanged(None));
        }
    }
}

#[cfg(all(test, feature = "test-sim"))]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, Op, SimGateway};

    fn setup() -> (Arc<SimGateway>, SettingsDraft) {
        let sim = Arc::new(SimGateway::new());
        let settings = SettingsDraft::new(sim.clone(), EventSink::disabled());
        (sim, settings)
    }

    #[tokio::test]
    async fn cancel_keeps_committed() {
        let (_sim, settings) = setup();
        let committed = settings.committed();

        settings.open();
        settings.set_temperature(1.5).unwrap();
        settings.set_max_tokens(64).unwrap();
        settings.cancel();

        assert!(!settings.is_open());
        assert_eq!(settings.committed(), committed);

        // Reopening starts from committed, not from the discarded edits
        let reopened = settings.open();
        assert_eq!(reopened, committed);
    }

    #[tokio::test]
    async fn commit_takes_gateway_echo() {
        let (sim, settings) = setup();
        sim.set_settings_normalizer(|s| GenerationSettings {
            max_tokens: s.max_tokens.min(256),
            ..s
        });

        settings.open();
        settings.set_max_tokens(1024).unwrap();
        settings.set_top_p(0.4).unwrap();
        let stored = settings.commit().await.unwrap();

        assert_eq!(stored.max_tokens, 256);
        assert_eq!(stored.top_p, 0.4);
        assert_eq!(settings.committed(), stored);
        assert!(!settings.is_open());
        assert_eq!(sim.stored_settings(), stored);
    }

    #[tokio::test]
    async fn commit_takes_normalized_temperature() {
        let (sim, settings) = setup();
        sim.set_settings_normalizer(|s| GenerationSettings {
            temperature: s.temperature.min(1.4),
            ..s
        });
        assert_eq!(settings.committed().temperature, 0.7);

        settings.open();
        settings.set_temperature(1.5).unwrap();
        assert_eq!(settings.draft().unwrap().temperature, 1.5);
        settings.commit().await.unwrap();

        assert_eq!(settings.committed().temperature, 1.4);
        assert_eq!(sim.stored_settings().temperature, 1.4);
        assert!(!settings.is_open());
    }

    #[tokio::test]
    async fn failed_commit_keeps_draft_open() {
        let (sim, settings) = setup();
        let committed = settings.committed();
        settings.open();
        settings.set_temperature(0.1).unwrap();

        sim.fail_next(Op::CommitSettings, GatewayError::Network("refused".into()));
        assert!(settings.commit().await.is_err());
        assert_eq!(settings.committed(), committed);
        assert_eq!(settings.draft().unwrap().temperature, 0.1);
    }

    #[test]
    fn edits_clamp_and_reject_non_finite() {
        let sim = Arc::new(SimGateway::new());
        let settings = SettingsDraft::new(sim, EventSink::disabled());
        settings.open();

        assert_eq!(settings.set_temperature(9.0).unwrap().temperature, 2.0);
        assert_eq!(settings.set_top_p(-1.0).unwrap().top_p, 0.0);
        assert_eq!(settings.set_max_tokens(0).unwrap().max_tokens, 1);

        let before = settings.draft();
        assert!(matches!(
            settings.set_temperature(f32::NAN),
            Err(SyncError::InvalidSetting("temperature"))
        ));
        assert_eq!(settings.draft(), before);
    }

    #[test]
    fn edits_need_open_draft() {
        let sim = Arc::new(SimGateway::new());
        let settings = SettingsDraft::new(sim, EventSink::disabled());
        assert!(matches!(
            settings.set_max_tokens(10),
            Err(SyncError::DraftClosed)
        ));
    }

    #[tokio::test]
    async fn commit_without_open_draft_is_rejected() {
        let (sim, settings) = setup();
        assert!(matches!(
            settings.commit().await,
            Err(SyncError::DraftClosed)
        ));
        assert_eq!(sim.calls(Op::CommitSettings), 0);
    }

    #[tokio::test]
    async fn load_replaces_committed() {
        let (sim, settings) = setup();
        let stored = GenerationSettings {
            max_tokens: 2048,
            temperature: 0.2,
            top_p: 1.0,
        };
        sim.set_settings(stored);
        assert_eq!(settings.load().await.unwrap(), stored);
        assert_eq!(settings.committed(), stored);
    }
}
