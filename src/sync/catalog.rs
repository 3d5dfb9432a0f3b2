//! Model Catalog Store - paginated, deduplicated model list
//!
//! Entries are keyed by name and kept in the order the gateway returned them.
//! Every load carries the catalog generation it was issued under; a response
//! from an older generation is discarded. Invalidation (credential change,
//! refresh) bumps the generation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::core::{InstallState, ModelEntry, SortKey};
use crate::gateway::{Gateway, ModelPageRequest};

use super::errors::SyncError;
use super::events::{EventSink, SyncEvent};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_INSTALL_NOTICE: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
struct InstallSlot {
    state: InstallState,
    /// Distinguishes successive installs of the same name for delayed clears
    epoch: u64,
}

#[derive(Debug, Default)]
struct CatalogInner {
    entries: Vec<ModelEntry>,
    names: HashSet<String>,
    next_offset: usize,
    generation: u64,
    /// Generation of the page load currently in flight
    in_flight: Option<u64>,
    /// Offsets whose page has been merged in this generation
    merged_offsets: HashSet<usize>,
    exhausted: bool,
    selected: Option<String>,
    installs: HashMap<String, InstallSlot>,
    install_epoch: u64,
    credential: Option<String>,
}

impl CatalogInner {
    /// Drop everything held and start a new generation
    fn invalidate(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.clear();
    }

    /// Drop everything held, keeping the generation
    fn clear(&mut self) {
        self.entries.clear();
        self.names.clear();
        self.next_offset = 0;
        self.merged_offsets.clear();
        self.exhausted = false;
        self.installs
            .retain(|_, slot| slot.state == InstallState::Installing);
    }

    /// Merge a page, skipping names already held. Returns how many were added.
    fn merge(&mut self, page: Vec<ModelEntry>) -> usize {
        let mut added = 0;
        for entry in page {
            if self.names.insert(entry.name.clone()) {
                self.entries.push(entry);
                added += 1;
            }
        }
        self.next_offset = self.entries.len();
        added
    }

    /// Keep a selection that is still installed, otherwise take the first
    /// installed entry. Returns true when the selection changed.
    fn auto_select(&mut self) -> bool {
        let keep = self.selected.as_ref().is_some_and(|name| {
            self.entries
                .iter()
                .any(|e| &e.name == name && e.installed)
        });
        if keep {
            return false;
        }
        let next = self
            .entries
            .iter()
            .find(|e| e.installed)
            .map(|e| e.name.clone());
        let changed = next != self.selected;
        self.selected = next;
        changed
    }

    fn entry(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Model Catalog store
#[derive(Clone)]
pub struct ModelCatalog {
    inner: Arc<RwLock<CatalogInner>>,
    gateway: Arc<dyn Gateway>,
    events: EventSink,
    page_size: usize,
    install_notice: Duration,
}

impl ModelCatalog {
    pub fn new(gateway: Arc<dyn Gateway>, events: EventSink) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CatalogInner::default())),
            gateway,
            events,
            page_size: DEFAULT_PAGE_SIZE,
            install_notice: DEFAULT_INSTALL_NOTICE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// How long a finished install keeps its success/error state
    pub fn with_install_notice(mut self, notice: Duration) -> Self {
        self.install_notice = notice;
        self
    }

    /// Start with a credential already stored server-side (e.g. from the environment)
    pub fn with_credential(self, credential: Option<String>) -> Self {
        self.write_inner().credential = credential;
        self
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, CatalogInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("ModelCatalog read lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, CatalogInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("ModelCatalog write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ========== Getters ==========

    pub fn entries(&self) -> Vec<ModelEntry> {
        self.read_inner().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.read_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_inner().entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<ModelEntry> {
        self.read_inner().entry(name).cloned()
    }

    pub fn selected(&self) -> Option<String> {
        self.read_inner().selected.clone()
    }

    pub fn next_offset(&self) -> usize {
        self.read_inner().next_offset
    }

    pub fn generation(&self) -> u64 {
        self.read_inner().generation
    }

    pub fn is_loading(&self) -> bool {
        self.read_inner().in_flight.is_some()
    }

    /// The last page came back short; scrolling no longer loads
    pub fn is_exhausted(&self) -> bool {
        self.read_inner().exhausted
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn install_state(&self, name: &str) -> InstallState {
        self.read_inner()
            .installs
            .get(name)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    /// Entries in `key` order; ties and `SortKey::Catalog` keep catalog order
    pub fn sorted(&self, key: SortKey) -> Vec<ModelEntry> {
        let mut entries = self.entries();
        match key {
            SortKey::Catalog => {}
            SortKey::Name => {
                entries.sort_by_cached_key(|e| e.name.to_lowercase());
            }
            SortKey::Size => {
                entries.sort_by(|a, b| absent_last(a.size, b.size, |x, y| x.cmp(y)));
            }
            SortKey::Parameters => {
                entries.sort_by(|a, b| {
                    absent_last(a.parameter_count(), b.parameter_count(), |x, y| {
                        x.partial_cmp(y).unwrap_or(Ordering::Equal)
                    })
                });
            }
            SortKey::Family => {
                entries.sort_by(|a, b| {
                    absent_last(
                        a.family.as_deref().map(str::to_lowercase),
                        b.family.as_deref().map(str::to_lowercase),
                        |x, y| x.cmp(y),
                    )
                });
            }
        }
        entries
    }

    // ========== Loading ==========

    /// Reload from offset 0, replacing everything held
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        self.load(0, false).await
    }

    /// Load one page
    ///
    /// A non-append load replaces the whole set and starts a new generation.
    /// An append load merges, skipping names already held. Returns the number
    /// of entries added (0 when the response was discarded as stale).
    pub async fn load(&self, offset: usize, append: bool) -> Result<usize, SyncError> {
        let (generation, request) = {
            let mut inner = self.write_inner();
            self.begin_load(&mut inner, offset, append)
        };
        self.finish_load(generation, request, append).await
    }

    /// Mark a load in flight; must run under the same write lock as any
    /// check that decided to load
    fn begin_load(
        &self,
        inner: &mut CatalogInner,
        offset: usize,
        append: bool,
    ) -> (u64, ModelPageRequest) {
        if !append {
            inner.generation += 1;
        }
        let generation = inner.generation;
        inner.in_flight = Some(generation);
        tracing::debug!(
            "Loading catalog page offset={} append={} generation={}",
            offset,
            append,
            generation
        );
        let request = ModelPageRequest {
            offset,
            limit: self.page_size,
            credential: inner.credential.clone(),
        };
        (generation, request)
    }

    async fn finish_load(
        &self,
        generation: u64,
        request: ModelPageRequest,
        append: bool,
    ) -> Result<usize, SyncError> {
        let offset = request.offset;
        let result = self.gateway.list_models(&request).await;

        let mut inner = self.write_inner();
        if inner.generation != generation {
            tracing::debug!(
                "Discarding catalog page from generation {} (current {})",
                generation,
                inner.generation
            );
            return Ok(0);
        }
        inner.in_flight = None;

        match result {
            Ok(page) => {
                if !append {
                    inner.clear();
                }
                let received = page.len();
                let added = inner.merge(page);
                inner.merged_offsets.insert(offset);
                inner.exhausted = received < self.page_size;
                let selection_changed = inner.auto_select();
                let (len, next_offset, selected) =
                    (inner.entries.len(), inner.next_offset, inner.selected.clone());
                drop(inner);

                tracing::debug!(
                    "Catalog page merged: {} received, {} new, {} held",
                    received,
                    added,
                    len
                );
                self.events
                    .emit(SyncEvent::CatalogChanged { len, next_offset });
                if selection_changed {
                    self.events.emit(SyncEvent::SelectionChanged(selected));
                }
                Ok(added)
            }
            Err(e) => {
                tracing::warn!("Catalog load at offset {} failed: {}", offset, e);
                let selection_changed = if append {
                    false
                } else {
                    inner.clear();
                    inner.auto_select()
                };
                let (len, next_offset, selected) =
                    (inner.entries.len(), inner.next_offset, inner.selected.clone());
                drop(inner);

                self.events
                    .emit(SyncEvent::CatalogChanged { len, next_offset });
                if selection_changed {
                    self.events.emit(SyncEvent::SelectionChanged(selected));
                }
                self.events
                    .error(format!("Could not load models: {}", e.detail()));
                Err(e.into())
            }
        }
    }

    /// Load the next page if scrolling should do so
    ///
    /// Returns `Ok(None)` when the trigger is ignored: a load is in flight,
    /// the catalog is exhausted, or the next offset was already merged.
    pub async fn on_scroll_near_end(&self) -> Result<Option<usize>, SyncError> {
        let (generation, request) = {
            let mut inner = self.write_inner();
            if inner.in_flight.is_some()
                || inner.exhausted
                || inner.merged_offsets.contains(&inner.next_offset)
            {
                return Ok(None);
            }
            let offset = inner.next_offset;
            self.begin_load(&mut inner, offset, true)
        };
        self.finish_load(generation, request, true).await.map(Some)
    }

    // ========== Selection ==========

    /// Select an installed model by name
    pub fn select(&self, name: &str) -> Result<(), SyncError> {
        {
            let mut inner = self.write_inner();
            let entry = inner
                .entry(name)
                .ok_or_else(|| SyncError::UnknownModel(name.to_string()))?;
            if !entry.installed {
                return Err(SyncError::ModelNotInstalled(name.to_string()));
            }
            if inner.selected.as_deref() == Some(name) {
                return Ok(());
            }
            inner.selected = Some(name.to_string());
        }
        tracing::info!("Selected model {}", name);
        self.events
            .emit(SyncEvent::SelectionChanged(Some(name.to_string())));
        Ok(())
    }

    /// Put back `previous` if `name` is still the selection
    ///
    /// Used when the backend refused to load a model that was selected
    /// locally. A selection made in the meantime is left alone.
    pub fn revert_selection(&self, name: &str, previous: Option<String>) {
        {
            let mut inner = self.write_inner();
            if inner.selected.as_deref() != Some(name) {
                return;
            }
            let still_valid = previous.as_ref().is_some_and(|prev| {
                inner.entry(prev).is_some_and(|e| e.installed)
            });
            inner.selected = if still_valid { previous } else { None };
        }
        let selected = self.selected();
        tracing::debug!("Selection reverted to {:?}", selected);
        self.events.emit(SyncEvent::SelectionChanged(selected));
    }

    // ========== Install ==========

    /// Install a model and track its progress
    ///
    /// The success/error state is cleared after the configured notice window.
    pub async fn install(&self, name: &str) -> Result<(), SyncError> {
        let epoch = {
            let mut inner = self.write_inner();
            let entry = inner
                .entry(name)
                .ok_or_else(|| SyncError::UnknownModel(name.to_string()))?;
            if entry.installed {
                tracing::debug!("{} is already installed", name);
                return Ok(());
            }
            if inner
                .installs
                .get(name)
                .is_some_and(|slot| slot.state == InstallState::Installing)
            {
                return Err(SyncError::InstallPending(name.to_string()));
            }
            inner.install_epoch += 1;
            let epoch = inner.install_epoch;
            inner.installs.insert(
                name.to_string(),
                InstallSlot {
                    state: InstallState::Installing,
                    epoch,
                },
            );
            epoch
        };
        self.events.emit(SyncEvent::InstallStateChanged {
            name: name.to_string(),
            state: InstallState::Installing,
        });
        tracing::info!("Installing model {}", name);

        let result = self.gateway.install_model(name).await;

        let (state, selection) = {
            let mut inner = self.write_inner();
            // The catalog may have been swapped while the install ran
            let mut held = false;
            let state = match &result {
                Ok(()) => {
                    if let Some(entry) = inner.entries.iter_mut().find(|e| e.name == name) {
                        entry.installed = true;
                        held = true;
                    }
                    InstallState::Success
                }
                Err(e) => InstallState::Error(e.detail().to_string()),
            };
            inner.installs.insert(
                name.to_string(),
                InstallSlot {
                    state: state.clone(),
                    epoch,
                },
            );
            let selection = if held && inner.selected.is_none() {
                inner.selected = Some(name.to_string());
                inner.selected.clone()
            } else {
                None
            };
            (state, selection)
        };

        self.events.emit(SyncEvent::InstallStateChanged {
            name: name.to_string(),
            state,
        });
        if selection.is_some() {
            self.events.emit(SyncEvent::SelectionChanged(selection));
        }
        self.schedule_clear(name.to_string(), epoch);

        match result {
            Ok(()) => {
                tracing::info!("Installed model {}", name);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Install of {} failed: {}", name, e);
                self.events
                    .error(format!("Could not install {}: {}", name, e.detail()));
                Err(e.into())
            }
        }
    }

    fn schedule_clear(&self, name: String, epoch: u64) {
        let store = self.clone();
        let delay = self.install_notice;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.clear_install_state(&name, epoch);
        });
    }

    fn clear_install_state(&self, name: &str, epoch: u64) {
        let cleared = {
            let mut inner = self.write_inner();
            match inner.installs.get(name) {
                Some(slot) if slot.epoch == epoch && slot.state != InstallState::Installing => {
                    inner.installs.remove(name);
                    true
                }
                _ => false,
            }
        };
        if cleared {
            self.events.emit(SyncEvent::InstallStateChanged {
                name: name.to_string(),
                state: InstallState::Idle,
            });
        }
    }

    // ========== Credential ==========

    /// Store the catalog credential server-side, then reload from scratch
    pub async fn set_credential(&self, value: &str) -> Result<usize, SyncError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SyncError::EmptyCredential);
        }

        if let Err(e) = self.gateway.persist_credential(value).await {
            tracing::warn!("Failed to store catalog credential: {}", e);
            self.events
                .error(format!("Could not save token: {}", e.detail()));
            return Err(e.into());
        }

        {
            let mut inner = self.write_inner();
            inner.credential = Some(value.to_string());
            inner.invalidate();
        }
        tracing::info!("Catalog credential updated, reloading");
        self.events.emit(SyncEvent::CatalogChanged {
            len: 0,
            next_offset: 0,
        });
        self.load(0, false).await
    }
}

fn absent_last<T, F>(a: Option<T>, b: Option<T>, cmp: F) -> Ordering
where
    F: Fn(&T, &T) -> Ordering,
{
    match (a, b) {
        (Some(a), Some(b)) => cmp(&a, &b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(all(test, feature = "test-sim"))]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, Op, SimGateway};
    use proptest::prelude::*;

    fn entry(name: &str, installed: bool) -> ModelEntry {
        ModelEntry::new(name, installed)
    }

    fn names(catalog: &ModelCatalog) -> Vec<String> {
        catalog.entries().into_iter().map(|e| e.name).collect()
    }

    fn setup(page_size: usize) -> (Arc<SimGateway>, ModelCatalog) {
        let sim = Arc::new(SimGateway::new());
        let catalog = ModelCatalog::new(sim.clone(), EventSink::disabled())
            .with_page_size(page_size)
            .with_install_notice(Duration::from_millis(20));
        (sim, catalog)
    }

    #[tokio::test]
    async fn first_page_then_overlapping_append() {
        let (sim, catalog) = setup(2);
        sim.queue_page(vec![entry("A", false), entry("B", true)]);
        sim.queue_page(vec![entry("B", true), entry("C", false)]);

        catalog.load(0, false).await.unwrap();
        assert_eq!(names(&catalog), vec!["A", "B"]);
        assert_eq!(catalog.next_offset(), 2);
        assert_eq!(catalog.selected().as_deref(), Some("B"));

        let added = catalog.load(2, true).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(names(&catalog), vec!["A", "B", "C"]);
        assert_eq!(catalog.next_offset(), 3);
        assert_eq!(catalog.selected().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn duplicates_within_a_page_are_dropped() {
        let (sim, catalog) = setup(5);
        sim.queue_page(vec![entry("A", false), entry("A", true), entry("B", false)]);

        catalog.refresh().await.unwrap();
        let entries = catalog.entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].installed);
        assert_eq!(catalog.next_offset(), 2);
    }

    #[tokio::test]
    async fn nothing_installed_means_no_selection() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", false), entry("B", false)]);
        catalog.refresh().await.unwrap();
        assert_eq!(catalog.selected(), None);
    }

    #[tokio::test]
    async fn selection_survives_refresh_while_installed() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", true), entry("B", true)]);
        catalog.refresh().await.unwrap();
        catalog.select("B").unwrap();

        catalog.refresh().await.unwrap();
        assert_eq!(catalog.selected().as_deref(), Some("B"));

        sim.set_catalog(vec![entry("A", true), entry("B", false)]);
        catalog.refresh().await.unwrap();
        assert_eq!(catalog.selected().as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn select_requires_installed_entry() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", true), entry("B", false)]);
        catalog.refresh().await.unwrap();

        assert!(matches!(
            catalog.select("B"),
            Err(SyncError::ModelNotInstalled(_))
        ));
        assert!(matches!(
            catalog.select("Z"),
            Err(SyncError::UnknownModel(_))
        ));
        assert_eq!(catalog.selected().as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn append_from_older_generation_is_discarded() {
        let (sim, catalog) = setup(2);
        sim.set_catalog(vec![
            entry("A", false),
            entry("B", false),
            entry("C", false),
            entry("D", false),
        ]);
        catalog.refresh().await.unwrap();

        let mut gate = sim.hold(Op::ListModels);
        let slow = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.load(2, true).await })
        };
        gate.entered().await;

        sim.set_catalog(vec![entry("X", true)]);
        catalog.refresh().await.unwrap();
        gate.release();

        assert_eq!(slow.await.unwrap().unwrap(), 0);
        assert_eq!(names(&catalog), vec!["X"]);
        assert_eq!(catalog.next_offset(), 1);
    }

    #[tokio::test]
    async fn scroll_is_ignored_while_loading() {
        let (sim, catalog) = setup(2);
        sim.set_catalog(vec![
            entry("A", false),
            entry("B", false),
            entry("C", false),
        ]);
        catalog.refresh().await.unwrap();

        let mut gate = sim.hold(Op::ListModels);
        let first = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.on_scroll_near_end().await })
        };
        gate.entered().await;
        assert!(catalog.is_loading());
        assert_eq!(catalog.on_scroll_near_end().await.unwrap(), None);

        gate.release();
        assert_eq!(first.await.unwrap().unwrap(), Some(1));
        assert_eq!(sim.calls(Op::ListModels), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scroll_triggers_load_one_page() {
        let (sim, catalog) = setup(2);
        sim.set_catalog(vec![
            entry("A", false),
            entry("B", false),
            entry("C", false),
        ]);
        catalog.refresh().await.unwrap();

        let mut gate = sim.hold(Op::ListModels);
        let triggers: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                tokio::spawn(async move { catalog.on_scroll_near_end().await })
            })
            .collect();
        gate.entered().await;
        gate.release();

        let mut loaded = 0;
        for trigger in triggers {
            if trigger.await.unwrap().unwrap().is_some() {
                loaded += 1;
            }
        }
        assert_eq!(loaded, 1);
        assert_eq!(sim.calls(Op::ListModels), 2);
        assert_eq!(names(&catalog), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn scroll_stops_when_exhausted() {
        let (sim, catalog) = setup(2);
        sim.set_catalog(vec![entry("A", false), entry("B", false), entry("C", false)]);
        catalog.refresh().await.unwrap();
        assert_eq!(catalog.on_scroll_near_end().await.unwrap(), Some(1));
        assert!(catalog.is_exhausted());

        assert_eq!(catalog.on_scroll_near_end().await.unwrap(), None);
        assert_eq!(sim.calls(Op::ListModels), 2);
    }

    #[tokio::test]
    async fn scroll_skips_offset_already_merged() {
        let (sim, catalog) = setup(2);
        sim.queue_page(vec![entry("A", false), entry("B", false)]);
        // Full page, but everything in it is already held
        sim.queue_page(vec![entry("A", false), entry("B", false)]);
        catalog.refresh().await.unwrap();

        assert_eq!(catalog.load(2, true).await.unwrap(), 0);
        assert_eq!(catalog.next_offset(), 2);
        assert_eq!(catalog.on_scroll_near_end().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_refresh_clears_catalog() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", true)]);
        catalog.refresh().await.unwrap();

        sim.fail_next(Op::ListModels, GatewayError::Network("refused".into()));
        assert!(catalog.refresh().await.is_err());
        assert!(catalog.is_empty());
        assert_eq!(catalog.next_offset(), 0);
        assert_eq!(catalog.selected(), None);
    }

    #[tokio::test]
    async fn failed_append_keeps_earlier_pages() {
        let (sim, catalog) = setup(2);
        sim.set_catalog(vec![entry("A", true), entry("B", false), entry("C", false)]);
        catalog.refresh().await.unwrap();

        sim.fail_next(Op::ListModels, GatewayError::Network("reset".into()));
        assert!(catalog.on_scroll_near_end().await.is_err());
        assert_eq!(names(&catalog), vec!["A", "B"]);
        assert!(!catalog.is_loading());

        assert_eq!(catalog.on_scroll_near_end().await.unwrap(), Some(1));
        assert_eq!(names(&catalog), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn install_flips_entry_and_clears_state_later() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", false), entry("B", false)]);
        catalog.refresh().await.unwrap();

        let mut gate = sim.hold(Op::InstallModel);
        let task = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.install("B").await })
        };
        gate.entered().await;
        assert_eq!(catalog.install_state("B"), InstallState::Installing);

        let err = catalog.install("B").await.unwrap_err();
        assert!(matches!(err, SyncError::InstallPending(_)));

        gate.release();
        task.await.unwrap().unwrap();
        assert_eq!(catalog.install_state("B"), InstallState::Success);
        assert!(catalog.get("B").unwrap().installed);
        assert!(!catalog.get("A").unwrap().installed);
        assert_eq!(catalog.selected().as_deref(), Some("B"));
        assert_eq!(names(&catalog), vec!["A", "B"]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(catalog.install_state("B"), InstallState::Idle);
    }

    #[tokio::test]
    async fn failed_install_reports_reason() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", false)]);
        catalog.refresh().await.unwrap();

        sim.fail_next(
            Op::InstallModel,
            GatewayError::ServiceError("Insufficient disk space".into()),
        );
        assert!(catalog.install("A").await.is_err());
        assert_eq!(
            catalog.install_state("A"),
            InstallState::Error("Insufficient disk space".into())
        );
        assert!(!catalog.get("A").unwrap().installed);
    }

    #[tokio::test]
    async fn install_finishing_after_catalog_swap_does_not_select() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", false), entry("B", false)]);
        sim.set_catalog_for("tok", vec![entry("gated", false)]);
        catalog.refresh().await.unwrap();

        let mut gate = sim.hold(Op::InstallModel);
        let task = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.install("B").await })
        };
        gate.entered().await;
        catalog.set_credential("tok").await.unwrap();
        assert_eq!(names(&catalog), vec!["gated"]);

        gate.release();
        task.await.unwrap().unwrap();
        assert_eq!(names(&catalog), vec!["gated"]);
        assert_eq!(catalog.selected(), None);
        assert_eq!(catalog.install_state("B"), InstallState::Success);
    }

    #[tokio::test]
    async fn credential_change_reloads_from_scratch() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("public", true)]);
        sim.set_catalog_for("hf_secret", vec![entry("gated", true), entry("public", true)]);
        catalog.refresh().await.unwrap();
        let before = catalog.generation();

        catalog.set_credential(" hf_secret ").await.unwrap();
        assert!(catalog.generation() > before);
        assert_eq!(names(&catalog), vec!["gated", "public"]);
        assert_eq!(sim.stored_credential().as_deref(), Some("hf_secret"));
        assert_eq!(
            sim.last_page_request().unwrap().credential.as_deref(),
            Some("hf_secret")
        );
    }

    #[tokio::test]
    async fn failed_credential_store_keeps_catalog() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![entry("A", true)]);
        catalog.refresh().await.unwrap();

        sim.fail_next(
            Op::PersistCredential,
            GatewayError::ServiceError("read-only".into()),
        );
        assert!(catalog.set_credential("x").await.is_err());
        assert_eq!(names(&catalog), vec!["A"]);
        assert!(matches!(
            catalog.set_credential("  ").await,
            Err(SyncError::EmptyCredential)
        ));
    }

    #[tokio::test]
    async fn sorted_puts_absent_values_last() {
        let (sim, catalog) = setup(5);
        sim.set_catalog(vec![
            entry("b", false).with_size(300),
            entry("a", false),
            entry("c", false).with_size(100).with_parameters("13B"),
            entry("d", false).with_parameters("7B"),
        ]);
        catalog.refresh().await.unwrap();

        let by_size: Vec<_> = catalog
            .sorted(SortKey::Size)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(by_size, vec!["c", "b", "a", "d"]);

        let by_params: Vec<_> = catalog
            .sorted(SortKey::Parameters)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(by_params, vec!["d", "c", "b", "a"]);

        // Projection only
        assert_eq!(names(&catalog), vec!["b", "a", "c", "d"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_append_never_duplicates(
            pages in prop::collection::vec(
                prop::collection::vec(("[a-f]", any::<bool>()), 0..4),
                1..6,
            )
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let (sim, catalog) = setup(3);
                for page in &pages {
                    sim.queue_page(page.iter().map(|(n, i)| entry(n, *i)).collect());
                }

                catalog.load(0, false).await.unwrap();
                for _ in 1..pages.len() {
                    let offset = catalog.next_offset();
                    catalog.load(offset, true).await.unwrap();
                }

                let held = names(&catalog);
                let unique: HashSet<_> = held.iter().collect();
                prop_assert_eq!(unique.len(), held.len());
                prop_assert_eq!(catalog.next_offset(), held.len());

                let expected: HashSet<_> = pages.iter().flatten().map(|(n, _)| n.clone()).collect();
                prop_assert_eq!(unique.len(), expected.len());

                if let Some(selected) = catalog.selected() {
                    prop_assert!(catalog.get(&selected).unwrap().installed);
                }
                Ok(())
            })?;
        }
    }
}
