use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;

use shiori_api::traits::CatalogueService;
use shiori_core::error::ShioriError;
use shiori_core::models::{PositionUpdate, ProgressParams, ProgressRecord};

use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::StoreHandle;
use crate::RuntimeError;

const UNAVAILABLE: &str = "Reading history storage is not available";

/// What a "continue reading" view renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContinueReadingState {
    /// Most recently read first.
    pub items: Vec<ProgressRecord>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct Inner {
    view: ContinueReadingState,
    /// Loads and refreshes currently running.
    in_flight: usize,
    /// Bumped by every refresh; only the newest one may publish.
    generation: u64,
}

/// Holds the reading history for display and applies user actions to it.
///
/// State lives behind a plain `RwLock` that is only taken between awaits.
pub struct ContinueReading<S> {
    store: StoreHandle,
    reconciler: Reconciler<S>,
    inner: RwLock<Inner>,
    available: AtomicBool,
}

/// Marks the controller as loading for as long as it is alive.
struct LoadingGuard<'a> {
    inner: &'a RwLock<Inner>,
}

impl<'a> LoadingGuard<'a> {
    fn new(inner: &'a RwLock<Inner>) -> Self {
        let mut state = inner.write().unwrap_or_else(PoisonError::into_inner);
        state.in_flight += 1;
        state.view.is_loading = true;
        Self { inner }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.view.is_loading = state.in_flight > 0;
    }
}

impl<S: CatalogueService> ContinueReading<S> {
    pub fn new(store: StoreHandle, reconciler: Reconciler<S>) -> Self {
        Self {
            store,
            reconciler,
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Current state, for rendering.
    pub fn snapshot(&self) -> ContinueReadingState {
        self.read(|inner| inner.view.clone())
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Probe the storage and load the saved history.
    ///
    /// When storage cannot be used the error is recorded, the list stays empty
    /// and every later action is refused.
    pub async fn initialize(&self) {
        let _loading = LoadingGuard::new(&self.inner);

        let available = match self.store.is_available().await {
            Ok(available) => available,
            Err(e) => {
                tracing::error!(error = %e, "failed to probe reading history storage");
                false
            }
        };
        self.available.store(available, Ordering::SeqCst);

        if !available {
            self.write(|inner| {
                inner.view.items.clear();
                inner.view.error = Some(UNAVAILABLE.into());
            });
            return;
        }

        match self.store.load().await {
            Ok(collection) => self.write(|inner| {
                inner.view.items = collection.into_recent();
                inner.view.error = None;
            }),
            Err(e) => self.fail("Failed to load reading history", &e),
        }
    }

    /// Record progress for a series, inserting it or replacing its record.
    pub async fn add_progress(&self, params: ProgressParams) -> Result<ProgressRecord, RuntimeError> {
        const FAILED: &str = "Failed to save reading progress";
        self.ensure_available()?;
        let result = match params.validate() {
            Ok(()) => self.store.upsert(params.into_record(Utc::now())).await,
            Err(e) => Err(e.into()),
        };
        let record = self.after_mutation(result, FAILED).await?;
        tracing::info!(manga_id = %record.manga_id, pct = record.progress_percentage, "progress saved");
        Ok(record)
    }

    /// Move a series already in the history to a new position.
    pub async fn update_progress(
        &self,
        update: PositionUpdate,
    ) -> Result<ProgressRecord, RuntimeError> {
        const FAILED: &str = "Failed to update reading progress";
        self.ensure_available()?;
        let result = match update.validate() {
            Ok(()) => self.store.update_position(update).await,
            Err(e) => Err(e.into()),
        };
        self.after_mutation(result, FAILED).await
    }

    /// Drop one series. Returns whether it was present.
    pub async fn remove_item(&self, manga_id: &str) -> Result<bool, RuntimeError> {
        self.ensure_available()?;
        let result = self.store.remove(manga_id).await;
        self.after_mutation(result, "Failed to remove item").await
    }

    /// Forget the whole history.
    pub async fn clear_all(&self) -> Result<(), RuntimeError> {
        self.ensure_available()?;
        match self.store.clear().await {
            Ok(()) => {
                self.write(|inner| {
                    inner.view.items.clear();
                    inner.view.error = None;
                });
                tracing::info!("reading history cleared");
                Ok(())
            }
            Err(e) => {
                self.fail("Failed to clear reading history", &e);
                Err(e)
            }
        }
    }

    /// Check every record against the catalogue, prune the missing ones and
    /// persist refreshed titles, covers and chapter counts.
    ///
    /// If another refresh starts before this one finishes, this one's result is
    /// not published; the returned report still describes what it did.
    pub async fn refresh_data(&self) -> Result<ReconcileReport, RuntimeError> {
        self.ensure_available()?;
        let _loading = LoadingGuard::new(&self.inner);
        let generation = self.write(|inner| {
            inner.generation += 1;
            inner.generation
        });

        let result = self.run_refresh(generation).await;
        match &result {
            Ok(_) => {}
            Err(e) if self.is_current(generation) => {
                self.fail("Failed to refresh reading history", e)
            }
            Err(e) => tracing::debug!(error = %e, "superseded refresh failed"),
        }
        result
    }

    async fn run_refresh(&self, generation: u64) -> Result<ReconcileReport, RuntimeError> {
        let collection = self.store.load().await?;
        if collection.is_empty() {
            self.publish(generation, Vec::new());
            return Ok(ReconcileReport::default());
        }

        let report = self.reconciler.reconcile(collection.into_recent()).await;
        if !self.is_current(generation) {
            tracing::debug!(generation, "discarding superseded refresh");
            return Ok(report);
        }

        let items = match self.store.merge_metadata(report.items.clone()).await {
            Ok(updated) => {
                tracing::debug!(updated, "refreshed metadata saved");
                // Picks up anything added or removed while the lookups ran.
                // A pruned series stays hidden even if deleting it failed.
                self.store
                    .load()
                    .await?
                    .into_recent()
                    .into_iter()
                    .filter(|r| !report.pruned.contains(&r.manga_id))
                    .collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to save refreshed metadata");
                report.items.clone()
            }
        };
        self.publish(generation, items);
        Ok(report)
    }

    fn publish(&self, generation: u64, items: Vec<ProgressRecord>) {
        self.write(|inner| {
            if inner.generation == generation {
                inner.view.items = items;
                inner.view.error = None;
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.read(|inner| inner.generation == generation)
    }

    fn ensure_available(&self) -> Result<(), RuntimeError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(RuntimeError::Storage(ShioriError::StorageUnavailable(
                UNAVAILABLE.into(),
            )))
        }
    }

    /// Reload the list after a successful write, or record the failure and keep it.
    async fn after_mutation<T>(
        &self,
        result: Result<T, RuntimeError>,
        failed: &str,
    ) -> Result<T, RuntimeError> {
        match result {
            Ok(value) => {
                let collection = self.store.load().await?;
                self.write(|inner| {
                    inner.view.items = collection.into_recent();
                    inner.view.error = None;
                });
                Ok(value)
            }
            Err(e) => {
                self.fail(failed, &e);
                Err(e)
            }
        }
    }

    fn fail(&self, message: &str, error: &RuntimeError) {
        tracing::error!(%error, "{message}");
        self.write(|inner| inner.view.error = Some(format!("{message}: {error}")));
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use shiori_api::types::{ChapterSummary, SeriesDetail};
    use shiori_api::CatalogueError;
    use shiori_core::storage::{KeyValueBackend, MemoryBackend};
    use shiori_core::store::ProgressStore;

    use super::*;

    const KEY: &str = "continueReading";

    /// Titles and delays are read when a lookup starts, so a test can change
    /// them between overlapping refreshes.
    struct FakeCatalogue {
        title: Mutex<String>,
        delay: Mutex<Duration>,
        missing: Mutex<HashSet<String>>,
    }

    impl Default for FakeCatalogue {
        fn default() -> Self {
            Self {
                title: Mutex::new("Fresh".into()),
                delay: Mutex::new(Duration::ZERO),
                missing: Mutex::new(HashSet::new()),
            }
        }
    }

    impl CatalogueService for FakeCatalogue {
        type Error = CatalogueError;

        async fn series_detail(&self, slug: &str) -> Result<SeriesDetail, CatalogueError> {
            let title = self.title.lock().unwrap().clone();
            let delay = *self.delay.lock().unwrap();
            let missing = self.missing.lock().unwrap().contains(slug);
            tokio::time::sleep(delay).await;
            if missing {
                return Err(CatalogueError::NotFound(slug.into()));
            }
            Ok(SeriesDetail {
                id: 1,
                title,
                slug: slug.into(),
                description: None,
                cover_url: None,
                status: None,
                chapter_count: Some(30),
                chapters: None,
                updated_at: None,
            })
        }

        async fn series_chapters(&self, _slug: &str) -> Result<Vec<ChapterSummary>, CatalogueError> {
            Ok(Vec::new())
        }
    }

    fn controller_with<B: KeyValueBackend + 'static>(
        backend: B,
        catalogue: Arc<FakeCatalogue>,
    ) -> ContinueReading<FakeCatalogue> {
        let store = StoreHandle::spawn(ProgressStore::new(backend, KEY)).unwrap();
        let reconciler = Reconciler::new(catalogue, store.clone());
        ContinueReading::new(store, reconciler)
    }

    async fn ready(backend: MemoryBackend) -> ContinueReading<FakeCatalogue> {
        let c = controller_with(backend, Arc::new(FakeCatalogue::default()));
        c.initialize().await;
        c
    }

    fn params(id: &str, chapter: u32, page: u32, total: u32) -> ProgressParams {
        ProgressParams {
            manga_id: id.into(),
            manga_title: format!("Series {id}"),
            manga_slug: format!("series-{id}"),
            cover_image: format!("/media/covers/{id}.jpg"),
            current_chapter_number: chapter,
            current_page: page,
            total_pages_in_chapter: total,
            total_chapters: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_progress_replaces_previous_record() {
        let c = ready(MemoryBackend::new()).await;

        let first = c.add_progress(params("42", 3, 5, 20)).await.unwrap();
        assert_eq!(first.progress_percentage, 25);

        let second = c.add_progress(params("42", 3, 10, 20)).await.unwrap();
        assert_eq!(second.progress_percentage, 50);

        let state = c.snapshot();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].progress_percentage, 50);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_items_sorted_most_recent_first() {
        let c = ready(MemoryBackend::new()).await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        c.add_progress(params("2", 1, 1, 10)).await.unwrap();

        let ids: Vec<_> = c
            .snapshot()
            .items
            .into_iter()
            .map(|r| r.manga_id)
            .collect();
        assert_eq!(ids, ["2", "1"]);
    }

    #[tokio::test]
    async fn test_invalid_progress_is_rejected() {
        let c = ready(MemoryBackend::new()).await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();

        let err = c.add_progress(params("", 1, 1, 10)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(_)));
        assert!(c.add_progress(params("2", 0, 1, 10)).await.is_err());

        let state = c.snapshot();
        assert_eq!(state.items.len(), 1);
        assert!(state
            .error
            .unwrap()
            .starts_with("Failed to save reading progress"));
    }

    #[tokio::test]
    async fn test_update_progress_keeps_display_data() {
        let c = ready(MemoryBackend::new()).await;
        c.add_progress(params("42", 3, 5, 20)).await.unwrap();

        let update = PositionUpdate {
            manga_id: "42".into(),
            current_chapter_number: 4,
            current_page: 18,
            total_pages_in_chapter: Some(24),
            total_chapters: Some(10),
            ..Default::default()
        };
        let saved = c.update_progress(update).await.unwrap();
        assert_eq!(saved.progress_percentage, 75);
        assert_eq!(saved.manga_title, "Series 42");

        let unknown = PositionUpdate {
            manga_id: "7".into(),
            current_chapter_number: 1,
            current_page: 1,
            ..Default::default()
        };
        assert!(matches!(
            c.update_progress(unknown).await,
            Err(RuntimeError::NotFound(_))
        ));
        let state = c.snapshot();
        assert_eq!(state.items.len(), 1);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_remove_item() {
        let c = ready(MemoryBackend::new()).await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();
        c.add_progress(params("2", 1, 1, 10)).await.unwrap();

        assert!(c.remove_item("1").await.unwrap());
        assert!(!c.remove_item("1").await.unwrap());

        let state = c.snapshot();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].manga_id, "2");
        assert!(c.store.load().await.unwrap().get("1").is_none());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let c = ready(MemoryBackend::new()).await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();
        c.clear_all().await.unwrap();

        assert!(c.snapshot().items.is_empty());
        assert!(c.store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_storage_reads_empty_without_error() {
        let mut backend = MemoryBackend::new();
        backend.set(KEY, "{{{ not json").unwrap();
        let c = ready(backend).await;

        let state = c.snapshot();
        assert!(state.items.is_empty());
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_unavailable_storage() {
        let c = ready(MemoryBackend::disabled()).await;

        let state = c.snapshot();
        assert!(state.items.is_empty());
        assert!(!state.is_loading);
        assert_eq!(state.error.as_deref(), Some(UNAVAILABLE));

        assert!(c.add_progress(params("1", 1, 1, 10)).await.is_err());
        assert!(c.refresh_data().await.is_err());
        assert_eq!(c.snapshot().error.as_deref(), Some(UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_items() {
        let c = ready(MemoryBackend::with_quota(700)).await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();

        let mut big = params("2", 1, 1, 10);
        big.manga_title = "x".repeat(1000);
        let err = c.add_progress(big).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Storage(ShioriError::StorageWriteFailed(_))
        ));

        let state = c.snapshot();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].manga_id, "1");
        assert!(state.error.is_some());

        // The next successful write clears the error.
        c.add_progress(params("1", 1, 2, 10)).await.unwrap();
        assert!(c.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_refresh_prunes_and_persists_metadata() {
        let catalogue = Arc::new(FakeCatalogue::default());
        catalogue
            .missing
            .lock()
            .unwrap()
            .insert("series-2".into());
        let c = controller_with(MemoryBackend::new(), catalogue);
        c.initialize().await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();
        c.add_progress(params("2", 1, 1, 10)).await.unwrap();

        let report = c.refresh_data().await.unwrap();
        assert_eq!(report.pruned, ["2"]);

        let state = c.snapshot();
        assert!(!state.is_loading);
        assert!(state.error.is_none());
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].manga_title, "Fresh");
        assert_eq!(state.items[0].total_chapters, 30);

        let stored = c.store.load().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.get("1").unwrap().manga_title, "Fresh");
    }

    /// Refuses writes once `frozen` is set.
    struct FreezableBackend {
        inner: MemoryBackend,
        frozen: Arc<AtomicBool>,
    }

    impl KeyValueBackend for FreezableBackend {
        fn get(&self, key: &str) -> Result<Option<String>, ShioriError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), ShioriError> {
            if self.frozen.load(Ordering::SeqCst) {
                return Err(ShioriError::StorageWriteFailed("disk full".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), ShioriError> {
            if self.frozen.load(Ordering::SeqCst) {
                return Err(ShioriError::StorageWriteFailed("disk full".into()));
            }
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_failed_prune_stays_hidden() {
        let frozen = Arc::new(AtomicBool::new(false));
        let backend = FreezableBackend {
            inner: MemoryBackend::new(),
            frozen: frozen.clone(),
        };
        let catalogue = Arc::new(FakeCatalogue::default());
        let c = controller_with(backend, catalogue.clone());
        c.initialize().await;

        // Already matches the catalogue, so the metadata merge has nothing to write.
        for id in ["1", "2"] {
            let mut p = params(id, 1, 1, 10);
            p.manga_title = "Fresh".into();
            p.total_chapters = 30;
            c.add_progress(p).await.unwrap();
        }
        catalogue
            .missing
            .lock()
            .unwrap()
            .insert("series-2".into());
        frozen.store(true, Ordering::SeqCst);

        let report = c.refresh_data().await.unwrap();
        assert_eq!(report.pruned, ["2"]);

        let state = c.snapshot();
        assert!(state.error.is_none());
        let ids: Vec<_> = state.items.iter().map(|r| r.manga_id.as_str()).collect();
        assert_eq!(ids, ["1"]);
        assert!(c.store.load().await.unwrap().get("2").is_some());
    }

    #[tokio::test]
    async fn test_newest_refresh_wins() {
        let catalogue = Arc::new(FakeCatalogue::default());
        *catalogue.title.lock().unwrap() = "Old".into();
        *catalogue.delay.lock().unwrap() = Duration::from_millis(300);

        let c = Arc::new(controller_with(MemoryBackend::new(), catalogue.clone()));
        c.initialize().await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();

        let slow = tokio::spawn({
            let c = c.clone();
            async move { c.refresh_data().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(c.snapshot().is_loading);

        *catalogue.title.lock().unwrap() = "New".into();
        *catalogue.delay.lock().unwrap() = Duration::ZERO;
        c.refresh_data().await.unwrap();
        // The slow refresh is still running.
        assert!(c.snapshot().is_loading);

        let stale = slow.await.unwrap().unwrap();
        assert_eq!(stale.items[0].manga_title, "Old");

        let state = c.snapshot();
        assert!(!state.is_loading);
        assert_eq!(state.items[0].manga_title, "New");
        assert_eq!(
            c.store.load().await.unwrap().get("1").unwrap().manga_title,
            "New"
        );
    }

    #[tokio::test]
    async fn test_loading_cleared_when_refresh_fails() {
        let c = ready(MemoryBackend::new()).await;
        c.add_progress(params("1", 1, 1, 10)).await.unwrap();
        c.store.shutdown().await;

        let err = c.refresh_data().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Closed));

        let state = c.snapshot();
        assert!(!state.is_loading);
        assert!(state
            .error
            .unwrap()
            .starts_with("Failed to refresh reading history"));
        assert_eq!(state.items.len(), 1);
    }
}
