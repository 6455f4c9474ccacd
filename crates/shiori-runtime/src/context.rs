use std::path::PathBuf;
use std::sync::Arc;

use shiori_api::CatalogueClient;
use shiori_core::config::AppConfig;
use shiori_core::storage::{KeyValueBackend, MemoryBackend, SqliteBackend};
use shiori_core::store::ProgressStore;

use crate::controller::ContinueReading;
use crate::reconcile::Reconciler;
use crate::store::StoreHandle;
use crate::RuntimeError;

/// Where the reading history is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageLocation {
    /// `shiori.db` in the platform data directory.
    #[default]
    Default,
    /// A specific SQLite file.
    Path(PathBuf),
    /// Process memory only; nothing is kept after exit.
    Memory,
}

/// Everything a front end needs, built once at startup and passed around.
pub struct AppContext {
    config: AppConfig,
    store: StoreHandle,
    catalogue: Arc<CatalogueClient>,
}

impl AppContext {
    pub fn open(config: AppConfig, location: StorageLocation) -> Result<Self, RuntimeError> {
        let backend: Box<dyn KeyValueBackend> = match location {
            StorageLocation::Default => {
                let path = AppConfig::ensure_db_path()?;
                Box::new(SqliteBackend::open(&path)?)
            }
            StorageLocation::Path(path) => Box::new(SqliteBackend::open(&path)?),
            StorageLocation::Memory => Box::new(MemoryBackend::new()),
        };
        Self::open_with_backend(config, backend)
    }

    /// Like [`open`](Self::open) with a backend the caller already built.
    pub fn open_with_backend<B>(config: AppConfig, backend: B) -> Result<Self, RuntimeError>
    where
        B: KeyValueBackend + 'static,
    {
        config.validate()?;
        let catalogue = CatalogueClient::new(&config.api.base_url, config.api.timeout())
            .map_err(|e| RuntimeError::Config(e.to_string()))?;
        let store = StoreHandle::spawn(
            ProgressStore::new(backend, config.history.storage_key.clone())
                .with_max_items(config.history.max_items),
        )?;
        tracing::debug!(base_url = %config.api.base_url, "application context ready");

        Ok(Self {
            config,
            store,
            catalogue: Arc::new(catalogue),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    /// Build a controller over the shared store and load the saved history.
    pub async fn continue_reading(&self) -> ContinueReading<CatalogueClient> {
        let reconciler = Reconciler::new(self.catalogue.clone(), self.store.clone())
            .with_concurrency(self.config.api.concurrency)
            .with_timeout(self.config.api.timeout());
        let controller = ContinueReading::new(self.store.clone(), reconciler);
        controller.initialize().await;
        controller
    }

    /// Stop the store actor. Controllers built from this context stop working.
    pub async fn shutdown(self) {
        self.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use shiori_core::models::ProgressParams;

    use super::*;

    fn params(id: &str) -> ProgressParams {
        ProgressParams {
            manga_id: id.into(),
            manga_slug: format!("series-{id}"),
            current_chapter_number: 1,
            current_page: 3,
            total_pages_in_chapter: 12,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_controllers_share_the_store() {
        let ctx = AppContext::open(AppConfig::default(), StorageLocation::Memory).unwrap();
        let first = ctx.continue_reading().await;
        first.add_progress(params("1")).await.unwrap();

        let second = ctx.continue_reading().await;
        assert_eq!(second.snapshot().items.len(), 1);

        ctx.shutdown().await;
        assert!(matches!(
            first.add_progress(params("2")).await,
            Err(RuntimeError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_sqlite_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let location = StorageLocation::Path(dir.path().join("shiori.db"));

        let ctx = AppContext::open(AppConfig::default(), location.clone()).unwrap();
        ctx.continue_reading()
            .await
            .add_progress(params("1"))
            .await
            .unwrap();
        ctx.shutdown().await;

        let ctx = AppContext::open(AppConfig::default(), location).unwrap();
        let items = ctx.continue_reading().await.snapshot().items;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].progress_percentage, 25);
    }

    #[test]
    fn test_bad_base_url_is_a_config_error() {
        let mut config = AppConfig::default();
        config.api.base_url = "not a url".into();
        assert!(matches!(
            AppContext::open(config, StorageLocation::Memory),
            Err(RuntimeError::Config(_))
        ));
    }
}
