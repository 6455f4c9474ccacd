use chrono::{DateTime, Utc};

use crate::error::ShioriError;
use crate::models::{PositionUpdate, ProgressCollection, ProgressRecord};
use crate::schema;
use crate::storage::KeyValueBackend;

/// Key written and deleted by [`ProgressStore::is_available`].
const PROBE_KEY: &str = "__shiori_storage_probe__";

/// Default bound on the number of series kept in the history.
pub const DEFAULT_MAX_ITEMS: usize = 50;

/// The reading history, persisted as one serialized document under one key.
pub struct ProgressStore<B> {
    backend: B,
    key: String,
    max_items: usize,
}

impl<B: KeyValueBackend> ProgressStore<B> {
    pub fn new(backend: B, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            max_items: DEFAULT_MAX_ITEMS,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the backend accepts a write and a delete. Never fails.
    pub fn is_available(&mut self) -> bool {
        let probe = self
            .backend
            .set(PROBE_KEY, PROBE_KEY)
            .and_then(|_| self.backend.remove(PROBE_KEY));
        match probe {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "reading history storage is unavailable");
                false
            }
        }
    }

    /// Read the stored history. Missing, unreadable or corrupt data reads as empty.
    pub fn load(&self) -> ProgressCollection {
        match self.try_load() {
            Ok(collection) => collection,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "discarding stored reading history");
                ProgressCollection::new()
            }
        }
    }

    /// Like [`load`](Self::load) but reports why the history could not be read.
    pub fn try_load(&self) -> Result<ProgressCollection, ShioriError> {
        match self.backend.get(&self.key)? {
            Some(raw) => schema::decode(&raw),
            None => Ok(ProgressCollection::new()),
        }
    }

    /// Starting point for a read-modify-write.
    ///
    /// A corrupt blob is replaced by the write, but any other read failure aborts
    /// it so a transient error never overwrites the stored history.
    fn load_for_write(&self) -> Result<ProgressCollection, ShioriError> {
        match self.try_load() {
            Err(ShioriError::StorageReadCorrupt(reason)) => {
                tracing::warn!(%reason, key = %self.key, "replacing corrupt reading history");
                Ok(ProgressCollection::new())
            }
            other => other,
        }
    }

    /// Overwrite the stored history with `collection` in a single write.
    pub fn save(&mut self, collection: &mut ProgressCollection) -> Result<(), ShioriError> {
        collection.last_updated = Utc::now();
        let raw = schema::encode(collection)?;
        self.backend.set(&self.key, &raw).map_err(into_write_error)
    }

    /// Insert or replace a record, stamped now.
    pub fn upsert(&mut self, record: ProgressRecord) -> Result<ProgressRecord, ShioriError> {
        self.upsert_at(record, Utc::now())
    }

    /// Insert or replace a record, stamped at `now`.
    ///
    /// The percentage is recomputed and `last_read_at` never moves backwards for an
    /// existing record. Records beyond the bound are evicted, least recently read first.
    pub fn upsert_at(
        &mut self,
        mut record: ProgressRecord,
        now: DateTime<Utc>,
    ) -> Result<ProgressRecord, ShioriError> {
        let mut collection = self.load_for_write()?;

        record.refresh_percentage();
        record.last_read_at = match collection.get(&record.manga_id) {
            Some(existing) => existing.last_read_at.max(now),
            None => now,
        };

        collection.upsert(record.clone());
        let evicted = collection.evict_beyond(self.max_items);
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), ?evicted, "evicted least recently read series");
        }

        self.save(&mut collection)?;
        tracing::debug!(
            manga_id = %record.manga_id,
            chapter = record.current_chapter_number,
            page = record.current_page,
            pct = record.progress_percentage,
            "saved reading progress"
        );
        Ok(record)
    }

    /// Move an existing record to a new reading position, stamped now.
    pub fn update_position(&mut self, update: &PositionUpdate) -> Result<ProgressRecord, ShioriError> {
        let collection = self.load_for_write()?;
        let mut record = collection
            .get(&update.manga_id)
            .cloned()
            .ok_or_else(|| ShioriError::NotFound(update.manga_id.clone()))?;
        update.apply_to(&mut record);
        self.upsert(record)
    }

    /// Delete one record. Returns `false` (and writes nothing) if it was not present.
    pub fn remove(&mut self, manga_id: &str) -> Result<bool, ShioriError> {
        let mut collection = self.load_for_write()?;
        if !collection.remove(manga_id) {
            return Ok(false);
        }
        self.save(&mut collection)?;
        tracing::debug!(%manga_id, "removed series from reading history");
        Ok(true)
    }

    /// Delete the whole stored document.
    pub fn clear(&mut self) -> Result<(), ShioriError> {
        self.backend.remove(&self.key).map_err(into_write_error)?;
        tracing::debug!(key = %self.key, "cleared reading history");
        Ok(())
    }

    /// Persist refreshed display metadata for records that are still present.
    ///
    /// Only title, cover and chapter count are taken from `records`; position and
    /// `last_read_at` stay as stored. Returns how many records were updated.
    pub fn merge_metadata(&mut self, records: &[ProgressRecord]) -> Result<usize, ShioriError> {
        let mut collection = self.load_for_write()?;
        let mut updated = 0;
        for refreshed in records {
            if let Some(existing) = collection.get_mut(&refreshed.manga_id) {
                if existing.manga_title != refreshed.manga_title
                    || existing.cover_image != refreshed.cover_image
                    || existing.total_chapters != refreshed.total_chapters
                {
                    existing.merge_metadata(refreshed);
                    updated += 1;
                }
            }
        }
        if updated > 0 {
            self.save(&mut collection)?;
        }
        Ok(updated)
    }
}

/// Anything that goes wrong while writing is reported as a failed write.
fn into_write_error(e: ShioriError) -> ShioriError {
    match e {
        ShioriError::StorageWriteFailed(_) | ShioriError::StorageUnavailable(_) => e,
        other => ShioriError::StorageWriteFailed(other.to_string()),
    }
}
