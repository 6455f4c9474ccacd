use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ShioriError;
use crate::schema::de;

/// How far the user has read into one series.
///
/// Serialized with camelCase keys so blobs written by the web reader stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub manga_id: String,
    #[serde(default)]
    pub manga_title: String,
    #[serde(default)]
    pub manga_slug: String,
    #[serde(default)]
    pub cover_image: String,
    #[serde(
        default = "first_chapter",
        deserialize_with = "de::chapter_lenient"
    )]
    pub current_chapter_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chapter_title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de::opt_string_from_str_or_num"
    )]
    pub current_chapter_id: Option<String>,
    #[serde(default, deserialize_with = "de::u32_lenient")]
    pub current_page: u32,
    #[serde(default, deserialize_with = "de::u32_lenient")]
    pub total_pages_in_chapter: u32,
    #[serde(default, deserialize_with = "de::u32_lenient")]
    pub total_chapters: u32,
    #[serde(default)]
    pub last_read_at: DateTime<Utc>,
    /// Derived from `current_page` / `total_pages_in_chapter`; recomputed on every write and load.
    #[serde(default)]
    pub progress_percentage: u8,
}

fn first_chapter() -> u32 {
    1
}

/// Page progress within a chapter, 0-100.
pub fn progress_percentage(current_page: u32, total_pages_in_chapter: u32) -> u8 {
    if total_pages_in_chapter == 0 {
        return 0;
    }
    let pct = (f64::from(current_page) / f64::from(total_pages_in_chapter) * 100.0).round();
    pct.min(100.0) as u8
}

impl ProgressRecord {
    /// Recompute the derived percentage from the page fields.
    pub fn refresh_percentage(&mut self) {
        self.progress_percentage = progress_percentage(self.current_page, self.total_pages_in_chapter);
    }

    /// Stamp the record as read at `now`, never moving `last_read_at` backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_read_at = self.last_read_at.max(now);
    }

    /// Deep link the home page card opens.
    pub fn resume_path(&self) -> String {
        match self.current_chapter_id.as_deref() {
            Some(chapter_id) if !chapter_id.is_empty() => {
                format!("/read/{chapter_id}/{}", self.current_page.max(1))
            }
            _ => format!("/manga/{}", self.manga_id),
        }
    }

    /// Overwrite the descriptive fields from `other`, leaving the reading position alone.
    pub fn merge_metadata(&mut self, other: &ProgressRecord) {
        self.manga_title = other.manga_title.clone();
        self.cover_image = other.cover_image.clone();
        self.total_chapters = other.total_chapters;
        self.refresh_percentage();
    }
}

/// Input for registering or advancing a series in the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub manga_id: String,
    pub manga_title: String,
    pub manga_slug: String,
    pub cover_image: String,
    pub current_chapter_number: u32,
    pub current_chapter_title: Option<String>,
    pub current_chapter_id: Option<String>,
    pub current_page: u32,
    pub total_pages_in_chapter: u32,
    pub total_chapters: u32,
}

impl ProgressParams {
    pub fn validate(&self) -> Result<(), ShioriError> {
        validate_position(
            &self.manga_id,
            self.current_chapter_number,
            self.current_page,
        )
    }

    /// Build a record stamped at `now`. The caller is expected to have validated.
    pub fn into_record(self, now: DateTime<Utc>) -> ProgressRecord {
        let mut record = ProgressRecord {
            manga_id: self.manga_id,
            manga_title: self.manga_title,
            manga_slug: self.manga_slug,
            cover_image: self.cover_image,
            current_chapter_number: self.current_chapter_number,
            current_chapter_title: self.current_chapter_title,
            current_chapter_id: self.current_chapter_id,
            current_page: self.current_page,
            total_pages_in_chapter: self.total_pages_in_chapter,
            total_chapters: self.total_chapters,
            last_read_at: now,
            progress_percentage: 0,
        };
        record.refresh_percentage();
        record
    }
}

/// Position update sent by the reader for a series already in the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub manga_id: String,
    pub current_chapter_number: u32,
    pub current_page: u32,
    pub total_pages_in_chapter: Option<u32>,
    pub total_chapters: Option<u32>,
    pub current_chapter_title: Option<String>,
    pub current_chapter_id: Option<String>,
}

impl PositionUpdate {
    pub fn validate(&self) -> Result<(), ShioriError> {
        validate_position(
            &self.manga_id,
            self.current_chapter_number,
            self.current_page,
        )
    }

    /// Apply the new position to `record`. Fields left as `None` keep their stored value.
    pub fn apply_to(&self, record: &mut ProgressRecord) {
        record.current_chapter_number = self.current_chapter_number;
        record.current_page = self.current_page;
        if let Some(total) = self.total_pages_in_chapter {
            record.total_pages_in_chapter = total;
        }
        if let Some(total) = self.total_chapters {
            record.total_chapters = total;
        }
        if self.current_chapter_title.is_some() {
            record.current_chapter_title = self.current_chapter_title.clone();
        }
        if self.current_chapter_id.is_some() {
            record.current_chapter_id = self.current_chapter_id.clone();
        }
        record.refresh_percentage();
    }
}

fn validate_position(manga_id: &str, chapter: u32, page: u32) -> Result<(), ShioriError> {
    if manga_id.trim().is_empty() {
        return Err(ShioriError::Validation("manga id is required".into()));
    }
    if chapter == 0 {
        return Err(ShioriError::Validation(format!(
            "chapter number must be at least 1 (manga {manga_id})"
        )));
    }
    if page == 0 {
        return Err(ShioriError::Validation(format!(
            "page must be at least 1 (manga {manga_id})"
        )));
    }
    Ok(())
}

/// The whole reading history, keyed by `manga_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCollection {
    pub items: Vec<ProgressRecord>,
    pub last_updated: DateTime<Utc>,
}

impl Default for ProgressCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCollection {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, manga_id: &str) -> Option<&ProgressRecord> {
        self.items.iter().find(|r| r.manga_id == manga_id)
    }

    pub fn get_mut(&mut self, manga_id: &str) -> Option<&mut ProgressRecord> {
        self.items.iter_mut().find(|r| r.manga_id == manga_id)
    }

    /// Replace the record with the same id in place, or append it.
    pub fn upsert(&mut self, record: ProgressRecord) {
        match self.get_mut(&record.manga_id) {
            Some(existing) => *existing = record,
            None => self.items.push(record),
        }
    }

    /// Returns `true` if a record was removed.
    pub fn remove(&mut self, manga_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|r| r.manga_id != manga_id);
        self.items.len() != before
    }

    /// Sort most recently read first.
    pub fn sort_by_recent(&mut self) {
        self.items.sort_by(|a, b| b.last_read_at.cmp(&a.last_read_at));
    }

    /// Drop the least recently read records beyond `max_items`, returning their ids.
    pub fn evict_beyond(&mut self, max_items: usize) -> Vec<String> {
        if self.items.len() <= max_items {
            return Vec::new();
        }
        self.sort_by_recent();
        self.items
            .split_off(max_items)
            .into_iter()
            .map(|r| r.manga_id)
            .collect()
    }

    /// Items ordered for display, most recently read first.
    pub fn into_recent(mut self) -> Vec<ProgressRecord> {
        self.sort_by_recent();
        self.items
    }
}
