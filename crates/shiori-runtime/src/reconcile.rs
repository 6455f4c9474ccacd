use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use shiori_api::traits::CatalogueService;
use shiori_api::types::{ChapterSummary, SeriesDetail};
use shiori_core::models::ProgressRecord;

use crate::store::StoreHandle;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Surviving records with refreshed metadata, most recently read first.
    pub items: Vec<ProgressRecord>,
    /// Ids whose series was found.
    pub refreshed: Vec<String>,
    /// Ids dropped because their series could not be confirmed.
    pub pruned: Vec<String>,
}

enum Outcome {
    Refreshed(ProgressRecord),
    Pruned { record: ProgressRecord, reason: String },
}

/// Checks stored records against the catalogue and drops the ones that are gone.
pub struct Reconciler<S> {
    catalogue: Arc<S>,
    store: StoreHandle,
    concurrency: usize,
    timeout: Duration,
}

impl<S: CatalogueService> Reconciler<S> {
    pub fn new(catalogue: Arc<S>, store: StoreHandle) -> Self {
        Self {
            catalogue,
            store,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upper bound for both lookups of one record together.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refresh every record from the catalogue.
    ///
    /// A record whose lookups fail for any reason, including a timeout, is removed
    /// from the store and left out of the result. One failure never affects the
    /// other records.
    pub async fn reconcile(&self, records: Vec<ProgressRecord>) -> ReconcileReport {
        let outcomes: Vec<Outcome> = stream::iter(records)
            .map(|record| self.check(record))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ReconcileReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Refreshed(record) => {
                    report.refreshed.push(record.manga_id.clone());
                    report.items.push(record);
                }
                Outcome::Pruned { record, reason } => {
                    tracing::warn!(
                        manga_id = %record.manga_id,
                        slug = %record.manga_slug,
                        %reason,
                        "series could not be confirmed, removing from reading history"
                    );
                    if let Err(e) = self.store.remove(&record.manga_id).await {
                        tracing::warn!(manga_id = %record.manga_id, error = %e, "failed to prune series");
                    }
                    report.pruned.push(record.manga_id);
                }
            }
        }

        report
            .items
            .sort_by(|a, b| b.last_read_at.cmp(&a.last_read_at));
        tracing::info!(
            refreshed = report.refreshed.len(),
            pruned = report.pruned.len(),
            "reading history reconciled"
        );
        report
    }

    async fn check(&self, record: ProgressRecord) -> Outcome {
        let slug = record.manga_slug.clone();
        let lookups = async {
            let detail = self.catalogue.series_detail(&slug).await?;
            let chapters = self.catalogue.series_chapters(&slug).await?;
            Ok::<_, S::Error>((detail, chapters))
        };

        match tokio::time::timeout(self.timeout, lookups).await {
            Ok(Ok((detail, chapters))) => {
                Outcome::Refreshed(merge_series(record, &detail, &chapters))
            }
            Ok(Err(e)) => Outcome::Pruned {
                record,
                reason: e.to_string(),
            },
            Err(_) => Outcome::Pruned {
                record,
                reason: format!("timed out after {:?}", self.timeout),
            },
        }
    }
}

/// Take display metadata from the catalogue, keeping the reading position.
///
/// The chapter count comes from the chapter list, then the series' own count,
/// then the stored value; zero counts as missing at each step.
pub fn merge_series(
    mut record: ProgressRecord,
    detail: &SeriesDetail,
    chapters: &[ChapterSummary],
) -> ProgressRecord {
    if !detail.title.is_empty() {
        record.manga_title = detail.title.clone();
    }
    if let Some(cover) = detail.cover_url.as_deref().filter(|c| !c.is_empty()) {
        record.cover_image = cover.to_string();
    }
    let listed = u32::try_from(chapters.len()).unwrap_or(u32::MAX);
    record.total_chapters = Some(listed)
        .filter(|&n| n > 0)
        .or_else(|| detail.reported_chapter_count().filter(|&n| n > 0))
        .unwrap_or(record.total_chapters);
    record.refresh_percentage();
    record
}
