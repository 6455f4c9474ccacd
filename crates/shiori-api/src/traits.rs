//! Trait definitions for the catalogue collaborator.
//!
//! The HTTP client implements this; the reconciler only depends on the trait,
//! so it can be driven by an in-process fake.

use std::future::Future;

use crate::types::{ChapterSummary, SeriesDetail};

/// Read access to the authoritative manga catalogue.
pub trait CatalogueService: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up a series by slug. A missing series is an error.
    fn series_detail(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<SeriesDetail, Self::Error>> + Send;

    /// List the approved chapters of a series.
    fn series_chapters(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Vec<ChapterSummary>, Self::Error>> + Send;
}
