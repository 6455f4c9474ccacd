use std::time::Duration;

use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::CatalogueError;
use crate::traits::CatalogueService;
use crate::types::{ChapterListResponse, ChapterSummary, SeriesDetail};

/// Manga catalogue REST client.
#[derive(Debug, Clone)]
pub struct CatalogueClient {
    base_url: Url,
    timeout: Duration,
    http: Client,
}

impl CatalogueClient {
    /// Build a client for the API rooted at `base_url` (e.g. `http://localhost:8000/api`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogueError> {
        let base_url =
            Url::parse(base_url).map_err(|e| CatalogueError::BaseUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogueError::BaseUrl(base_url.to_string()));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/series/{slug}/` plus any extra segments, always with a trailing slash.
    fn series_url(&self, slug: &str, extra: &[&str]) -> Result<Url, CatalogueError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogueError::BaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("series")
            .push(slug)
            .extend(extra)
            .push("");
        Ok(url)
    }

    async fn get(&self, url: Url, slug: &str) -> Result<reqwest::Response, CatalogueError> {
        tracing::debug!(%url, "catalogue request");
        let resp = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CatalogueError::Timeout(self.timeout)
            } else {
                CatalogueError::Http(e)
            }
        })?;
        Self::check_response(resp, slug).await
    }

    /// Check the HTTP response for errors and return the body text on failure.
    async fn check_response(
        resp: reqwest::Response,
        slug: &str,
    ) -> Result<reqwest::Response, CatalogueError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogueError::NotFound(slug.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), %slug, "catalogue API error");
        Err(CatalogueError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

impl CatalogueService for CatalogueClient {
    type Error = CatalogueError;

    async fn series_detail(&self, slug: &str) -> Result<SeriesDetail, CatalogueError> {
        let url = self.series_url(slug, &[])?;
        let resp = self.get(url, slug).await?;
        resp.json()
            .await
            .map_err(|e| CatalogueError::Parse(e.to_string()))
    }

    async fn series_chapters(&self, slug: &str) -> Result<Vec<ChapterSummary>, CatalogueError> {
        let url = self.series_url(slug, &["chapters"])?;
        let resp = self.get(url, slug).await?;
        let list: ChapterListResponse = resp
            .json()
            .await
            .map_err(|e| CatalogueError::Parse(e.to_string()))?;
        Ok(list.into_chapters())
    }
}
