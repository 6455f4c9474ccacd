use thiserror::Error;

/// Errors from the catalogue API client.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("series not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid base URL: {0}")]
    BaseUrl(String),
}

impl CatalogueError {
    /// Whether the series is known to be gone, as opposed to a transient failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
