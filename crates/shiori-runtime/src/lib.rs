//! Async façade over the progress store and the catalogue: the store actor,
//! the reconciler and the continue-reading controller a front end renders from.

mod context;
mod controller;
mod reconcile;
mod store;

use shiori_core::error::ShioriError;

pub use context::{AppContext, StorageLocation};
pub use controller::{ContinueReading, ContinueReadingState};
pub use reconcile::{merge_series, ReconcileReport, Reconciler};
pub use store::StoreHandle;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(ShioriError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store actor closed")]
    Closed,
}

impl From<ShioriError> for RuntimeError {
    fn from(e: ShioriError) -> Self {
        match e {
            ShioriError::Validation(msg) => Self::Validation(msg),
            ShioriError::NotFound(what) => Self::NotFound(what),
            ShioriError::Config(msg) => Self::Config(msg),
            other => Self::Storage(other),
        }
    }
}
