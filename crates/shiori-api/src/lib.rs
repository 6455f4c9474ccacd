//! Client for the manga catalogue REST API.

pub mod client;
pub mod error;
pub mod traits;
pub mod types;

pub use client::CatalogueClient;
pub use error::CatalogueError;
pub use traits::CatalogueService;
