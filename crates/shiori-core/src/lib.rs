pub mod config;
pub mod error;
pub mod models;
pub mod schema;
pub mod storage;
pub mod store;
