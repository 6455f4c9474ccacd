use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ShioriError;

const SCHEMA_V1: &str = include_str!("../../../migrations/001_kv_store.sql");

/// Durable string key-value storage, the shape of a browser's `localStorage`.
pub trait KeyValueBackend: Send {
    fn get(&self, key: &str) -> Result<Option<String>, ShioriError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), ShioriError>;
    fn remove(&mut self, key: &str) -> Result<(), ShioriError>;
}

impl<B: KeyValueBackend + ?Sized> KeyValueBackend for Box<B> {
    fn get(&self, key: &str) -> Result<Option<String>, ShioriError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ShioriError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), ShioriError> {
        (**self).remove(key)
    }
}

// ── SQLite ──────────────────────────────────────────────────────

/// SQLite-backed key-value storage.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, ShioriError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, ShioriError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }
}

impl KeyValueBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>, ShioriError> {
        self.conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ShioriError> {
        self.conn
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .map_err(|e| ShioriError::StorageWriteFailed(e.to_string()))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), ShioriError> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(|e| ShioriError::StorageWriteFailed(e.to_string()))?;
        Ok(())
    }
}

// ── In-memory ───────────────────────────────────────────────────

/// Process-local storage. Nothing survives the process.
///
/// An optional quota (total bytes of keys and values) makes writes fail the way a
/// full browser storage does.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<String, String>,
    quota_bytes: Option<usize>,
    disabled: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// A backend that rejects every operation, like storage disabled by the host.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn check_enabled(&self) -> Result<(), ShioriError> {
        if self.disabled {
            Err(ShioriError::StorageUnavailable("storage is disabled".into()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, ShioriError> {
        self.check_enabled()?;
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ShioriError> {
        self.check_enabled()?;
        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes_without(key) + key.len() + value.len();
            if needed > quota {
                return Err(ShioriError::StorageWriteFailed(format!(
                    "quota exceeded ({needed} > {quota} bytes)"
                )));
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), ShioriError> {
        self.check_enabled()?;
        self.entries.remove(key);
        Ok(())
    }
}

// ── Migrations ──────────────────────────────────────────────────

/// Run schema migrations using `PRAGMA user_version` for version tracking.
fn run_migrations(conn: &Connection) -> Result<(), ShioriError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}
