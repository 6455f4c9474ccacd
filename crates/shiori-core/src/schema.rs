//! Persisted format of the reading history.
//!
//! The history is one JSON document stored under a single key:
//!
//! ```json
//! { "version": 2, "items": [ ... ], "lastUpdated": "2026-10-19T08:00:00Z" }
//! ```
//!
//! Older web clients wrote an unversioned document, sometimes wrapped as
//! `{ "continueReading": { ... } }`, and used `currentChapter` for the chapter
//! number. [`decode`] migrates those shapes once at load time so nothing past
//! this module has to care about optional or renamed fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ShioriError;
use crate::models::{ProgressCollection, ProgressRecord};

/// Version written by [`encode`].
pub const SCHEMA_VERSION: u32 = 2;

/// Wrapper key used by the first web client.
const LEGACY_WRAPPER_KEY: &str = "continueReading";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredCollection<'a> {
    version: u32,
    items: &'a [ProgressRecord],
    last_updated: DateTime<Utc>,
}

/// Serialize a collection at the current schema version.
pub fn encode(collection: &ProgressCollection) -> Result<String, ShioriError> {
    let stored = StoredCollection {
        version: SCHEMA_VERSION,
        items: &collection.items,
        last_updated: collection.last_updated,
    };
    Ok(serde_json::to_string(&stored)?)
}

/// Parse and migrate a stored document.
///
/// Fails with [`ShioriError::StorageReadCorrupt`] only when the document as a whole
/// is unusable. Individual items that cannot be read are skipped.
pub fn decode(raw: &str) -> Result<ProgressCollection, ShioriError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| corrupt(e.to_string()))?;
    let mut obj = match unwrap_legacy(value) {
        Value::Object(obj) => obj,
        other => return Err(corrupt(format!("expected an object, found {}", kind(&other)))),
    };

    let version = obj
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(1);
    if version > SCHEMA_VERSION {
        tracing::warn!(version, "reading history written by a newer version, reading best effort");
    }

    let raw_items = match obj.remove("items") {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => Vec::new(),
        Some(other) => return Err(corrupt(format!("items is {}, not an array", kind(&other)))),
    };

    let last_updated = obj
        .get("lastUpdated")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut collection = ProgressCollection {
        items: Vec::with_capacity(raw_items.len()),
        last_updated,
    };

    for mut item in raw_items {
        if version < 2 {
            migrate_v1_item(&mut item);
        }
        match serde_json::from_value::<ProgressRecord>(item) {
            Ok(mut record) if !record.manga_id.is_empty() => {
                record.refresh_percentage();
                insert_newest(&mut collection, record);
            }
            Ok(_) => tracing::warn!("skipping stored progress record without a manga id"),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable progress record"),
        }
    }

    Ok(collection)
}

/// `{ "continueReading": { ... } }` → `{ ... }`.
fn unwrap_legacy(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if !obj.contains_key("items") => {
            match obj.remove(LEGACY_WRAPPER_KEY) {
                Some(inner) => inner,
                None => Value::Object(obj),
            }
        }
        other => other,
    }
}

/// v1 items used `currentChapter` and could hold a numeric chapter id.
fn migrate_v1_item(item: &mut Value) {
    let Value::Object(obj) = item else {
        return;
    };
    rename_key(obj, "currentChapter", "currentChapterNumber");
}

fn rename_key(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if obj.contains_key(to) {
        return;
    }
    if let Some(v) = obj.remove(from) {
        obj.insert(to.to_string(), v);
    }
}

/// Duplicate ids can only come from hand-edited or buggy blobs; keep the newest.
fn insert_newest(collection: &mut ProgressCollection, record: ProgressRecord) {
    match collection.get_mut(&record.manga_id) {
        Some(existing) if existing.last_read_at >= record.last_read_at => {}
        Some(existing) => *existing = record,
        None => collection.items.push(record),
    }
}

fn corrupt(msg: String) -> ShioriError {
    ShioriError::StorageReadCorrupt(msg)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lenient serde helpers for fields whose JSON type drifted between web client releases.
pub mod de {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Int(i64),
        Float(f64),
        Str(String),
    }

    /// Accept a count from an integer, float or numeric string; null, negative or junk → 0.
    pub fn u32_lenient<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val: Option<NumOrStr> = Option::deserialize(deserializer)?;
        let n = match val {
            None => 0.0,
            Some(NumOrStr::Int(n)) => n as f64,
            Some(NumOrStr::Float(f)) => f,
            Some(NumOrStr::Str(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        };
        if n.is_finite() && n > 0.0 {
            Ok(n.floor().min(f64::from(u32::MAX)) as u32)
        } else {
            Ok(0)
        }
    }

    /// Like [`u32_lenient`] for chapter numbers, which start at 1.
    pub fn chapter_lenient<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        u32_lenient(deserializer).map(|n| n.max(1))
    }

    /// Accept an id from either a string or a number; null/"" → None.
    pub fn opt_string_from_str_or_num<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val: Option<NumOrStr> = Option::deserialize(deserializer)?;
        Ok(match val {
            None => None,
            Some(NumOrStr::Int(n)) => Some(n.to_string()),
            Some(NumOrStr::Float(f)) => Some(f.to_string()),
            Some(NumOrStr::Str(s)) if s.trim().is_empty() => None,
            Some(NumOrStr::Str(s)) => Some(s),
        })
    }
}
