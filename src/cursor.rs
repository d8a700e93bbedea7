// ABOUTME: Cursor values and the persisted per-table cursor store
// ABOUTME: Tracks the high-water mark of each replicated table across cycles

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::SqlValue;

/// The last ordering-column value known to be durably committed on the target.
///
/// A tagged variant instead of an untyped scalar: `Unset` stands in for the
/// first-ever sync, so no comparison against an empty-string sentinel ever
/// happens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    #[default]
    Unset,
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl CursorValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, CursorValue::Unset)
    }

    /// Adopt a row's ordering-column value as the new cursor.
    ///
    /// Only orderable scalar types are admissible; anything else means the
    /// configured ordering column cannot track progress for this table.
    pub fn from_sql_value(value: &SqlValue) -> Result<Self> {
        match value {
            SqlValue::Int(i) => Ok(CursorValue::Int(*i)),
            SqlValue::Float(f) => Ok(CursorValue::Float(*f)),
            SqlValue::DateTime(ts) => Ok(CursorValue::Timestamp(*ts)),
            SqlValue::Text(s) => Ok(CursorValue::Text(s.clone())),
            SqlValue::Null => anyhow::bail!("ordering column value is NULL"),
            SqlValue::Bool(_) | SqlValue::Bytes(_) => {
                anyhow::bail!("ordering column type cannot be used as a cursor")
            }
        }
    }

    /// Render the cursor as a bindable query parameter.
    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            CursorValue::Unset => SqlValue::Null,
            CursorValue::Int(i) => SqlValue::Int(*i),
            CursorValue::Float(f) => SqlValue::Float(*f),
            CursorValue::Timestamp(ts) => SqlValue::DateTime(*ts),
            CursorValue::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Unset => write!(f, "(unset)"),
            CursorValue::Int(i) => write!(f, "{i}"),
            CursorValue::Float(v) => write!(f, "{v}"),
            CursorValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            CursorValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Persisted mapping of (schema, table) to the last synced cursor.
///
/// Saving then loading reproduces the mapping exactly. The orchestrator is
/// the only writer; it flushes after each table's final commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorStore {
    pub version: u32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub schemas: BTreeMap<String, BTreeMap<String, CursorValue>>,
    #[serde(skip)]
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: &Path) -> Self {
        Self {
            version: 1,
            updated_at: chrono::Utc::now(),
            schemas: BTreeMap::new(),
            path: path.to_path_buf(),
        }
    }

    /// Load the store from disk; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(path));
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read cursor store from {path:?}"))?;
        let mut store: CursorStore = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse cursor store from {path:?}"))?;
        store.path = path.to_path_buf();
        Ok(store)
    }

    pub fn get(&self, schema: &str, table: &str) -> CursorValue {
        self.schemas
            .get(schema)
            .and_then(|tables| tables.get(table))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&mut self, schema: &str, table: &str, cursor: CursorValue) {
        self.schemas
            .entry(schema.to_string())
            .or_default()
            .insert(table.to_string(), cursor);
        self.updated_at = chrono::Utc::now();
    }

    /// Flush the full mapping to durable storage.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {parent:?}"))?;
            }
        }
        let contents =
            serde_json::to_string_pretty(self).context("failed to serialize cursor store")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("failed to write cursor store to {:?}", self.path))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_table_defaults_to_unset() {
        let store = CursorStore::new(Path::new("unused.json"));
        assert_eq!(store.get("db", "events"), CursorValue::Unset);
    }

    #[test]
    fn test_set_then_get() {
        let mut store = CursorStore::new(Path::new("unused.json"));
        store.set("db", "events", CursorValue::Int(42));
        assert_eq!(store.get("db", "events"), CursorValue::Int(42));
        assert_eq!(store.get("db", "other"), CursorValue::Unset);
    }

    #[test]
    fn test_cursor_value_serde_round_trip() {
        let ts =
            NaiveDateTime::parse_from_str("2024-03-01 10:05:00", "%Y-%m-%d %H:%M:%S").unwrap();
        for cursor in [
            CursorValue::Unset,
            CursorValue::Int(-3),
            CursorValue::Float(2.5),
            CursorValue::Timestamp(ts),
            CursorValue::Text("10:05".to_string()),
        ] {
            let json = serde_json::to_string(&cursor).unwrap();
            let back: CursorValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cursor);
        }
    }

    #[test]
    fn test_from_sql_value_rejects_unorderable_types() {
        assert!(CursorValue::from_sql_value(&SqlValue::Null).is_err());
        assert!(CursorValue::from_sql_value(&SqlValue::Bool(true)).is_err());
        assert!(CursorValue::from_sql_value(&SqlValue::Bytes(vec![1])).is_err());
        assert_eq!(
            CursorValue::from_sql_value(&SqlValue::Text("a".into())).unwrap(),
            CursorValue::Text("a".into())
        );
    }
}
