//! Store trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use super::traits::{CachedRecord, Collection};
use crate::notify::Notifier;

/// Trait for durable key-value backends.
///
/// Every operation touches a single `(collection, key)` pair and is atomic on
/// its own. Absence is never an error.
pub trait LocalStore: Send + Sync {
  /// Insert or overwrite a value.
  fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<()>;

  /// Look up a value.
  fn get(&self, collection: Collection, key: &str) -> Result<Option<CachedRecord>>;

  /// Remove a value. Missing keys are a no-op.
  fn delete(&self, collection: Collection, key: &str) -> Result<()>;

  /// All records in a collection, oldest write first.
  fn list(&self, collection: Collection) -> Result<Vec<CachedRecord>>;

  /// Whether writes outlive the process.
  fn is_durable(&self) -> bool {
    true
  }
}

/// Store that keeps nothing.
/// Used when the storage engine failed to initialize - reads miss, writes are dropped.
pub struct NoopStore;

impl LocalStore for NoopStore {
  fn put(&self, _collection: Collection, _key: &str, _value: &Value) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _collection: Collection, _key: &str) -> Result<Option<CachedRecord>> {
    Ok(None) // Always miss
  }

  fn delete(&self, _collection: Collection, _key: &str) -> Result<()> {
    Ok(())
  }

  fn list(&self, _collection: Collection) -> Result<Vec<CachedRecord>> {
    Ok(Vec::new())
  }

  fn is_durable(&self) -> bool {
    false
  }
}

/// SQLite-based store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open offline database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory store.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tripsync").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the record table. Both collections share one table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);

CREATE INDEX IF NOT EXISTS idx_records_stored
    ON records(collection, stored_at);
"#;

impl LocalStore for SqliteStore {
  fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let payload =
      serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
    let stored_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    conn
      .execute(
        "INSERT OR REPLACE INTO records (collection, key, payload, stored_at)
         VALUES (?, ?, ?, ?)",
        params![collection.as_str(), key, payload, stored_at],
      )
      .map_err(|e| eyre!("Failed to store {}/{}: {}", collection, key, e))?;

    Ok(())
  }

  fn get(&self, collection: Collection, key: &str) -> Result<Option<CachedRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT payload, stored_at FROM records WHERE collection = ? AND key = ?",
        params![collection.as_str(), key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", collection, key, e))?;

    match row {
      Some((data, stored_at)) => Ok(Some(decode_record(key.to_string(), &data, &stored_at)?)),
      None => Ok(None),
    }
  }

  fn delete(&self, collection: Collection, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM records WHERE collection = ? AND key = ?",
        params![collection.as_str(), key],
      )
      .map_err(|e| eyre!("Failed to delete {}/{}: {}", collection, key, e))?;

    Ok(())
  }

  fn list(&self, collection: Collection) -> Result<Vec<CachedRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT key, payload, stored_at FROM records
         WHERE collection = ?
         ORDER BY stored_at, key",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map(params![collection.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to list {}: {}", collection, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {} row: {}", collection, e))?;

    rows
      .into_iter()
      .map(|(key, data, stored_at)| decode_record(key, &data, &stored_at))
      .collect()
  }
}

fn decode_record(key: String, data: &[u8], stored_at: &str) -> Result<CachedRecord> {
  let payload: Value =
    serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize {}: {}", key, e))?;
  let stored_at = DateTime::parse_from_rfc3339(stored_at)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", stored_at, e))?;

  Ok(CachedRecord {
    key,
    payload,
    stored_at,
  })
}

/// Open the SQLite store, falling back to [`NoopStore`] when it can't be opened.
///
/// The failure is reported once through `notifier`; afterwards the client runs
/// online-only with caching and queueing disabled.
pub fn open_or_degrade(path: Option<&Path>, notifier: &dyn Notifier) -> Arc<dyn LocalStore> {
  let opened = match path {
    Some(p) => SqliteStore::open(p),
    None => SqliteStore::default_path().and_then(|p| SqliteStore::open(&p)),
  };

  match opened {
    Ok(store) => {
      info!("offline storage ready");
      Arc::new(store)
    }
    Err(e) => {
      error!(error = %e, "offline storage unavailable, continuing online-only");
      notifier.error("Failed to initialize offline storage");
      debug!("using no-op store");
      Arc::new(NoopStore)
    }
  }
}
