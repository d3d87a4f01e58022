//! SQLite-backed record store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{IndexScan, Record, RecordStore, StoreError, StoreResult};

/// SQLite-based record store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> StoreResult<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> StoreResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Open a store that lives only as long as this value.
  pub fn open_in_memory() -> StoreResult<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> StoreResult<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> StoreResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StoreError::NoDataDir)?;

    Ok(data_dir.join("offsync").join("cache.db"))
  }

  /// Run schema migrations for every record set.
  fn run_migrations(&self) -> StoreResult<()> {
    let conn = self.lock()?;
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// One table per record set, with the time and tag indexes as columns.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    record_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    time_index INTEGER NOT NULL,
    tag_index TEXT
);

CREATE INDEX IF NOT EXISTS idx_cache_time ON cache(time_index);
CREATE INDEX IF NOT EXISTS idx_cache_tag ON cache(tag_index);

CREATE TABLE IF NOT EXISTS sync_queue (
    record_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    time_index INTEGER NOT NULL,
    tag_index TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_time ON sync_queue(time_index);

CREATE TABLE IF NOT EXISTS metadata (
    record_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    time_index INTEGER NOT NULL,
    tag_index TEXT
);
"#;

impl RecordStore for SqliteStore {
  fn get_record<R: Record>(&self, key: &str) -> StoreResult<Option<R>> {
    let conn = self.lock()?;
    let sql = format!(
      "SELECT data FROM {} WHERE record_key = ?",
      R::record_set().table()
    );

    let data: Option<Vec<u8>> = conn
      .query_row(&sql, params![key], |row| row.get(0))
      .optional()?;

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn put_record<R: Record>(&self, record: &R) -> StoreResult<()> {
    let data = serde_json::to_vec(record)?;
    let conn = self.lock()?;
    let sql = format!(
      "INSERT OR REPLACE INTO {} (record_key, data, time_index, tag_index)
       VALUES (?, ?, ?, ?)",
      R::record_set().table()
    );

    conn.execute(
      &sql,
      params![
        record.record_key(),
        data,
        record.time_index(),
        record.tag_index()
      ],
    )?;

    Ok(())
  }

  fn delete_record<R: Record>(&self, key: &str) -> StoreResult<bool> {
    let conn = self.lock()?;
    let sql = format!(
      "DELETE FROM {} WHERE record_key = ?",
      R::record_set().table()
    );
    let removed = conn.execute(&sql, params![key])?;
    Ok(removed > 0)
  }

  fn scan_by_index<R: Record>(&self, scan: &IndexScan) -> StoreResult<Vec<R>> {
    let conn = self.lock()?;
    let table = R::record_set().table();

    let rows: Vec<Vec<u8>> = match scan {
      IndexScan::All => {
        let sql = format!("SELECT data FROM {table} ORDER BY time_index, record_key");
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        mapped.collect::<Result<Vec<_>, _>>()?
      }
      IndexScan::TimeBefore(bound) => {
        let sql = format!(
          "SELECT data FROM {table} WHERE time_index < ? ORDER BY time_index, record_key"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(params![bound], |row| row.get::<_, Vec<u8>>(0))?;
        mapped.collect::<Result<Vec<_>, _>>()?
      }
      IndexScan::TagEquals(tag) => {
        let sql = format!(
          "SELECT data FROM {table} WHERE tag_index = ? ORDER BY time_index, record_key"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(params![tag], |row| row.get::<_, Vec<u8>>(0))?;
        mapped.collect::<Result<Vec<_>, _>>()?
      }
    };

    rows
      .iter()
      .map(|data| serde_json::from_slice(data).map_err(StoreError::from))
      .collect()
  }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
