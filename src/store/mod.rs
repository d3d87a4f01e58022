//! Pluggable durable storage behind the persistent cache tier, the sync
//! queue and engine metadata.
//!
//! A store holds three record sets (`cache`, `sync_queue`, `metadata`). Each
//! record has a string primary key and two secondary indexes: a time index
//! used for reaping and ordering, and an optional tag index used for
//! collection-scoped invalidation.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{de::DeserializeOwned, Serialize};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// SQLite error.
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// Record could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// I/O error while preparing the store location.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// A lock guarding the store was poisoned by a panicking writer.
  #[error("store lock poisoned")]
  LockPoisoned,

  /// A blocking store call panicked or was cancelled.
  #[error("store task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  /// No default data directory could be determined.
  #[error("could not determine data directory")]
  NoDataDir,
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The durable record sets a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordSet {
  Cache,
  SyncQueue,
  Metadata,
}

impl RecordSet {
  pub fn table(self) -> &'static str {
    match self {
      Self::Cache => "cache",
      Self::SyncQueue => "sync_queue",
      Self::Metadata => "metadata",
    }
  }
}

/// A value that can live in a record set.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Record set this type is stored in.
  fn record_set() -> RecordSet;

  /// Primary key, unique within the record set.
  fn record_key(&self) -> String;

  /// Value of the time index (milliseconds since epoch).
  fn time_index(&self) -> i64;

  /// Value of the tag index, if the record carries one.
  fn tag_index(&self) -> Option<&str> {
    None
  }
}

/// Secondary-index range for [`RecordStore::scan_by_index`].
///
/// Results are ordered by time index ascending, then primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexScan {
  /// Every record in the set.
  All,
  /// Records whose time index is strictly older than the bound.
  TimeBefore(i64),
  /// Records whose tag index equals the value.
  TagEquals(String),
}

/// Storage backend for durable records.
///
/// Calls are blocking and short; each one is atomic with respect to the
/// others.
pub trait RecordStore: Send + Sync + 'static {
  /// Fetch one record by primary key.
  fn get_record<R: Record>(&self, key: &str) -> StoreResult<Option<R>>;

  /// Insert or overwrite a record.
  fn put_record<R: Record>(&self, record: &R) -> StoreResult<()>;

  /// Delete a record. Returns whether it existed.
  fn delete_record<R: Record>(&self, key: &str) -> StoreResult<bool>;

  /// Scan a record set through one of its secondary indexes.
  fn scan_by_index<R: Record>(&self, scan: &IndexScan) -> StoreResult<Vec<R>>;
}

impl<T: RecordStore> RecordStore for std::sync::Arc<T> {
  fn get_record<R: Record>(&self, key: &str) -> StoreResult<Option<R>> {
    (**self).get_record(key)
  }

  fn put_record<R: Record>(&self, record: &R) -> StoreResult<()> {
    (**self).put_record(record)
  }

  fn delete_record<R: Record>(&self, key: &str) -> StoreResult<bool> {
    (**self).delete_record::<R>(key)
  }

  fn scan_by_index<R: Record>(&self, scan: &IndexScan) -> StoreResult<Vec<R>> {
    (**self).scan_by_index(scan)
  }
}
