//! In-process record store.
//!
//! Used when persistence is disabled and in tests. Records are kept in their
//! serialized form so reads see exactly what a durable store would return.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{IndexScan, Record, RecordSet, RecordStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredRow {
  data: Vec<u8>,
  time_index: i64,
  tag_index: Option<String>,
}

/// `BTreeMap`-backed record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
  sets: Mutex<BTreeMap<(RecordSet, String), StoredRow>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of records in a set.
  pub fn count(&self, set: RecordSet) -> StoreResult<usize> {
    let sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(sets.keys().filter(|(s, _)| *s == set).count())
  }
}

impl RecordStore for MemoryStore {
  fn get_record<R: Record>(&self, key: &str) -> StoreResult<Option<R>> {
    let sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
    match sets.get(&(R::record_set(), key.to_string())) {
      Some(row) => Ok(Some(serde_json::from_slice(&row.data)?)),
      None => Ok(None),
    }
  }

  fn put_record<R: Record>(&self, record: &R) -> StoreResult<()> {
    let row = StoredRow {
      data: serde_json::to_vec(record)?,
      time_index: record.time_index(),
      tag_index: record.tag_index().map(String::from),
    };
    let mut sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
    sets.insert((R::record_set(), record.record_key()), row);
    Ok(())
  }

  fn delete_record<R: Record>(&self, key: &str) -> StoreResult<bool> {
    let mut sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(sets.remove(&(R::record_set(), key.to_string())).is_some())
  }

  fn scan_by_index<R: Record>(&self, scan: &IndexScan) -> StoreResult<Vec<R>> {
    let sets = self.sets.lock().map_err(|_| StoreError::LockPoisoned)?;
    let set = R::record_set();

    let mut matched: Vec<(i64, &str, &StoredRow)> = sets
      .iter()
      .filter(|((s, _), _)| *s == set)
      .filter(|(_, row)| match scan {
        IndexScan::All => true,
        IndexScan::TimeBefore(bound) => row.time_index < *bound,
        IndexScan::TagEquals(tag) => row.tag_index.as_deref() == Some(tag.as_str()),
      })
      .map(|((_, key), row)| (row.time_index, key.as_str(), row))
      .collect();

    matched.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    matched
      .into_iter()
      .map(|(_, _, row)| serde_json::from_slice(&row.data).map_err(StoreError::from))
      .collect()
  }
}
