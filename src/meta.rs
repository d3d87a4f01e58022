//! Engine bookkeeping records.
//!
//! Small named values such as the time of the last complete sync. Records
//! are created on first write, overwritten in place and never deleted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::store::{Record, RecordSet, RecordStore, StoreResult};

/// Time (ms since epoch) of the last drain that emptied the sync queue.
pub const LAST_SYNC_AT: &str = "last_sync_at";

/// Prefix for records mapping a locally issued id to the server's id.
pub const ID_MAP_PREFIX: &str = "id_map:";

/// A named bookkeeping value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
  pub name: String,
  pub value: Value,
  pub updated_at: i64,
}

impl Record for Metadata {
  fn record_set() -> RecordSet {
    RecordSet::Metadata
  }

  fn record_key(&self) -> String {
    self.name.clone()
  }

  fn time_index(&self) -> i64 {
    self.updated_at
  }
}

/// Reads and writes [`Metadata`] records.
pub struct MetadataStore<S: RecordStore> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
}

impl<S: RecordStore> MetadataStore<S> {
  pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  pub fn get(&self, name: &str) -> StoreResult<Option<Metadata>> {
    self.store.get_record(name)
  }

  pub fn set(&self, name: &str, value: Value) -> StoreResult<()> {
    self.store.put_record(&Metadata {
      name: name.to_string(),
      value,
      updated_at: self.clock.now_ms(),
    })
  }

  /// When the sync queue was last drained to empty.
  pub fn last_sync_at(&self) -> StoreResult<Option<i64>> {
    Ok(self.get(LAST_SYNC_AT)?.and_then(|m| m.value.as_i64()))
  }

  /// Remember the server id a locally issued id turned into.
  pub fn record_id_mapping(&self, local_id: &str, server_id: &str) -> StoreResult<()> {
    self.set(
      &format!("{}{}", ID_MAP_PREFIX, local_id),
      Value::String(server_id.to_string()),
    )
  }

  pub fn resolve_id(&self, local_id: &str) -> StoreResult<Option<String>> {
    let record = self.get(&format!("{}{}", ID_MAP_PREFIX, local_id))?;
    Ok(record.and_then(|m| m.value.as_str().map(String::from)))
  }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
