//! Cache entries shared by both tiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::Collection;
use crate::store::{Record, RecordSet};

/// A cached payload.
///
/// The same value is held in the memory tier and written to the persistent
/// tier, so both tiers agree byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// `"<collection>_<query descriptor>"`
  pub key: String,
  pub payload: Value,
  /// Tag used for collection-scoped invalidation
  pub collection: Collection,
  /// Milliseconds since epoch
  pub created_at: i64,
  /// Length of the serialized payload
  pub size_bytes: usize,
}

impl CacheEntry {
  /// Build an entry, measuring the payload's serialized size.
  pub fn new(
    key: impl Into<String>,
    payload: Value,
    collection: Collection,
    created_at: i64,
  ) -> serde_json::Result<Self> {
    let size_bytes = serde_json::to_vec(&payload)?.len();
    Ok(Self {
      key: key.into(),
      payload,
      collection,
      created_at,
      size_bytes,
    })
  }

  /// Whether the entry is older than `ttl_ms` at `now_ms`.
  pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
    now_ms - self.created_at > ttl_ms
  }
}

impl Record for CacheEntry {
  fn record_set() -> RecordSet {
    RecordSet::Cache
  }

  fn record_key(&self) -> String {
    self.key.clone()
  }

  fn time_index(&self) -> i64 {
    self.created_at
  }

  fn tag_index(&self) -> Option<&str> {
    Some(self.collection.as_str())
  }
}
