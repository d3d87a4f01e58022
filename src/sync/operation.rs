//! Pending write operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::Collection;
use crate::store::{Record, RecordSet};

/// Retries allowed after the first failed replay. An operation gets
/// `MAX_RETRIES + 1` attempts in total before it is dropped.
pub const MAX_RETRIES: u32 = 3;

/// What a queued operation does on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncKind {
  Create { collection: Collection },
  Update { collection: Collection, id: String },
}

impl SyncKind {
  pub fn collection(&self) -> &Collection {
    match self {
      Self::Create { collection } | Self::Update { collection, .. } => collection,
    }
  }

  /// Short label for logs, e.g. `"create students"`.
  pub fn describe(&self) -> String {
    match self {
      Self::Create { collection } => format!("create {}", collection),
      Self::Update { collection, id } => format!("update {} {}", collection, id),
    }
  }
}

/// A write waiting to be replayed against the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
  /// Assigned on enqueue; replay order
  pub id: u64,
  pub kind: SyncKind,
  pub payload: Value,
  /// Milliseconds since epoch
  pub enqueued_at: i64,
  /// Failed replay attempts so far
  pub retry_count: u32,
}

impl Record for SyncOperation {
  fn record_set() -> RecordSet {
    RecordSet::SyncQueue
  }

  fn record_key(&self) -> String {
    operation_key(self.id)
  }

  fn time_index(&self) -> i64 {
    self.enqueued_at
  }
}

/// Prefix of ids handed out for creates that are still queued.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Temporary id acknowledged for a queued create.
pub fn local_id(operation_id: u64) -> String {
  format!("{}{}", LOCAL_ID_PREFIX, operation_id)
}

pub fn is_local_id(id: &str) -> bool {
  id.starts_with(LOCAL_ID_PREFIX)
}

/// Primary key for an operation id.
///
/// Zero-padded so lexical and numeric order agree.
pub(crate) fn operation_key(id: u64) -> String {
  format!("{:020}", id)
}
