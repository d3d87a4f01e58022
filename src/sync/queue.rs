//! Durable FIFO of pending write operations.
//!
//! Operations are written to the store as soon as they are enqueued and stay
//! there until the sync engine removes them, so a restart never loses a
//! pending write. Ids keep increasing across restarts: the counter resumes
//! from the highest id already stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::operation::{operation_key, SyncKind, SyncOperation};
use crate::clock::Clock;
use crate::store::{IndexScan, RecordStore, StoreResult};

/// Offline queue for persisting operations.
pub struct SyncQueue<S: RecordStore> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  next_id: AtomicU64,
}

impl<S: RecordStore> SyncQueue<S> {
  /// Open the queue over a store, resuming id assignment after the highest
  /// stored id.
  pub fn open(store: Arc<S>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
    let pending: Vec<SyncOperation> = store.scan_by_index(&IndexScan::All)?;
    let next_id = pending.iter().map(|op| op.id).max().map_or(1, |max| max + 1);

    Ok(Self {
      store,
      clock,
      next_id: AtomicU64::new(next_id),
    })
  }

  /// Append an operation. It is durable once this returns.
  pub fn enqueue(&self, kind: SyncKind, payload: Value) -> StoreResult<u64> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let op = SyncOperation {
      id,
      kind,
      payload,
      enqueued_at: self.clock.now_ms(),
      retry_count: 0,
    };
    self.store.put_record(&op)?;
    Ok(id)
  }

  /// All pending operations in id order, without removing them.
  pub fn dequeue_all(&self) -> StoreResult<Vec<SyncOperation>> {
    let mut ops: Vec<SyncOperation> = self.store.scan_by_index(&IndexScan::All)?;
    ops.sort_by_key(|op| op.id);
    Ok(ops)
  }

  pub fn get(&self, id: u64) -> StoreResult<Option<SyncOperation>> {
    self.store.get_record(&operation_key(id))
  }

  /// Delete one operation. Returns whether it was still queued.
  pub fn remove(&self, id: u64) -> StoreResult<bool> {
    self.store.delete_record::<SyncOperation>(&operation_key(id))
  }

  /// Record a failed attempt and return the new retry count.
  ///
  /// Returns `None` if the operation is no longer queued.
  pub fn bump_retry(&self, id: u64) -> StoreResult<Option<u32>> {
    let Some(mut op) = self.get(id)? else {
      return Ok(None);
    };
    op.retry_count += 1;
    self.store.put_record(&op)?;
    Ok(Some(op.retry_count))
  }

  /// Number of pending operations.
  pub fn len(&self) -> StoreResult<usize> {
    Ok(self.dequeue_all()?.len())
  }

  pub fn is_empty(&self) -> StoreResult<bool> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
