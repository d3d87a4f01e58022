//! Durable cache tier.
//!
//! Reads run on the blocking pool. Writes are handed to a single writer
//! thread through an ordered channel, so a slow or failing store never holds
//! up the caller and writes for the same key land in the order they were
//! issued. Invalidation and reaping travel through the same channel and
//! therefore apply after every write issued before them.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use super::entry::CacheEntry;
use super::Invalidation;
use crate::store::{IndexScan, RecordStore, StoreResult};

enum TierCommand {
  Put(CacheEntry),
  Invalidate {
    target: Invalidation,
    done: oneshot::Sender<usize>,
  },
  Reap {
    older_than: i64,
    done: Option<oneshot::Sender<usize>>,
  },
  Flush(oneshot::Sender<()>),
}

/// Persistent tier over a [`RecordStore`].
pub struct PersistentTier<S: RecordStore> {
  store: Arc<S>,
  tx: mpsc::UnboundedSender<TierCommand>,
  _writer: JoinHandle<()>,
}

impl<S: RecordStore> PersistentTier<S> {
  /// Start the tier and its writer thread.
  pub fn start(store: Arc<S>) -> std::io::Result<Self> {
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_store = Arc::clone(&store);
    let writer = std::thread::Builder::new()
      .name("offsync-persist".to_string())
      .spawn(move || run_writer(writer_store, rx))?;

    Ok(Self {
      store,
      tx,
      _writer: writer,
    })
  }

  /// Read an entry, regardless of age.
  pub async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
    let store = Arc::clone(&self.store);
    let key = key.to_string();
    tokio::task::spawn_blocking(move || store.get_record(&key)).await?
  }

  /// Queue an entry for writing. Returns immediately.
  pub fn put(&self, entry: CacheEntry) {
    if self.tx.send(TierCommand::Put(entry)).is_err() {
      tracing::warn!("persistent cache writer stopped, dropping write");
    }
  }

  /// Remove matching entries once every earlier write has landed.
  pub async fn invalidate(&self, target: Invalidation) -> usize {
    let (done, rx) = oneshot::channel();
    if self
      .tx
      .send(TierCommand::Invalidate { target, done })
      .is_err()
    {
      tracing::warn!("persistent cache writer stopped, skipping invalidation");
      return 0;
    }
    rx.await.unwrap_or(0)
  }

  /// Remove entries created before `older_than` and wait for the result.
  pub async fn reap(&self, older_than: i64) -> usize {
    let (done, rx) = oneshot::channel();
    let cmd = TierCommand::Reap {
      older_than,
      done: Some(done),
    };
    if self.tx.send(cmd).is_err() {
      return 0;
    }
    rx.await.unwrap_or(0)
  }

  /// Schedule a reap without waiting for it.
  pub fn reap_in_background(&self, older_than: i64) {
    let _ = self.tx.send(TierCommand::Reap {
      older_than,
      done: None,
    });
  }

  /// Wait until every previously queued command has been applied.
  pub async fn flush(&self) {
    let (done, rx) = oneshot::channel();
    if self.tx.send(TierCommand::Flush(done)).is_ok() {
      let _ = rx.await;
    }
  }
}

fn run_writer<S: RecordStore>(store: Arc<S>, mut rx: mpsc::UnboundedReceiver<TierCommand>) {
  while let Some(cmd) = rx.blocking_recv() {
    match cmd {
      TierCommand::Put(entry) => {
        if let Err(e) = store.put_record(&entry) {
          tracing::warn!(key = %entry.key, error = %e, "failed to persist cache entry");
        }
      }
      TierCommand::Invalidate { target, done } => {
        let removed = invalidate(store.as_ref(), &target).unwrap_or_else(|e| {
          tracing::warn!(invalidation = ?target, error = %e, "failed to invalidate persistent cache");
          0
        });
        let _ = done.send(removed);
      }
      TierCommand::Reap { older_than, done } => {
        let removed = reap(store.as_ref(), older_than).unwrap_or_else(|e| {
          tracing::warn!(error = %e, "failed to reap persistent cache");
          0
        });
        if removed > 0 {
          tracing::debug!(removed, "reaped expired persistent cache entries");
        }
        if let Some(done) = done {
          let _ = done.send(removed);
        }
      }
      TierCommand::Flush(done) => {
        let _ = done.send(());
      }
    }
  }
}

fn invalidate<S: RecordStore>(store: &S, target: &Invalidation) -> StoreResult<usize> {
  let candidates: Vec<CacheEntry> = match target {
    Invalidation::Collection(collection) => {
      store.scan_by_index(&IndexScan::TagEquals(collection.as_str().to_string()))?
    }
    Invalidation::KeyContains(_) => store.scan_by_index(&IndexScan::All)?,
  };

  delete_all(store, candidates.iter().filter(|e| target.matches(e)))
}

fn reap<S: RecordStore>(store: &S, older_than: i64) -> StoreResult<usize> {
  let expired: Vec<CacheEntry> = store.scan_by_index(&IndexScan::TimeBefore(older_than))?;
  delete_all(store, expired.iter())
}

fn delete_all<'a, S: RecordStore>(
  store: &S,
  entries: impl Iterator<Item = &'a CacheEntry>,
) -> StoreResult<usize> {
  let mut removed = 0;
  for entry in entries {
    if store.delete_record::<CacheEntry>(&entry.key)? {
      removed += 1;
    }
  }
  Ok(removed)
}
