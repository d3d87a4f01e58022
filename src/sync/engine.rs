//! Replays queued writes against the remote service.
//!
//! A drain takes every pending operation in id order and dispatches it by
//! kind. Successes leave the queue; failures are counted and left for the
//! next drain, so an unreachable service is not hammered in a loop. After
//! [`MAX_RETRIES`] failed retries an operation is dropped and reported.
//!
//! Only one drain runs at a time. A drain requested while another is in
//! progress returns [`DrainOutcome::Skipped`]; the running drain then makes
//! one more pass over operations queued after it started.
//!
//! A storage failure while handling one operation is logged and counted,
//! and the drain moves on. An operation the remote service already
//! accepted is never sent again, even if removing it from the queue failed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::operation::{is_local_id, local_id, SyncKind, SyncOperation, MAX_RETRIES};
use super::queue::SyncQueue;
use crate::clock::Clock;
use crate::collection::Collection;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::meta::{MetadataStore, LAST_SYNC_AT};
use crate::remote::RemoteService;
use crate::store::{RecordStore, StoreResult};

/// Counts from one completed drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Operations acknowledged by the remote service and removed
  pub replayed: usize,
  /// Operations that failed and stay queued for the next drain
  pub retried: usize,
  /// Operations that failed for the last time and were removed
  pub dropped: usize,
  /// Operations left queued because the store failed while handling them
  pub storage_errors: usize,
  /// Queue length after the drain
  pub remaining: usize,
}

/// Result of asking for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
  /// Another drain was already running
  Skipped,
  /// The connectivity monitor reports offline
  Offline,
  Completed(DrainReport),
}

/// Lifetime counters for the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
  pub pending: usize,
  pub replayed_total: u64,
  pub dropped_total: u64,
  /// Last time a drain left the queue empty, ms since epoch
  pub last_sync_at: Option<i64>,
}

/// Called after a drain for each collection it changed on the remote
/// service.
pub type ReplayHook = Box<dyn Fn(Collection) -> BoxFuture<'static, ()> + Send + Sync>;

/// Clears the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
  Done,
  Retry,
  Dropped,
  StorageFailed,
}

#[derive(Default)]
struct DrainState {
  report: DrainReport,
  changed: BTreeSet<Collection>,
  /// Highest operation id handled so far
  last_seen: u64,
  started: bool,
}

/// Sync engine owning the sync queue.
pub struct SyncEngine<S: RecordStore, R: RemoteService> {
  queue: SyncQueue<S>,
  meta: MetadataStore<S>,
  remote: Arc<R>,
  monitor: Arc<ConnectivityMonitor>,
  clock: Arc<dyn Clock>,
  on_replayed: Option<ReplayHook>,
  draining: AtomicBool,
  drain_requested: AtomicBool,
  /// Operations with a final outcome whose removal from the queue failed
  settled: Mutex<HashMap<u64, Replay>>,
  replayed_total: AtomicU64,
  dropped_total: AtomicU64,
}

impl<S: RecordStore, R: RemoteService> SyncEngine<S, R> {
  /// Create an engine, opening the queue held in `store`.
  pub fn new(
    store: Arc<S>,
    remote: Arc<R>,
    monitor: Arc<ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
  ) -> StoreResult<Self> {
    let queue = SyncQueue::open(Arc::clone(&store), Arc::clone(&clock))?;
    let meta = MetadataStore::new(store, Arc::clone(&clock));

    Ok(Self {
      queue,
      meta,
      remote,
      monitor,
      clock,
      on_replayed: None,
      draining: AtomicBool::new(false),
      drain_requested: AtomicBool::new(false),
      settled: Mutex::new(HashMap::new()),
      replayed_total: AtomicU64::new(0),
      dropped_total: AtomicU64::new(0),
    })
  }

  /// Run `hook` for every collection a drain changed, before the drain
  /// finishes. Used to invalidate cached pages of those collections.
  pub fn on_replayed<F>(mut self, hook: F) -> Self
  where
    F: Fn(Collection) -> BoxFuture<'static, ()> + Send + Sync + 'static,
  {
    self.on_replayed = Some(Box::new(hook));
    self
  }

  /// Queue a write for later replay. Returns the operation id.
  pub fn enqueue(&self, kind: SyncKind, payload: Value) -> StoreResult<u64> {
    let id = self.queue.enqueue(kind, payload)?;
    tracing::debug!(operation = id, "queued write for sync");
    Ok(id)
  }

  pub fn pending_count(&self) -> StoreResult<usize> {
    self.queue.len()
  }

  pub fn pending(&self) -> StoreResult<Vec<SyncOperation>> {
    self.queue.dequeue_all()
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  /// Map a locally issued id to the server's id once its create has synced.
  ///
  /// Ids that are not local, or whose create is still queued, come back
  /// unchanged.
  pub fn resolve_id(&self, id: &str) -> StoreResult<String> {
    if !is_local_id(id) {
      return Ok(id.to_string());
    }
    Ok(self.meta.resolve_id(id)?.unwrap_or_else(|| id.to_string()))
  }

  /// Replay every pending operation once.
  ///
  /// Only fails if the queue cannot be read before anything was replayed.
  pub async fn drain(&self) -> StoreResult<DrainOutcome> {
    if !self.monitor.is_online() {
      return Ok(DrainOutcome::Offline);
    }
    self.drain_requested.store(true, Ordering::Release);
    if !self.begin_drain() {
      tracing::debug!("drain already running, skipping");
      return Ok(DrainOutcome::Skipped);
    }

    let mut state = DrainState::default();
    loop {
      let guard = DrainGuard(&self.draining);
      let passes = self.run_passes(&mut state).await;
      self.notify_replayed(&mut state.changed).await;
      drop(guard);
      passes?;

      // A request that came in as the flag was cleared
      if !self.drain_requested.load(Ordering::Acquire)
        || !self.monitor.is_online()
        || !self.begin_drain()
      {
        break;
      }
    }

    self.finish(state)
  }

  /// Drain in the background.
  pub fn request_drain(self: &Arc<Self>) {
    let engine = Arc::clone(self);
    tokio::spawn(async move {
      match engine.drain().await {
        Ok(outcome) => tracing::debug!(?outcome, "requested drain"),
        Err(e) => tracing::error!(error = %e, "requested drain failed"),
      }
    });
  }

  fn begin_drain(&self) -> bool {
    self
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  async fn run_passes(&self, state: &mut DrainState) -> StoreResult<()> {
    while self.drain_requested.swap(false, Ordering::AcqRel) {
      let ops = match self.queue.dequeue_all() {
        Ok(ops) => ops,
        Err(e) if !state.started => return Err(e),
        Err(e) => {
          tracing::warn!(error = %e, "failed to reread sync queue, ending drain");
          state.report.storage_errors += 1;
          return Ok(());
        }
      };
      state.started = true;

      let fresh: Vec<SyncOperation> = ops
        .into_iter()
        .filter(|op| op.id > state.last_seen)
        .collect();
      if !fresh.is_empty() {
        tracing::info!(pending = fresh.len(), "draining sync queue");
      }

      for op in fresh {
        if !self.monitor.is_online() {
          tracing::info!("went offline during drain, stopping");
          return Ok(());
        }
        state.last_seen = op.id;
        match self.replay_one(&op, &mut state.changed).await {
          Replay::Done => state.report.replayed += 1,
          Replay::Retry => state.report.retried += 1,
          Replay::Dropped => state.report.dropped += 1,
          Replay::StorageFailed => state.report.storage_errors += 1,
        }
      }
    }
    Ok(())
  }

  fn finish(&self, state: DrainState) -> StoreResult<DrainOutcome> {
    let mut report = state.report;

    self
      .replayed_total
      .fetch_add(report.replayed as u64, Ordering::Relaxed);
    self
      .dropped_total
      .fetch_add(report.dropped as u64, Ordering::Relaxed);

    report.remaining = self.queue.len()?;
    if report.remaining == 0 {
      if let Err(e) = self.meta.set(LAST_SYNC_AT, Value::from(self.clock.now_ms())) {
        tracing::warn!(error = %e, "failed to record sync time");
      }
    }

    let handled = report.replayed + report.retried + report.dropped + report.storage_errors;
    if handled > 0 {
      tracing::info!(
        replayed = report.replayed,
        retried = report.retried,
        dropped = report.dropped,
        storage_errors = report.storage_errors,
        remaining = report.remaining,
        "sync drain finished"
      );
    }

    Ok(DrainOutcome::Completed(report))
  }

  async fn notify_replayed(&self, changed: &mut BTreeSet<Collection>) {
    let changed = std::mem::take(changed);
    if let Some(hook) = &self.on_replayed {
      for collection in changed {
        hook(collection).await;
      }
    }
  }

  fn settled(&self) -> MutexGuard<'_, HashMap<u64, Replay>> {
    self.settled.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn replay_one(&self, op: &SyncOperation, changed: &mut BTreeSet<Collection>) -> Replay {
    let settled = self.settled().get(&op.id).copied();
    if let Some(outcome) = settled {
      return self.settle(op, outcome);
    }

    let err = match self.dispatch(op).await {
      Ok(()) => {
        changed.insert(op.kind.collection().clone());
        return self.settle(op, Replay::Done);
      }
      Err(Error::Storage(e)) => {
        tracing::warn!(
          operation = op.id,
          kind = %op.kind.describe(),
          error = %e,
          "storage failed before replay, leaving operation queued"
        );
        return Replay::StorageFailed;
      }
      Err(e) => e,
    };

    let attempt = op.retry_count + 1;
    if attempt > MAX_RETRIES {
      tracing::warn!(
        operation = op.id,
        kind = %op.kind.describe(),
        attempts = attempt,
        error = %err,
        "dropping sync operation after repeated failures"
      );
      return self.settle(op, Replay::Dropped);
    }

    if let Err(e) = self.queue.bump_retry(op.id) {
      tracing::warn!(operation = op.id, error = %e, "failed to record sync retry");
      return Replay::StorageFailed;
    }
    tracing::debug!(
      operation = op.id,
      kind = %op.kind.describe(),
      attempt,
      error = %err,
      "sync operation failed, will retry"
    );
    Replay::Retry
  }

  /// Remove an operation whose outcome is final. If the store refuses, the
  /// outcome is kept so later drains only retry the removal.
  fn settle(&self, op: &SyncOperation, outcome: Replay) -> Replay {
    match self.queue.remove(op.id) {
      Ok(_) => {
        self.settled().remove(&op.id);
        outcome
      }
      Err(e) => {
        tracing::warn!(
          operation = op.id,
          kind = %op.kind.describe(),
          error = %e,
          "failed to remove finished sync operation"
        );
        self.settled().insert(op.id, outcome);
        Replay::StorageFailed
      }
    }
  }

  async fn dispatch(&self, op: &SyncOperation) -> Result<()> {
    match &op.kind {
      SyncKind::Create { collection } => {
        // A recorded server id means an earlier drain already created it
        if self.meta.resolve_id(&local_id(op.id))?.is_some() {
          tracing::debug!(operation = op.id, "create already applied, not resending");
          return Ok(());
        }
        let server_id = self.remote.create_entity(collection, &op.payload).await?;
        // The create already happened; a lost mapping must not replay it.
        if let Err(e) = self.meta.record_id_mapping(&local_id(op.id), &server_id) {
          tracing::warn!(operation = op.id, error = %e, "failed to record server id");
        }
        Ok(())
      }
      SyncKind::Update { collection, id } => {
        let target = self.resolve_id(id)?;
        if is_local_id(&target) {
          return Err(Error::UnsyncedId(target));
        }
        self
          .remote
          .update_entity(collection, &target, &op.payload)
          .await?;
        Ok(())
      }
    }
  }

  pub fn stats(&self) -> StoreResult<SyncStats> {
    Ok(SyncStats {
      pending: self.queue.len()?,
      replayed_total: self.replayed_total.load(Ordering::Relaxed),
      dropped_total: self.dropped_total.load(Ordering::Relaxed),
      last_sync_at: self.meta.last_sync_at()?,
    })
  }

  /// Drain once every time the monitor goes online.
  pub fn spawn_reconnect_listener(self: &Arc<Self>) -> JoinHandle<()> {
    let engine = Arc::clone(self);
    let mut rx = self.monitor.subscribe();

    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        if !*rx.borrow_and_update() {
          continue;
        }
        match engine.drain().await {
          Ok(outcome) => tracing::debug!(?outcome, "reconnect drain"),
          Err(e) => tracing::error!(error = %e, "reconnect drain failed"),
        }
      }
    })
  }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
