//! The engine context.
//!
//! Built once at startup and passed to whatever needs data access. It owns
//! the cache coordinator, the sync engine, the connectivity monitor and the
//! background tasks that keep them running.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cache::{CacheCoordinator, CacheSettings, CleanupReport};
use crate::clock::{Clock, SystemClock};
use crate::connectivity::ConnectivityMonitor;
use crate::remote::RemoteService;
use crate::service::DataService;
use crate::store::{RecordStore, StoreResult};
use crate::sync::{DrainOutcome, SyncEngine};

/// Settings for [`Engine::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
  pub cache: CacheSettings,
  /// Connectivity assumed until the first event says otherwise
  pub start_online: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      cache: CacheSettings::default(),
      start_online: true,
    }
  }
}

/// Caching and offline-sync engine.
pub struct Engine<S: RecordStore, R: RemoteService> {
  cache: Arc<CacheCoordinator<S>>,
  sync: Arc<SyncEngine<S, R>>,
  remote: Arc<R>,
  monitor: Arc<ConnectivityMonitor>,
  tasks: Vec<JoinHandle<()>>,
}

impl<S: RecordStore, R: RemoteService> Engine<S, R> {
  /// Start the engine on the system clock.
  ///
  /// Must be called from within a tokio runtime.
  pub fn start(config: EngineConfig, store: Arc<S>, remote: Arc<R>) -> StoreResult<Self> {
    Self::start_with_clock(config, store, remote, Arc::new(SystemClock))
  }

  pub fn start_with_clock(
    config: EngineConfig,
    store: Arc<S>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
  ) -> StoreResult<Self> {
    let monitor = Arc::new(ConnectivityMonitor::new(config.start_online));
    let cache = Arc::new(CacheCoordinator::new(
      Arc::clone(&store),
      config.cache,
      Arc::clone(&clock),
    )?);
    let sync = Arc::new(
      SyncEngine::new(store, Arc::clone(&remote), Arc::clone(&monitor), clock)?
        .on_replayed(cache.invalidation_hook()),
    );

    let tasks = vec![cache.spawn_reaper(), sync.spawn_reconnect_listener()];

    tracing::info!(
      online = config.start_online,
      pending = sync.pending_count()?,
      "engine started"
    );

    Ok(Self {
      cache,
      sync,
      remote,
      monitor,
      tasks,
    })
  }

  /// Facade for application reads and writes.
  pub fn data_service(&self) -> DataService<S, R> {
    DataService::new(
      Arc::clone(&self.cache),
      Arc::clone(&self.sync),
      Arc::clone(&self.remote),
      Arc::clone(&self.monitor),
    )
  }

  pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
    &self.monitor
  }

  pub fn cache(&self) -> &Arc<CacheCoordinator<S>> {
    &self.cache
  }

  pub fn sync_engine(&self) -> &Arc<SyncEngine<S, R>> {
    &self.sync
  }

  /// Feed a connectivity event. Going online triggers a drain.
  pub fn set_online(&self, online: bool) -> bool {
    self.monitor.set_online(online)
  }

  /// Drain the sync queue now.
  pub async fn sync_now(&self) -> StoreResult<DrainOutcome> {
    self.sync.drain().await
  }

  pub async fn cleanup(&self) -> CleanupReport {
    self.cache.cleanup().await
  }

  /// Stop background tasks and wait for pending cache writes.
  pub async fn shutdown(self) {
    for task in &self.tasks {
      task.abort();
    }
    self.cache.flush().await;
    tracing::debug!("engine stopped");
  }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
