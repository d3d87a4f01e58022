//! The data service facade.
//!
//! The only surface the application talks to. Reads go through the cache
//! and fall back to whatever is cached when the remote service cannot be
//! reached. Writes go straight to the remote service when online and
//! invalidate the affected collection; offline writes are queued for the
//! sync engine and acknowledged with a temporary id.

mod key;

pub use key::{PageRequest, DEFAULT_PAGE_SIZE};

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{CacheCoordinator, CacheEntry, CacheResult};
use crate::collection::Collection;
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::remote::{Page, RemoteService};
use crate::store::RecordStore;
use crate::sync::{is_local_id, local_id, SyncEngine, SyncKind};

/// How a write was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
  /// The remote service accepted it
  Applied,
  /// Queued for replay once online
  Queued { operation_id: u64 },
}

/// Acknowledgement for a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
  /// Server id, or a `local-` id for a queued create
  pub id: String,
  pub status: WriteStatus,
}

impl WriteAck {
  pub fn is_queued(&self) -> bool {
    matches!(self.status, WriteStatus::Queued { .. })
  }
}

/// Figures for an offline indicator or status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
  pub memory_entry_count: usize,
  pub memory_bytes: usize,
  pub online: bool,
  pub pending_sync_count: usize,
}

/// Read-through, write-ahead access to the remote data service.
pub struct DataService<S: RecordStore, R: RemoteService> {
  cache: Arc<CacheCoordinator<S>>,
  sync: Arc<SyncEngine<S, R>>,
  remote: Arc<R>,
  monitor: Arc<ConnectivityMonitor>,
}

impl<S: RecordStore, R: RemoteService> DataService<S, R> {
  pub fn new(
    cache: Arc<CacheCoordinator<S>>,
    sync: Arc<SyncEngine<S, R>>,
    remote: Arc<R>,
    monitor: Arc<ConnectivityMonitor>,
  ) -> Self {
    Self {
      cache,
      sync,
      remote,
      monitor,
    }
  }

  pub fn is_online(&self) -> bool {
    self.monitor.is_online()
  }

  /// Fetch one page of a collection.
  ///
  /// 1. Unless `force_refresh`, serve a fresh cache hit
  /// 2. Offline: serve the last cached page even if expired, or an empty
  ///    page marked [`Unavailable`](crate::cache::CacheSource::Unavailable)
  /// 3. Online: fetch, cache and return; if the fetch fails, fall back to
  ///    the last cached page and only error when there is none
  pub async fn list(
    &self,
    collection: &Collection,
    request: &PageRequest,
    force_refresh: bool,
  ) -> Result<CacheResult<Page>> {
    let key = request.cache_key(collection);

    if !force_refresh {
      if let Some((page, cached_at)) = self.cache.get_entry(&key).await.and_then(decode_page) {
        return Ok(CacheResult::from_cache(page, cached_at, false));
      }
    }

    if !self.is_online() {
      let result = match self.cache.get_including_expired(&key).await.and_then(decode_page) {
        Some((page, cached_at)) => CacheResult::offline(page, cached_at),
        None => CacheResult::unavailable(Page::default()),
      };
      return Ok(result);
    }

    // A write that lands while the fetch is in flight invalidates the
    // collection; the page read before it must not be cached after it.
    let generation = self.cache.generation();
    let fetched = self
      .remote
      .list_entities(collection, request.page_size, request.cursor.as_deref())
      .await;

    match fetched {
      Ok(page) => {
        self.cache.set_if_generation(
          key,
          serde_json::to_value(&page)?,
          collection.clone(),
          generation,
        )?;
        Ok(CacheResult::from_network(page))
      }
      Err(e) => match self.cache.get_including_expired(&key).await.and_then(decode_page) {
        Some((page, cached_at)) => {
          tracing::warn!(error = %e, key = %key, "list failed, serving cached page");
          Ok(CacheResult::from_cache(page, cached_at, true))
        }
        None => Err(e.into()),
      },
    }
  }

  /// Create an entity, or queue the create when offline.
  pub async fn create(&self, collection: &Collection, payload: Value) -> Result<WriteAck> {
    if !self.is_online() {
      let kind = SyncKind::Create {
        collection: collection.clone(),
      };
      let operation_id = self.sync.enqueue(kind, payload)?;
      return Ok(WriteAck {
        id: local_id(operation_id),
        status: WriteStatus::Queued { operation_id },
      });
    }

    let id = self.remote.create_entity(collection, &payload).await?;
    self.cache.invalidate(collection.clone()).await;
    Ok(WriteAck {
      id,
      status: WriteStatus::Applied,
    })
  }

  /// Update an entity, or queue the update when offline.
  ///
  /// A `local-` id from a queued create is translated once that create has
  /// synced. Until then the update is queued behind it, online or not; when
  /// online a drain is requested so it does not wait for a reconnect.
  pub async fn update(&self, collection: &Collection, id: &str, payload: Value) -> Result<WriteAck> {
    let id = self.sync.resolve_id(id)?;

    if !self.is_online() || is_local_id(&id) {
      let kind = SyncKind::Update {
        collection: collection.clone(),
        id: id.clone(),
      };
      let operation_id = self.sync.enqueue(kind, payload)?;
      if self.is_online() {
        self.sync.request_drain();
      }
      return Ok(WriteAck {
        id,
        status: WriteStatus::Queued { operation_id },
      });
    }

    self.remote.update_entity(collection, &id, &payload).await?;
    self.cache.invalidate(collection.clone()).await;
    Ok(WriteAck {
      id,
      status: WriteStatus::Applied,
    })
  }

  pub async fn get_students(
    &self,
    request: &PageRequest,
    force_refresh: bool,
  ) -> Result<CacheResult<Page>> {
    self.list(&Collection::Students, request, force_refresh).await
  }

  pub async fn create_student(&self, payload: Value) -> Result<WriteAck> {
    self.create(&Collection::Students, payload).await
  }

  pub async fn update_student(&self, id: &str, payload: Value) -> Result<WriteAck> {
    self.update(&Collection::Students, id, payload).await
  }

  pub fn stats(&self) -> Result<EngineStats> {
    let cache = self.cache.stats();
    Ok(EngineStats {
      memory_entry_count: cache.memory_entry_count,
      memory_bytes: cache.memory_bytes,
      online: self.is_online(),
      pending_sync_count: self.sync.pending_count()?,
    })
  }
}

impl<S: RecordStore, R: RemoteService> Clone for DataService<S, R> {
  fn clone(&self) -> Self {
    Self {
      cache: Arc::clone(&self.cache),
      sync: Arc::clone(&self.sync),
      remote: Arc::clone(&self.remote),
      monitor: Arc::clone(&self.monitor),
    }
  }
}

/// Cached pages that no longer decode are treated as misses.
fn decode_page(entry: CacheEntry) -> Option<(Page, i64)> {
  match serde_json::from_value(entry.payload) {
    Ok(page) => Some((page, entry.created_at)),
    Err(e) => {
      tracing::debug!(key = %entry.key, error = %e, "ignoring undecodable cached page");
      None
    }
  }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
