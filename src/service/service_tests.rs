//! Tests for the data service facade.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::*;
use crate::cache::{CacheSettings, CacheSource};
use crate::clock::ManualClock;
use crate::remote::{InMemoryRemote, RemoteCall, RemoteError, RemoteFuture};
use crate::store::MemoryStore;
use futures::FutureExt;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

struct Harness {
  service: DataService<MemoryStore, InMemoryRemote>,
  remote: Arc<InMemoryRemote>,
  monitor: Arc<ConnectivityMonitor>,
  sync: Arc<SyncEngine<MemoryStore, InMemoryRemote>>,
  clock: Arc<ManualClock>,
}

type Parts<R> = (
  DataService<MemoryStore, R>,
  Arc<SyncEngine<MemoryStore, R>>,
  Arc<ConnectivityMonitor>,
  Arc<ManualClock>,
);

fn build<R: RemoteService>(remote: Arc<R>, online: bool) -> Parts<R> {
  let store = Arc::new(MemoryStore::new());
  let monitor = Arc::new(ConnectivityMonitor::new(online));
  let clock = Arc::new(ManualClock::new(1_700_000_000_000));

  let cache = Arc::new(
    CacheCoordinator::new(Arc::clone(&store), CacheSettings::default(), clock.clone()).unwrap(),
  );
  let sync = Arc::new(
    SyncEngine::new(store, Arc::clone(&remote), Arc::clone(&monitor), clock.clone())
      .unwrap()
      .on_replayed(cache.invalidation_hook()),
  );
  let service = DataService::new(cache, Arc::clone(&sync), remote, Arc::clone(&monitor));
  (service, sync, monitor, clock)
}

fn harness(online: bool) -> Harness {
  let remote = Arc::new(InMemoryRemote::new());
  let (service, sync, monitor, clock) = build(Arc::clone(&remote), online);

  Harness {
    service,
    remote,
    monitor,
    sync,
    clock,
  }
}

fn list_calls(remote: &InMemoryRemote) -> usize {
  remote
    .calls()
    .iter()
    .filter(|call| matches!(call, RemoteCall::List { .. }))
    .count()
}

#[tokio::test]
async fn test_list_reads_through_cache() {
  let h = harness(true);
  h.remote.seed(Collection::Students, json!({ "name": "A" }));
  let request = PageRequest::default();

  let first = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(first.source, CacheSource::Network);
  assert_eq!(first.data.items, vec![json!({ "name": "A" })]);

  let second = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(second.source, CacheSource::CacheFresh);
  assert_eq!(second.data, first.data);
  assert_eq!(list_calls(&h.remote), 1);
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
  let h = harness(true);
  let request = PageRequest::default();

  h.service.get_students(&request, false).await.unwrap();
  let refreshed = h.service.get_students(&request, true).await.unwrap();

  assert_eq!(refreshed.source, CacheSource::Network);
  assert_eq!(list_calls(&h.remote), 2);
}

#[tokio::test]
async fn test_expired_page_is_refetched() {
  let h = harness(true);
  let request = PageRequest::default();

  h.service.get_students(&request, false).await.unwrap();
  h.clock.advance(Duration::from_secs(31 * 60));
  let again = h.service.get_students(&request, false).await.unwrap();

  assert_eq!(again.source, CacheSource::Network);
  assert_eq!(list_calls(&h.remote), 2);
}

#[tokio::test]
async fn test_offline_list_serves_expired_cache() {
  let h = harness(true);
  h.remote.seed(Collection::Students, json!({ "name": "A" }));
  let request = PageRequest::default();
  h.service.get_students(&request, false).await.unwrap();

  h.clock.advance(Duration::from_secs(60 * 60));
  h.monitor.set_online(false);

  let result = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(result.source, CacheSource::Offline);
  assert_eq!(result.data.items.len(), 1);
  assert!(result.cached_at.is_some());
  assert_eq!(list_calls(&h.remote), 1);
}

#[tokio::test]
async fn test_offline_list_without_cache_is_unavailable() {
  let h = harness(false);

  let result = h.service.get_students(&PageRequest::default(), false).await.unwrap();
  assert_eq!(result.source, CacheSource::Unavailable);
  assert!(!result.is_available());
  assert!(result.data.items.is_empty());
  assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_remote_failure_falls_back_to_stale_cache() {
  let h = harness(true);
  let request = PageRequest::default();
  h.service.get_students(&request, false).await.unwrap();

  h.remote.set_failing(true);
  let result = h.service.get_students(&request, true).await.unwrap();
  assert_eq!(result.source, CacheSource::CacheStale);
}

#[tokio::test]
async fn test_remote_failure_without_cache_is_an_error() {
  let h = harness(true);
  h.remote.set_failing(true);

  let err = h
    .service
    .get_students(&PageRequest::default(), false)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Remote(_)));
}

#[tokio::test]
async fn test_online_write_invalidates_collection() {
  let h = harness(true);
  let id = h.remote.seed(Collection::Students, json!({ "name": "A" }));
  let request = PageRequest::default();
  h.service.get_students(&request, false).await.unwrap();

  let ack = h
    .service
    .update_student(&id, json!({ "name": "B" }))
    .await
    .unwrap();
  assert_eq!(ack.status, WriteStatus::Applied);
  assert_eq!(ack.id, id);

  let result = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(result.source, CacheSource::Network);
  assert_eq!(result.data.items, vec![json!({ "name": "B" })]);
  assert_eq!(list_calls(&h.remote), 2);
}

#[tokio::test]
async fn test_online_write_failure_is_not_queued() {
  let h = harness(true);
  h.remote.set_failing(true);

  let result = h.service.create_student(json!({ "name": "A" })).await;
  assert!(matches!(result, Err(crate::Error::Remote(_))));
  assert_eq!(h.sync.pending_count().unwrap(), 0);
}

#[tokio::test]
async fn test_offline_create_is_queued_with_local_id() {
  let h = harness(false);

  let ack = h.service.create_student(json!({ "name": "A" })).await.unwrap();
  assert!(ack.is_queued());
  assert_eq!(ack.status, WriteStatus::Queued { operation_id: 1 });
  assert_eq!(ack.id, "local-1");
  assert!(h.remote.calls().is_empty());
  assert_eq!(h.service.stats().unwrap().pending_sync_count, 1);
}

#[tokio::test]
async fn test_offline_write_leaves_cache_untouched() {
  let h = harness(true);
  let request = PageRequest::default();
  h.service.get_students(&request, false).await.unwrap();
  let before = h.service.stats().unwrap().memory_entry_count;

  h.monitor.set_online(false);
  h.service.create_student(json!({ "name": "A" })).await.unwrap();

  let cached = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(cached.source, CacheSource::CacheFresh);
  assert!(cached.data.items.is_empty());
  assert_eq!(h.service.stats().unwrap().memory_entry_count, before);
}

#[tokio::test]
async fn test_update_of_unsynced_local_id_is_queued_even_online() {
  let h = harness(false);
  let created = h.service.create_student(json!({ "name": "A" })).await.unwrap();

  h.monitor.set_online(true);
  let ack = h
    .service
    .update_student(&created.id, json!({ "name": "A2" }))
    .await
    .unwrap();

  assert!(ack.is_queued());
  assert!(h.remote.calls().is_empty());
  assert_eq!(h.sync.pending_count().unwrap(), 2);
}

#[tokio::test]
async fn test_update_of_synced_local_id_goes_to_server_id() {
  let h = harness(false);
  let created = h.service.create_student(json!({ "name": "A" })).await.unwrap();

  h.monitor.set_online(true);
  h.sync.drain().await.unwrap();

  let ack = h
    .service
    .update_student(&created.id, json!({ "name": "A2" }))
    .await
    .unwrap();
  let server_id = h.remote.entities(&Collection::Students)[0].0.clone();

  assert_eq!(ack.status, WriteStatus::Applied);
  assert_eq!(ack.id, server_id);
}

#[tokio::test]
async fn test_stats() {
  let h = harness(true);
  h.service.get_students(&PageRequest::default(), false).await.unwrap();

  let stats = h.service.stats().unwrap();
  assert_eq!(stats.memory_entry_count, 1);
  assert!(stats.memory_bytes > 0);
  assert!(stats.online);
  assert_eq!(stats.pending_sync_count, 0);
}

/// Remote whose list reads its data, then waits at a gate before answering.
struct GatedListRemote {
  inner: InMemoryRemote,
  gate: Semaphore,
  parked: AtomicBool,
}

impl RemoteService for GatedListRemote {
  fn create_entity<'a>(
    &'a self,
    collection: &'a Collection,
    payload: &'a Value,
  ) -> RemoteFuture<'a, String> {
    self.inner.create_entity(collection, payload)
  }

  fn update_entity<'a>(
    &'a self,
    collection: &'a Collection,
    id: &'a str,
    payload: &'a Value,
  ) -> RemoteFuture<'a, ()> {
    self.inner.update_entity(collection, id, payload)
  }

  fn list_entities<'a>(
    &'a self,
    collection: &'a Collection,
    page_size: u32,
    cursor: Option<&'a str>,
  ) -> RemoteFuture<'a, Page> {
    async move {
      let page = self.inner.list_entities(collection, page_size, cursor).await;
      self.parked.store(true, Ordering::SeqCst);
      let _permit = self
        .gate
        .acquire()
        .await
        .map_err(|_| RemoteError::Unavailable("gate closed".to_string()))?;
      page
    }
    .boxed()
  }
}

#[tokio::test]
async fn test_page_read_before_a_write_is_not_cached_after_it() {
  let remote = Arc::new(GatedListRemote {
    inner: InMemoryRemote::new(),
    gate: Semaphore::new(0),
    parked: AtomicBool::new(false),
  });
  let id = remote.inner.seed(Collection::Students, json!({ "name": "A" }));
  let (service, _sync, _monitor, _clock) = build(Arc::clone(&remote), true);
  let request = PageRequest::default();

  let in_flight = tokio::spawn({
    let service = service.clone();
    let request = request.clone();
    async move { service.get_students(&request, false).await }
  });
  while !remote.parked.load(Ordering::SeqCst) {
    tokio::task::yield_now().await;
  }

  let ack = service
    .update_student(&id, json!({ "name": "B" }))
    .await
    .unwrap();
  assert_eq!(ack.status, WriteStatus::Applied);

  remote.gate.add_permits(1);
  let stale = in_flight.await.unwrap().unwrap();
  assert_eq!(stale.data.items, vec![json!({ "name": "A" })]);

  let fresh = service.get_students(&request, false).await.unwrap();
  assert_eq!(fresh.source, CacheSource::Network);
  assert_eq!(fresh.data.items, vec![json!({ "name": "B" })]);
  assert_eq!(list_calls(&remote.inner), 2);
}

#[tokio::test]
async fn test_replayed_writes_invalidate_cached_pages() {
  let h = harness(true);
  h.remote.seed(Collection::Students, json!({ "name": "A" }));
  let request = PageRequest::default();

  let before = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(before.data.items.len(), 1);

  h.monitor.set_online(false);
  h.service.create_student(json!({ "name": "B" })).await.unwrap();
  h.monitor.set_online(true);
  h.sync.drain().await.unwrap();

  let after = h.service.get_students(&request, false).await.unwrap();
  assert_eq!(after.source, CacheSource::Network);
  assert_eq!(after.data.items.len(), 2);
  assert_eq!(list_calls(&h.remote), 2);
}

#[tokio::test]
async fn test_online_update_of_queued_create_syncs_without_manual_drain() {
  let h = harness(false);
  let created = h.service.create_student(json!({ "name": "A" })).await.unwrap();

  // No reconnect listener in this harness
  h.monitor.set_online(true);
  let ack = h
    .service
    .update_student(&created.id, json!({ "name": "A2" }))
    .await
    .unwrap();
  assert!(ack.is_queued());

  for _ in 0..200 {
    if h.sync.pending_count().unwrap() == 0 {
      break;
    }
    tokio::task::yield_now().await;
  }

  assert_eq!(h.sync.pending_count().unwrap(), 0);
  let entities = h.remote.entities(&Collection::Students);
  assert_eq!(entities.len(), 1);
  assert_eq!(entities[0].1, json!({ "name": "A2" }));
}
