//! Tests for the cache coordinator.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::*;
use crate::clock::ManualClock;
use crate::store::{IndexScan, MemoryStore, Record, StoreError, StoreResult};
use serde_json::json;

const START: i64 = 1_700_000_000_000;

fn coordinator_with(
  store: Arc<MemoryStore>,
  settings: CacheSettings,
) -> (CacheCoordinator<MemoryStore>, Arc<ManualClock>) {
  let clock = Arc::new(ManualClock::new(START));
  let coordinator = CacheCoordinator::new(store, settings, clock.clone()).unwrap();
  (coordinator, clock)
}

fn coordinator() -> (
  CacheCoordinator<MemoryStore>,
  Arc<MemoryStore>,
  Arc<ManualClock>,
) {
  let store = Arc::new(MemoryStore::new());
  let (coordinator, clock) = coordinator_with(store.clone(), CacheSettings::default());
  (coordinator, store, clock)
}

fn persisted(store: &MemoryStore, key: &str) -> Option<CacheEntry> {
  store.get_record(key).unwrap()
}

/// Store whose every call fails.
struct BrokenStore;

impl RecordStore for BrokenStore {
  fn get_record<R: Record>(&self, _key: &str) -> StoreResult<Option<R>> {
    Err(StoreError::LockPoisoned)
  }

  fn put_record<R: Record>(&self, _record: &R) -> StoreResult<()> {
    Err(StoreError::LockPoisoned)
  }

  fn delete_record<R: Record>(&self, _key: &str) -> StoreResult<bool> {
    Err(StoreError::LockPoisoned)
  }

  fn scan_by_index<R: Record>(&self, _scan: &IndexScan) -> StoreResult<Vec<R>> {
    Err(StoreError::LockPoisoned)
  }
}

#[tokio::test]
async fn set_then_get_round_trips() {
  let (cache, store, _clock) = coordinator();
  let payload = json!({ "students": [{ "name": "A" }, { "name": "B" }, { "name": "C" }] });

  cache
    .set("students_page_1", payload.clone(), Collection::Students)
    .unwrap();

  assert_eq!(cache.get("students_page_1").await, Some(payload.clone()));

  cache.flush().await;
  let stored = persisted(&store, "students_page_1").unwrap();
  assert_eq!(stored.payload, payload);
  assert_eq!(stored.created_at, START);
  assert_eq!(stored.size_bytes, serde_json::to_vec(&payload).unwrap().len());
}

#[tokio::test]
async fn expired_entries_are_absent_but_kept_until_reaped() {
  let (cache, store, clock) = coordinator();
  cache
    .set("students_page_1", json!([1, 2, 3]), Collection::Students)
    .unwrap();
  cache.flush().await;

  clock.advance(Duration::from_secs(31 * 60));

  assert_eq!(cache.get("students_page_1").await, None);
  // Still physically present in both tiers
  assert_eq!(cache.stats().memory_entry_count, 1);
  assert!(persisted(&store, "students_page_1").is_some());
  assert!(cache.get_including_expired("students_page_1").await.is_some());
}

#[tokio::test]
async fn entry_at_exactly_ttl_is_still_served() {
  let (cache, _store, clock) = coordinator();
  cache.set("k", json!(1), Collection::Grades).unwrap();

  clock.advance(DEFAULT_TTL);
  assert_eq!(cache.get("k").await, Some(json!(1)));

  clock.advance(Duration::from_millis(1));
  assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn persistent_hit_is_promoted_into_memory() {
  let store = Arc::new(MemoryStore::new());
  let entry = CacheEntry::new("payments_page_1", json!(["p1"]), Collection::Payments, START).unwrap();
  store.put_record(&entry).unwrap();

  let (cache, _clock) = coordinator_with(store, CacheSettings::default());
  assert_eq!(cache.stats().memory_entry_count, 0);

  assert_eq!(cache.get("payments_page_1").await, Some(json!(["p1"])));
  assert_eq!(cache.stats().memory_entry_count, 1);
  assert_eq!(cache.stats().memory_bytes, entry.size_bytes);
}

#[tokio::test]
async fn expired_persistent_entry_is_not_promoted() {
  let store = Arc::new(MemoryStore::new());
  let old = CacheEntry::new("k", json!(1), Collection::Grades, START - 31 * 60 * 1000).unwrap();
  store.put_record(&old).unwrap();

  let (cache, _clock) = coordinator_with(store.clone(), CacheSettings::default());

  assert_eq!(cache.get("k").await, None);
  assert_eq!(cache.stats().memory_entry_count, 0);
  // Not deleted at read time
  assert!(persisted(&store, "k").is_some());
}

#[tokio::test]
async fn invalidate_collection_clears_both_tiers_only_for_that_collection() {
  let (cache, store, _clock) = coordinator();
  cache
    .set("students_page_1", json!([1]), Collection::Students)
    .unwrap();
  cache
    .set("students_page_2", json!([2]), Collection::Students)
    .unwrap();
  cache
    .set("payments_page_1", json!([3]), Collection::Payments)
    .unwrap();

  let removed = cache.invalidate(Collection::Students).await;

  // Two from memory, two from the persistent tier
  assert_eq!(removed, 4);
  assert_eq!(cache.get("students_page_1").await, None);
  assert_eq!(cache.get("students_page_2").await, None);
  assert!(persisted(&store, "students_page_1").is_none());
  assert!(persisted(&store, "students_page_2").is_none());
  assert_eq!(cache.get("payments_page_1").await, Some(json!([3])));
  assert!(persisted(&store, "payments_page_1").is_some());
}

#[tokio::test]
async fn invalidate_by_key_fragment() {
  let (cache, store, _clock) = coordinator();
  cache
    .set("students_page_20", json!([1]), Collection::Students)
    .unwrap();
  cache
    .set("students_page_20_abc", json!([2]), Collection::Students)
    .unwrap();
  cache
    .set("teachers_page_20", json!([3]), Collection::Teachers)
    .unwrap();

  cache
    .invalidate(Invalidation::KeyContains("students_".to_string()))
    .await;

  assert_eq!(cache.stats().memory_entry_count, 1);
  assert!(persisted(&store, "teachers_page_20").is_some());
  assert!(persisted(&store, "students_page_20_abc").is_none());
}

#[tokio::test]
async fn cleanup_reaps_expired_entries_from_both_tiers() {
  let (cache, store, clock) = coordinator();
  cache.set("old", json!("x"), Collection::Classes).unwrap();
  clock.advance(Duration::from_secs(20 * 60));
  cache.set("young", json!("y"), Collection::Classes).unwrap();
  clock.advance(Duration::from_secs(15 * 60));

  let report = cache.cleanup().await;

  assert_eq!(
    report,
    CleanupReport {
      memory_evicted: 1,
      persistent_evicted: 1,
    }
  );
  assert!(persisted(&store, "old").is_none());
  assert!(persisted(&store, "young").is_some());
  assert_eq!(cache.get("young").await, Some(json!("y")));
}

#[tokio::test]
async fn over_budget_set_reaps_expired_entries_immediately() {
  let store = Arc::new(MemoryStore::new());
  let settings = CacheSettings {
    memory_budget_bytes: 64,
    ..CacheSettings::default()
  };
  let (cache, clock) = coordinator_with(store, settings);

  cache
    .set("stale", json!("a".repeat(40)), Collection::Grades)
    .unwrap();
  clock.advance(Duration::from_secs(31 * 60));

  cache
    .set("fresh", json!("b".repeat(40)), Collection::Grades)
    .unwrap();

  let stats = cache.stats();
  assert_eq!(stats.memory_entry_count, 1);
  assert!(cache.get("fresh").await.is_some());
}

#[tokio::test]
async fn over_budget_with_live_entries_keeps_them() {
  let store = Arc::new(MemoryStore::new());
  let settings = CacheSettings {
    memory_budget_bytes: 16,
    ..CacheSettings::default()
  };
  let (cache, _clock) = coordinator_with(store, settings);

  cache.set("a", json!("a".repeat(20)), Collection::Grades).unwrap();
  cache.set("b", json!("b".repeat(20)), Collection::Grades).unwrap();

  assert_eq!(cache.stats().memory_entry_count, 2);
  assert!(cache.stats().memory_bytes > 16);
}

#[tokio::test]
async fn storage_failures_never_reach_the_caller() {
  let clock = Arc::new(ManualClock::new(START));
  let cache =
    CacheCoordinator::new(Arc::new(BrokenStore), CacheSettings::default(), clock).unwrap();

  cache.set("k", json!({ "v": 1 }), Collection::Students).unwrap();
  cache.flush().await;

  assert_eq!(cache.get("k").await, Some(json!({ "v": 1 })));
  assert_eq!(cache.get("missing").await, None);
  assert_eq!(cache.invalidate(Collection::Students).await, 1);
  assert_eq!(cache.cleanup().await, CleanupReport::default());
}

#[tokio::test]
async fn later_set_wins_in_persistent_tier() {
  let (cache, store, clock) = coordinator();
  for i in 0..20 {
    clock.advance(Duration::from_millis(1));
    cache.set("k", json!(i), Collection::Students).unwrap();
  }
  cache.flush().await;

  let stored = persisted(&store, "k").unwrap();
  assert_eq!(stored.payload, json!(19));
  assert_eq!(cache.get_including_expired("k").await.unwrap(), stored);
}

#[tokio::test(start_paused = true)]
async fn reaper_runs_on_its_interval() {
  let store = Arc::new(MemoryStore::new());
  let (cache, clock) = coordinator_with(store.clone(), CacheSettings::default());
  let cache = Arc::new(cache);

  cache.set("k", json!(1), Collection::Students).unwrap();
  cache.flush().await;
  clock.advance(Duration::from_secs(31 * 60));

  let reaper = cache.spawn_reaper();
  tokio::time::sleep(DEFAULT_CLEANUP_INTERVAL + Duration::from_secs(1)).await;
  cache.flush().await;

  assert_eq!(cache.stats().memory_entry_count, 0);
  assert!(persisted(&store, "k").is_none());
  reaper.abort();
}

#[tokio::test]
async fn fill_read_before_an_invalidation_is_discarded() {
  let (cache, store, _clock) = coordinator();
  let generation = cache.generation();

  cache.invalidate(Collection::Students).await;

  let stored = cache
    .set_if_generation("students_page_1", json!(["old"]), Collection::Students, generation)
    .unwrap();
  assert!(!stored);
  cache.flush().await;
  assert_eq!(cache.get("students_page_1").await, None);
  assert!(persisted(&store, "students_page_1").is_none());

  let stored = cache
    .set_if_generation(
      "students_page_1",
      json!(["new"]),
      Collection::Students,
      cache.generation(),
    )
    .unwrap();
  assert!(stored);
  assert_eq!(cache.get("students_page_1").await, Some(json!(["new"])));
}

#[tokio::test]
async fn promotion_over_budget_reaps_expired_entries() {
  let store = Arc::new(MemoryStore::new());
  let settings = CacheSettings {
    memory_budget_bytes: 64,
    ..CacheSettings::default()
  };
  let (cache, clock) = coordinator_with(store.clone(), settings);

  cache
    .set("stale", json!("a".repeat(40)), Collection::Grades)
    .unwrap();
  cache.flush().await;
  clock.advance(Duration::from_secs(31 * 60));

  let fresh = CacheEntry::new(
    "fresh",
    json!("b".repeat(40)),
    Collection::Grades,
    clock.now_ms(),
  )
  .unwrap();
  store.put_record(&fresh).unwrap();

  assert!(cache.get("fresh").await.is_some());
  let stats = cache.stats();
  assert_eq!(stats.memory_entry_count, 1);
  assert_eq!(stats.memory_bytes, fresh.size_bytes);
}

/// Store whose reads wait until two of them are in flight at once.
struct RendezvousStore {
  inner: MemoryStore,
  reads: std::sync::Barrier,
}

impl RecordStore for RendezvousStore {
  fn get_record<R: Record>(&self, key: &str) -> StoreResult<Option<R>> {
    self.reads.wait();
    self.inner.get_record(key)
  }

  fn put_record<R: Record>(&self, record: &R) -> StoreResult<()> {
    self.inner.put_record(record)
  }

  fn delete_record<R: Record>(&self, key: &str) -> StoreResult<bool> {
    self.inner.delete_record::<R>(key)
  }

  fn scan_by_index<R: Record>(&self, scan: &IndexScan) -> StoreResult<Vec<R>> {
    self.inner.scan_by_index(scan)
  }
}

#[tokio::test(flavor = "current_thread")]
async fn persistent_reads_do_not_block_the_runtime() {
  let inner = MemoryStore::new();
  for key in ["a", "b"] {
    let entry = CacheEntry::new(key, json!(key), Collection::Grades, START).unwrap();
    inner.put_record(&entry).unwrap();
  }
  let store = Arc::new(RendezvousStore {
    inner,
    reads: std::sync::Barrier::new(2),
  });
  let clock = Arc::new(ManualClock::new(START));
  let cache = CacheCoordinator::new(store, CacheSettings::default(), clock).unwrap();

  // Both reads must be parked on blocking threads for either to finish
  let (a, b) = tokio::join!(cache.get("a"), cache.get("b"));

  assert_eq!(a, Some(json!("a")));
  assert_eq!(b, Some(json!("b")));
}
