//! Read-through / write-through coordination of the two cache tiers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::entry::CacheEntry;
use super::memory::MemoryTier;
use super::persistent::PersistentTier;
use crate::clock::Clock;
use crate::collection::Collection;
use crate::store::{RecordStore, StoreError, StoreResult};

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default memory tier budget.
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 50 * 1024 * 1024;

/// Default interval between background reaper runs.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Tunables for the cache coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
  /// How long an entry may be served after it was written
  pub ttl: Duration,
  /// Memory tier size above which a cleanup runs immediately
  pub memory_budget_bytes: usize,
  /// Period of the background reaper
  pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      ttl: DEFAULT_TTL,
      memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
      cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
    }
  }
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
  /// Every entry tagged with the collection
  Collection(Collection),
  /// Every entry whose key contains the substring
  KeyContains(String),
}

impl Invalidation {
  pub fn matches(&self, entry: &CacheEntry) -> bool {
    match self {
      Self::Collection(collection) => entry.collection == *collection,
      Self::KeyContains(fragment) => entry.key.contains(fragment.as_str()),
    }
  }
}

impl From<Collection> for Invalidation {
  fn from(collection: Collection) -> Self {
    Self::Collection(collection)
  }
}

/// Entries removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
  pub memory_evicted: usize,
  pub persistent_evicted: usize,
}

/// Snapshot of memory tier occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub memory_entry_count: usize,
  pub memory_bytes: usize,
}

struct MemoryState {
  tier: MemoryTier,
  /// Bumped by every invalidation so in-flight promotions can tell they
  /// read from the persistent tier before it was cleared.
  generation: u64,
}

/// Cache coordinator owning the memory and persistent tiers.
pub struct CacheCoordinator<S: RecordStore> {
  memory: Mutex<MemoryState>,
  persistent: PersistentTier<S>,
  clock: Arc<dyn Clock>,
  settings: CacheSettings,
}

impl<S: RecordStore> CacheCoordinator<S> {
  /// Create a coordinator over the given store.
  pub fn new(store: Arc<S>, settings: CacheSettings, clock: Arc<dyn Clock>) -> StoreResult<Self> {
    let persistent = PersistentTier::start(store).map_err(StoreError::Io)?;

    Ok(Self {
      memory: Mutex::new(MemoryState {
        tier: MemoryTier::new(),
        generation: 0,
      }),
      persistent,
      clock,
      settings,
    })
  }

  pub fn settings(&self) -> &CacheSettings {
    &self.settings
  }

  fn ttl_ms(&self) -> i64 {
    i64::try_from(self.settings.ttl.as_millis()).unwrap_or(i64::MAX)
  }

  fn memory(&self) -> MutexGuard<'_, MemoryState> {
    // The tier is plain data; a panic elsewhere cannot leave it half-updated.
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up a payload that is still within its TTL.
  pub async fn get(&self, key: &str) -> Option<Value> {
    self.get_entry(key).await.map(|entry| entry.payload)
  }

  /// Look up an unexpired entry, promoting persistent hits into memory.
  pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let now = self.clock.now_ms();
    let ttl = self.ttl_ms();

    let generation = {
      let memory = self.memory();
      if let Some(entry) = memory.tier.get(key) {
        if !entry.is_expired(now, ttl) {
          return Some(entry.clone());
        }
      }
      memory.generation
    };

    // Expired entries stay where they are until the reaper gets to them.
    let entry = self.read_persistent(key).await?;
    if entry.is_expired(now, ttl) {
      return None;
    }

    self.promote(entry.clone(), generation);
    Some(entry)
  }

  /// Look up an entry regardless of its age.
  ///
  /// Used to serve last-known data when the remote service cannot be
  /// reached.
  pub async fn get_including_expired(&self, key: &str) -> Option<CacheEntry> {
    let in_memory = self.memory().tier.get(key).cloned();
    match in_memory {
      Some(entry) => Some(entry),
      None => self.read_persistent(key).await,
    }
  }

  async fn read_persistent(&self, key: &str) -> Option<CacheEntry> {
    match self.persistent.get(key).await {
      Ok(entry) => entry,
      Err(e) => {
        tracing::warn!(key, error = %e, "persistent cache read failed, treating as miss");
        None
      }
    }
  }

  fn promote(&self, entry: CacheEntry, read_generation: u64) {
    let over_budget = {
      let mut memory = self.memory();
      if memory.generation != read_generation {
        return;
      }
      // Never replace a newer entry written while the persistent read ran.
      let newer_in_memory = memory
        .tier
        .get(&entry.key)
        .is_some_and(|current| current.created_at >= entry.created_at);
      if newer_in_memory {
        return;
      }
      memory.tier.insert(entry);
      memory.tier.total_bytes() > self.settings.memory_budget_bytes
    };

    if over_budget {
      self.relieve_memory_pressure();
    }
  }

  /// Current invalidation generation.
  ///
  /// Pass it to [`set_if_generation`](Self::set_if_generation) to store a
  /// value read from the remote service only if no invalidation ran since.
  pub fn generation(&self) -> u64 {
    self.memory().generation
  }

  /// Store a payload in both tiers.
  ///
  /// The memory tier is updated before returning; the persistent write
  /// happens in the background and only logs on failure.
  pub fn set(
    &self,
    key: impl Into<String>,
    payload: Value,
    collection: Collection,
  ) -> serde_json::Result<()> {
    let entry = CacheEntry::new(key, payload, collection, self.clock.now_ms())?;
    self.store_entry(entry, None);
    Ok(())
  }

  /// Like [`set`](Self::set), but a no-op if any invalidation ran after
  /// `generation` was read. Returns whether the entry was stored.
  pub fn set_if_generation(
    &self,
    key: impl Into<String>,
    payload: Value,
    collection: Collection,
    generation: u64,
  ) -> serde_json::Result<bool> {
    let entry = CacheEntry::new(key, payload, collection, self.clock.now_ms())?;
    let stored = self.store_entry(entry, Some(generation));
    if !stored {
      tracing::debug!("skipping cache fill read before an invalidation");
    }
    Ok(stored)
  }

  fn store_entry(&self, entry: CacheEntry, expected_generation: Option<u64>) -> bool {
    let over_budget = {
      let mut memory = self.memory();
      if expected_generation.is_some_and(|g| g != memory.generation) {
        return false;
      }
      memory.tier.insert(entry.clone());
      // Queued under the lock so a later invalidation is ordered after it.
      self.persistent.put(entry);
      memory.tier.total_bytes() > self.settings.memory_budget_bytes
    };

    if over_budget {
      self.relieve_memory_pressure();
    }
    true
  }

  /// Drop expired entries right away instead of waiting for the reaper.
  ///
  /// Bounding is advisory: live entries are never evicted to get under
  /// budget.
  fn relieve_memory_pressure(&self) {
    let now = self.clock.now_ms();
    let ttl = self.ttl_ms();

    let (evicted, remaining) = {
      let mut memory = self.memory();
      let evicted = memory.tier.remove_expired(now, ttl);
      (evicted, memory.tier.total_bytes())
    };
    self.persistent.reap_in_background(now.saturating_sub(ttl));

    if remaining > self.settings.memory_budget_bytes {
      tracing::warn!(
        evicted,
        memory_bytes = remaining,
        budget = self.settings.memory_budget_bytes,
        "memory cache still over budget after cleanup"
      );
    } else {
      tracing::debug!(evicted, "memory cache back under budget");
    }
  }

  /// Remove every matching entry from both tiers.
  ///
  /// Returns the number of entries removed from the memory tier and the
  /// persistent tier combined.
  pub async fn invalidate(&self, target: impl Into<Invalidation>) -> usize {
    let target = target.into();

    let first_pass = {
      let mut memory = self.memory();
      memory.generation += 1;
      memory.tier.invalidate(&target)
    };

    let persistent_removed = self.persistent.invalidate(target.clone()).await;

    // Catch anything promoted from the persistent tier while it was being
    // cleared.
    let second_pass = {
      let mut memory = self.memory();
      memory.generation += 1;
      memory.tier.invalidate(&target)
    };

    tracing::debug!(
      invalidation = ?target,
      memory = first_pass + second_pass,
      persistent = persistent_removed,
      "invalidated cache entries"
    );

    first_pass + second_pass + persistent_removed
  }

  /// Collection invalidation as a callback, for writes that reach the
  /// remote service outside the facade.
  pub fn invalidation_hook(
    self: &Arc<Self>,
  ) -> impl Fn(Collection) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    let coordinator = Arc::clone(self);
    move |collection| {
      let coordinator = Arc::clone(&coordinator);
      async move {
        coordinator.invalidate(collection).await;
      }
      .boxed()
    }
  }

  /// Evict expired entries from both tiers.
  pub async fn cleanup(&self) -> CleanupReport {
    let now = self.clock.now_ms();
    let ttl = self.ttl_ms();

    let memory_evicted = self.memory().tier.remove_expired(now, ttl);
    let persistent_evicted = self.persistent.reap(now.saturating_sub(ttl)).await;

    CleanupReport {
      memory_evicted,
      persistent_evicted,
    }
  }

  /// Wait for all queued persistent writes to be applied.
  pub async fn flush(&self) {
    self.persistent.flush().await;
  }

  pub fn stats(&self) -> CacheStats {
    let memory = self.memory();
    CacheStats {
      memory_entry_count: memory.tier.len(),
      memory_bytes: memory.tier.total_bytes(),
    }
  }

  /// Run [`cleanup`](Self::cleanup) every `cleanup_interval` until aborted.
  pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    let period = self.settings.cleanup_interval;

    tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // First tick fires immediately
      interval.tick().await;

      loop {
        interval.tick().await;
        let report = coordinator.cleanup().await;
        if report.memory_evicted > 0 || report.persistent_evicted > 0 {
          tracing::info!(
            memory = report.memory_evicted,
            persistent = report.persistent_evicted,
            "reaped expired cache entries"
          );
        }
      }
    })
  }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
