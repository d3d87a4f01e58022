//! In-process cache tier with byte accounting.

use std::collections::HashMap;

use super::entry::CacheEntry;
use super::Invalidation;

/// Key to entry map that tracks the total payload size it holds.
///
/// Not synchronized; the coordinator owns it behind a lock.
#[derive(Debug, Default)]
pub struct MemoryTier {
  entries: HashMap<String, CacheEntry>,
  total_bytes: usize,
}

impl MemoryTier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<&CacheEntry> {
    self.entries.get(key)
  }

  /// Insert or replace an entry, keeping the byte total in step.
  pub fn insert(&mut self, entry: CacheEntry) {
    self.total_bytes += entry.size_bytes;
    if let Some(previous) = self.entries.insert(entry.key.clone(), entry) {
      self.total_bytes -= previous.size_bytes;
    }
  }

  pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    let removed = self.entries.remove(key)?;
    self.total_bytes -= removed.size_bytes;
    Some(removed)
  }

  /// Remove every entry matching the invalidation target.
  pub fn invalidate(&mut self, target: &Invalidation) -> usize {
    self.remove_where(|entry| target.matches(entry))
  }

  /// Remove every entry older than `ttl_ms`.
  pub fn remove_expired(&mut self, now_ms: i64, ttl_ms: i64) -> usize {
    self.remove_where(|entry| entry.is_expired(now_ms, ttl_ms))
  }

  fn remove_where(&mut self, mut predicate: impl FnMut(&CacheEntry) -> bool) -> usize {
    let before = self.entries.len();
    let mut freed = 0;
    self.entries.retain(|_, entry| {
      if predicate(entry) {
        freed += entry.size_bytes;
        false
      } else {
        true
      }
    });
    self.total_bytes -= freed;
    before - self.entries.len()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn total_bytes(&self) -> usize {
    self.total_bytes
  }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
