//! Two-tier cache for remote query results.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Keeps recently used entries in memory, bounded by a byte budget
//! - Mirrors every entry to a durable store that survives restarts
//! - Treats entries older than the TTL as absent, reaping them periodically
//! - Invalidates whole collections at once so writes become visible on the
//!   next read

mod coordinator;
mod entry;
mod memory;
mod persistent;
mod result;

pub use coordinator::{
  CacheCoordinator, CacheSettings, CacheStats, CleanupReport, Invalidation,
  DEFAULT_CLEANUP_INTERVAL, DEFAULT_MEMORY_BUDGET_BYTES, DEFAULT_TTL,
};
pub use entry::CacheEntry;
pub use memory::MemoryTier;
pub use result::{CacheResult, CacheSource};
