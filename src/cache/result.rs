//! Read results annotated with where the data came from.

use chrono::{DateTime, TimeZone, Utc};

/// Result from a cached read, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at_ms: i64, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: timestamp(cached_at_ms),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at_ms: i64) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: timestamp(cached_at_ms),
    }
  }

  /// Offline with nothing cached; `data` is an empty placeholder.
  pub fn unavailable(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Unavailable,
      cached_at: None,
    }
  }

  /// Whether the result carries real data.
  pub fn is_available(&self) -> bool {
    self.source != CacheSource::Unavailable
  }
}

fn timestamp(ms: i64) -> Option<DateTime<Utc>> {
  Utc.timestamp_millis_opt(ms).single()
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, served because the network fetch failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Offline mode with no cached data at all
  Unavailable,
}
