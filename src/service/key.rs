//! Cache keys for collection listings.

use sha2::{Digest, Sha256};

use crate::collection::Collection;

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Shape of a list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub page_size: u32,
  /// Opaque cursor from the previous page; `None` for the first page
  pub cursor: Option<String>,
}

impl PageRequest {
  pub fn first(page_size: u32) -> Self {
    Self {
      page_size,
      cursor: None,
    }
  }

  pub fn after(page_size: u32, cursor: impl Into<String>) -> Self {
    Self {
      page_size,
      cursor: Some(cursor.into()),
    }
  }

  /// Cache key for this page of `collection`.
  ///
  /// `students_page_20` for the first page; later pages append a digest of
  /// the cursor so arbitrary cursor strings give short, stable keys.
  pub fn cache_key(&self, collection: &Collection) -> String {
    let base = format!("{}_page_{}", collection, self.page_size);
    match &self.cursor {
      None => base,
      Some(cursor) => format!("{}_{}", base, cursor_digest(cursor)),
    }
  }
}

impl Default for PageRequest {
  fn default() -> Self {
    Self::first(DEFAULT_PAGE_SIZE)
  }
}

fn cursor_digest(cursor: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(cursor.as_bytes());
  let mut digest = hex::encode(hasher.finalize());
  digest.truncate(16);
  digest
}

#[cfg(test)]
#[path = "key_tests.rs"]
mod tests;
