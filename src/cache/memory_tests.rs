//! Tests for the memory tier.

#![allow(clippy::unwrap_used)]

use super::*;
use crate::collection::Collection;
use serde_json::json;

fn entry(key: &str, collection: Collection, created_at: i64) -> CacheEntry {
  CacheEntry::new(key, json!({ "items": [1, 2, 3] }), collection, created_at).unwrap()
}

#[test]
fn tracks_bytes_across_replace_and_remove() {
  let mut tier = MemoryTier::new();
  let a = entry("a", Collection::Students, 0);
  let size = a.size_bytes;

  tier.insert(a.clone());
  tier.insert(a);
  assert_eq!(tier.len(), 1);
  assert_eq!(tier.total_bytes(), size);

  tier.insert(
    CacheEntry::new("a", json!("short"), Collection::Students, 1).unwrap(),
  );
  assert_eq!(tier.total_bytes(), "\"short\"".len());

  tier.remove("a").unwrap();
  assert!(tier.is_empty());
  assert_eq!(tier.total_bytes(), 0);
}

#[test]
fn invalidate_by_collection_leaves_other_collections() {
  let mut tier = MemoryTier::new();
  tier.insert(entry("students_page_1", Collection::Students, 0));
  tier.insert(entry("students_page_2", Collection::Students, 0));
  tier.insert(entry("payments_page_1", Collection::Payments, 0));

  let removed = tier.invalidate(&Invalidation::Collection(Collection::Students));

  assert_eq!(removed, 2);
  assert!(tier.get("payments_page_1").is_some());
  assert_eq!(tier.total_bytes(), tier.get("payments_page_1").unwrap().size_bytes);
}

#[test]
fn invalidate_by_key_substring() {
  let mut tier = MemoryTier::new();
  tier.insert(entry("students_page_1", Collection::Students, 0));
  tier.insert(entry("students_page_2", Collection::Students, 0));

  let removed = tier.invalidate(&Invalidation::KeyContains("page_2".to_string()));

  assert_eq!(removed, 1);
  assert!(tier.get("students_page_1").is_some());
}

#[test]
fn remove_expired_only_drops_old_entries() {
  let mut tier = MemoryTier::new();
  tier.insert(entry("old", Collection::Grades, 0));
  tier.insert(entry("new", Collection::Grades, 900));

  let removed = tier.remove_expired(1_000, 500);

  assert_eq!(removed, 1);
  assert!(tier.get("old").is_none());
  assert!(tier.get("new").is_some());
}
