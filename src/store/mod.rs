// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local content store for offsync
//!
//! Persistent cache of content items keyed by identifier, with free-text
//! search, an append-only sync activity log and derived storage statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ SyncOrchestrator│────▶│ LocalStore      │
//! │ (commit/clear)  │     │ (stamps, search)│
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │ Substrate       │
//!                         │ (file / memory) │
//!                         └─────────────────┘
//! ```
//!
//! Every storage fault surfaces as a [`StoreError`]. Callers treat it as
//! recoverable; nothing in here panics or exits.

pub mod eviction;
pub mod log;
pub mod substrate;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::types::{total_size_kb, Category, ContentItem};
use crate::utils::format_bytes;

pub use eviction::{evict, plan_eviction};
pub use log::{Outcome, SyncLogEntry, Trigger};
pub use substrate::{FileSubstrate, MemorySubstrate, Substrate};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage quota exceeded: need {needed} bytes, capacity is {capacity} bytes")]
    QuotaExceeded { needed: u64, capacity: u64 },

    #[error("cache is corrupt: {0}")]
    Corrupt(String),

    #[error("timed out waiting for cache lock after {0:?}")]
    LockTimeout(Duration),
}

/// What a single `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
    /// The stored copy has a higher version; nothing was written.
    Stale,
}

/// Derived usage figures for display.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    pub item_count: usize,
    /// Sum of item size estimates
    pub total_kb: u64,
    pub used_bytes: Option<u64>,
    /// `used_bytes` formatted, or "unknown"
    pub used: String,
    pub quota_bytes: Option<u64>,
    /// Share of the quota in use, 0 when either side is unknown
    pub percent_used: f64,
    pub per_category: BTreeMap<Category, usize>,
}

/// The local content cache.
///
/// Cheap to clone; clones share the same substrate.
#[derive(Clone)]
pub struct LocalStore {
    substrate: Arc<dyn Substrate>,
}

impl LocalStore {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self { substrate }
    }

    /// Open a file-backed store in `dir`.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let substrate = FileSubstrate::open(dir)?;
        tracing::info!(dir = %dir.display(), "opened local store");
        Ok(Self::new(Arc::new(substrate)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySubstrate::new()))
    }

    /// Upsert one item, stamping `cached_at`.
    pub fn put(&self, item: ContentItem) -> StoreResult<PutOutcome> {
        let existing = self.versions()?.get(&item.id).copied();
        let outcome = match existing {
            Some(version) if version > item.version => return Ok(PutOutcome::Stale),
            Some(_) => PutOutcome::Updated,
            None => PutOutcome::Inserted,
        };
        self.substrate.put_many(vec![stamp(item)])?;
        Ok(outcome)
    }

    /// Upsert a batch in a single substrate write. Items older than the
    /// stored copy are skipped. Returns how many were written.
    pub fn put_many(&self, items: Vec<ContentItem>) -> StoreResult<usize> {
        let versions = self.versions()?;
        let fresh: Vec<ContentItem> = items
            .into_iter()
            .filter(|item| match versions.get(&item.id) {
                Some(&stored) if stored > item.version => {
                    tracing::debug!(id = %item.id, stored, incoming = item.version, "skipping stale write");
                    false
                }
                _ => true,
            })
            .map(stamp)
            .collect();
        let written = fresh.len();
        if written > 0 {
            self.substrate.put_many(fresh)?;
        }
        Ok(written)
    }

    pub fn get_all(&self) -> StoreResult<Vec<ContentItem>> {
        self.substrate.get_all()
    }

    /// Stored version per identifier.
    pub fn versions(&self) -> StoreResult<HashMap<String, u64>> {
        Ok(self
            .substrate
            .get_all()?
            .into_iter()
            .map(|item| (item.id, item.version))
            .collect())
    }

    /// Case-insensitive match on title, excerpt or category. An empty query
    /// returns everything.
    pub fn search(&self, query: &str) -> StoreResult<Vec<ContentItem>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .substrate
            .get_all()?
            .into_iter()
            .filter(|item| item.matches(&needle))
            .collect())
    }

    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.substrate.delete(&[id.to_string()])? > 0)
    }

    pub fn delete_many(&self, ids: &[String]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.substrate.delete(ids)
    }

    /// Remove every cached item. Returns how many were removed.
    pub fn clear(&self) -> StoreResult<usize> {
        self.substrate.clear()
    }

    /// Usage against an optional quota. Substrate usage failures degrade to
    /// "unknown" rather than failing the whole query.
    pub fn storage_stats(&self, quota_bytes: Option<u64>) -> StoreResult<StorageStats> {
        let items = self.substrate.get_all()?;
        let mut per_category = BTreeMap::new();
        for item in &items {
            *per_category.entry(item.category).or_insert(0) += 1;
        }
        let total_kb = total_size_kb(&items);

        let used_bytes = match self.substrate.usage_bytes() {
            Ok(used) => used,
            Err(e) => {
                tracing::warn!(error = %e, "storage usage unavailable");
                None
            }
        };
        let percent_used = match (used_bytes, quota_bytes) {
            (Some(used), Some(quota)) if quota > 0 => (used as f64 / quota as f64 * 100.0).min(100.0),
            _ => 0.0,
        };

        Ok(StorageStats {
            item_count: items.len(),
            total_kb,
            used_bytes,
            used: used_bytes.map(format_bytes).unwrap_or_else(|| "unknown".to_string()),
            quota_bytes,
            percent_used,
            per_category,
        })
    }

    pub fn append_log(&self, entry: &SyncLogEntry) -> StoreResult<()> {
        self.substrate.append_log(entry)
    }

    /// Up to `n` log entries, newest first.
    pub fn recent_logs(&self, n: usize) -> StoreResult<Vec<SyncLogEntry>> {
        Ok(self.substrate.read_logs()?.into_iter().rev().take(n).collect())
    }
}

fn stamp(mut item: ContentItem) -> ContentItem {
    item.cached_at = Some(Utc::now());
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Importance;

    fn item(id: &str, category: Category, version: u64, title: &str) -> ContentItem {
        ContentItem::new(id, category, version, title).with_size_kb(100)
    }

    #[test]
    fn test_put_stamps_cached_at() {
        let store = LocalStore::in_memory();
        let mut incoming = item("a", Category::Design, 1, "Grids");
        incoming.cached_at = None;
        assert_eq!(store.put(incoming).unwrap(), PutOutcome::Inserted);

        let stored = &store.get_all().unwrap()[0];
        assert!(stored.cached_at.is_some());
    }

    #[test]
    fn test_put_overrides_caller_timestamp() {
        let store = LocalStore::in_memory();
        let mut incoming = item("a", Category::Design, 1, "Grids");
        let bogus = Utc::now() - chrono::Duration::days(365);
        incoming.cached_at = Some(bogus);
        store.put(incoming).unwrap();
        assert!(store.get_all().unwrap()[0].cached_at.unwrap() > bogus);
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = LocalStore::in_memory();
        let a = item("a", Category::Design, 2, "Grids");
        store.put(a.clone()).unwrap();
        assert_eq!(store.put(a).unwrap(), PutOutcome::Updated);
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_version_never_goes_backwards() {
        let store = LocalStore::in_memory();
        store.put(item("a", Category::Design, 5, "v5")).unwrap();
        assert_eq!(store.put(item("a", Category::Design, 3, "v3")).unwrap(), PutOutcome::Stale);
        assert_eq!(store.put_many(vec![item("a", Category::Design, 4, "v4")]).unwrap(), 0);

        let stored = &store.get_all().unwrap()[0];
        assert_eq!(stored.version, 5);
        assert_eq!(stored.title, "v5");

        store.put(item("a", Category::Design, 6, "v6")).unwrap();
        assert_eq!(store.versions().unwrap()["a"], 6);
    }

    #[test]
    fn test_search() {
        let store = LocalStore::in_memory();
        store
            .put_many(vec![
                item("1", Category::Design, 1, "Typography basics"),
                item("2", Category::Engineering, 1, "Design patterns in Rust"),
                item("3", Category::Science, 1, "Tides").with_excerpt("How the moon shapes DESIGN of harbors"),
                item("4", Category::Business, 1, "Quarterly planning"),
            ])
            .unwrap();

        let mut hits: Vec<String> = store.search("Design").unwrap().into_iter().map(|i| i.id).collect();
        hits.sort();
        assert_eq!(hits, vec!["1", "2", "3"]);
        assert_eq!(store.search("").unwrap().len(), 4);
        assert!(store.search("nonexistent").unwrap().is_empty());
    }

    #[test]
    fn test_search_order_is_stable() {
        let store = LocalStore::in_memory();
        store
            .put_many(vec![item("b", Category::Design, 1, "x"), item("a", Category::Design, 1, "y")])
            .unwrap();
        assert_eq!(store.search("design").unwrap(), store.search("design").unwrap());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = LocalStore::in_memory();
        store
            .put_many(vec![item("a", Category::Design, 1, "x"), item("b", Category::Design, 1, "y")])
            .unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_storage_stats() {
        let store = LocalStore::in_memory();
        store
            .put_many(vec![
                item("a", Category::Design, 1, "x"),
                item("b", Category::Design, 1, "y").with_importance(Importance::High),
                ContentItem::new("c", Category::Culture, 1, "no size"),
            ])
            .unwrap();

        let stats = store.storage_stats(Some(1_048_576)).unwrap();
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.total_kb, 250);
        assert_eq!(stats.per_category[&Category::Design], 2);
        assert!(stats.used_bytes.unwrap() > 0);
        assert!(stats.percent_used > 0.0);
        assert_ne!(stats.used, "unknown");

        let no_quota = store.storage_stats(None).unwrap();
        assert_eq!(no_quota.percent_used, 0.0);
    }

    #[test]
    fn test_recent_logs_newest_first() {
        let store = LocalStore::in_memory();
        for n in 1..=3 {
            store
                .append_log(&SyncLogEntry::success(Trigger::Manual, format!("run {}", n), n))
                .unwrap();
        }
        let recent = store.recent_logs(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].detail, "run 3");
        assert_eq!(recent[1].detail, "run 2");
    }

    #[test]
    fn test_quota_fault_is_distinct_error() {
        let store = LocalStore::new(Arc::new(MemorySubstrate::with_capacity_bytes(16)));
        let err = store.put(item("a", Category::Design, 1, "x")).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    }
}
