// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Budget eviction.
//!
//! Pure FIFO on `cached_at`: the oldest cached items go first until the sum
//! of size estimates fits the budget. Items without a timestamp count as
//! oldest. Runs after every successful commit, so a commit may overshoot the
//! budget briefly.

use super::{LocalStore, StoreResult};
use crate::types::{total_size_kb, ContentItem};

/// Identifiers to delete so that what remains fits in `budget_kb`.
pub fn plan_eviction(items: &[ContentItem], budget_kb: u64) -> Vec<String> {
    let mut total_kb = total_size_kb(items);
    if total_kb <= budget_kb {
        return Vec::new();
    }

    let mut oldest_first: Vec<&ContentItem> = items.iter().collect();
    oldest_first.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.id.cmp(&b.id)));

    let mut victims = Vec::new();
    for item in oldest_first {
        if total_kb <= budget_kb {
            break;
        }
        total_kb = total_kb.saturating_sub(item.effective_size_kb());
        victims.push(item.id.clone());
    }
    victims
}

/// Evict until the store fits in `budget_mb`. Returns the number of items
/// removed.
pub fn evict(store: &LocalStore, budget_mb: u64) -> StoreResult<usize> {
    let budget_kb = budget_mb.saturating_mul(1024);
    let items = store.get_all()?;
    let victims = plan_eviction(&items, budget_kb);
    if victims.is_empty() {
        tracing::debug!(budget_mb, items = items.len(), "store within budget");
        return Ok(0);
    }

    let evicted = store.delete_many(&victims)?;
    tracing::info!(budget_mb, evicted, "evicted oldest cached items to fit budget");
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemorySubstrate, Substrate};
    use crate::types::{Category, DEFAULT_ITEM_SIZE_KB};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    /// Items written straight to the substrate so `cached_at` is controlled.
    fn seeded_store(specs: &[(&str, Option<u64>, i64)]) -> LocalStore {
        let substrate = MemorySubstrate::new();
        let now = Utc::now();
        let items = specs
            .iter()
            .map(|(id, size, age_mins)| {
                let mut item = ContentItem::new(*id, Category::Science, 1, *id);
                item.size_kb = *size;
                item.cached_at = Some(now - Duration::minutes(*age_mins));
                item
            })
            .collect();
        substrate.put_many(items).unwrap();
        LocalStore::new(Arc::new(substrate))
    }

    fn total_kb(store: &LocalStore) -> u64 {
        store.get_all().unwrap().iter().map(ContentItem::effective_size_kb).sum()
    }

    #[test]
    fn test_within_budget_evicts_nothing() {
        let store = seeded_store(&[("a", Some(100), 3), ("b", Some(100), 2)]);
        assert_eq!(evict(&store, 1).unwrap(), 0);
        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_evicts_oldest_first() {
        // 3 x 512 KB = 1.5 MB, budget 1 MB: only the oldest must go.
        let store = seeded_store(&[("new", Some(512), 1), ("old", Some(512), 30), ("mid", Some(512), 10)]);
        assert_eq!(evict(&store, 1).unwrap(), 1);

        let mut left: Vec<String> = store.get_all().unwrap().into_iter().map(|i| i.id).collect();
        left.sort();
        assert_eq!(left, vec!["mid", "new"]);
        assert!(total_kb(&store) <= 1024);
    }

    #[test]
    fn test_zero_budget_empties_store() {
        let store = seeded_store(&[("a", Some(1), 3), ("b", Some(1), 2)]);
        assert_eq!(evict(&store, 0).unwrap(), 2);
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_missing_size_uses_default_estimate() {
        // 21 unsized items at 50 KB each = 1050 KB, one over a 1 MB budget.
        let specs: Vec<(String, Option<u64>, i64)> =
            (0..21).map(|i| (format!("item-{:02}", i), None, 100 - i as i64)).collect();
        let borrowed: Vec<(&str, Option<u64>, i64)> =
            specs.iter().map(|(id, size, age)| (id.as_str(), *size, *age)).collect();
        let store = seeded_store(&borrowed);

        assert_eq!(evict(&store, 1).unwrap(), 1);
        assert_eq!(total_kb(&store), 20 * DEFAULT_ITEM_SIZE_KB);
        assert!(store.get_all().unwrap().iter().all(|i| i.id != "item-00"));
    }

    #[test]
    fn test_eviction_is_idempotent() {
        let store = seeded_store(&[("a", Some(700), 3), ("b", Some(700), 2)]);
        assert_eq!(evict(&store, 1).unwrap(), 1);
        assert_eq!(evict(&store, 1).unwrap(), 0);
    }

    #[test]
    fn test_plan_treats_unstamped_as_oldest() {
        let mut unstamped = ContentItem::new("x", Category::Design, 1, "x").with_size_kb(600);
        unstamped.cached_at = None;
        let mut stamped = ContentItem::new("y", Category::Design, 1, "y").with_size_kb(600);
        stamped.cached_at = Some(Utc::now());
        assert_eq!(plan_eviction(&[stamped, unstamped], 1024), vec!["x".to_string()]);
    }

    #[test]
    fn test_oversized_items_saturate_instead_of_overflowing() {
        let huge = u64::MAX / 2 + 1;
        let store = seeded_store(&[("a", Some(huge), 2), ("b", Some(huge), 1)]);
        assert_eq!(store.storage_stats(None).unwrap().total_kb, u64::MAX);
        assert_eq!(evict(&store, 1).unwrap(), 2);
        assert!(store.get_all().unwrap().is_empty());
    }
}
