// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across offsync.
//!
//! Content items as the catalog and the cache see them, plus the normalized
//! network reading the monitor hands to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size assumed for items whose catalog entry carries no size estimate.
pub const DEFAULT_ITEM_SIZE_KB: u64 = 50;

/// Signal strength below which a link is reported as weak.
pub const WEAK_SIGNAL_THRESHOLD: u8 = 60;

/// Content category. The set is closed; new categories need a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Design,
    Engineering,
    Business,
    Science,
    Culture,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Design,
        Category::Engineering,
        Category::Business,
        Category::Science,
        Category::Culture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Engineering => "engineering",
            Self::Business => "business",
            Self::Science => "science",
            Self::Culture => "culture",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// Importance tier. Ordered so that `High` sorts last; queue ordering
/// reverses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Medium,
    High,
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Medium
    }
}

/// A catalog entry, as fetched from the remote source and as cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Globally unique, stable identifier
    pub id: String,
    pub category: Category,
    #[serde(default)]
    pub importance: Importance,
    /// Serialized size in kilobytes, when the catalog provides one
    #[serde(default)]
    pub size_kb: Option<u64>,
    /// Monotonically increasing per identifier
    pub version: u64,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set by the local store on every write. Callers never set it.
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, category: Category, version: u64, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            importance: Importance::default(),
            size_kb: None,
            version,
            title: title.into(),
            excerpt: String::new(),
            body: String::new(),
            author: None,
            tags: Vec::new(),
            cached_at: None,
        }
    }

    pub fn with_size_kb(mut self, size_kb: u64) -> Self {
        self.size_kb = Some(size_kb);
        self
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    /// Size used for budgeting and transfer estimates.
    pub fn effective_size_kb(&self) -> u64 {
        self.size_kb.unwrap_or(DEFAULT_ITEM_SIZE_KB)
    }

    /// Case-insensitive substring match over title, excerpt and category.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.title.to_lowercase().contains(needle)
            || self.excerpt.to_lowercase().contains(needle)
            || self.category.as_str().contains(needle)
    }
}

/// Sum of effective sizes. Catalog sizes are untrusted, so this saturates
/// instead of overflowing.
pub fn total_size_kb<'a>(items: impl IntoIterator<Item = &'a ContentItem>) -> u64 {
    items
        .into_iter()
        .fold(0u64, |total, item| total.saturating_add(item.effective_size_kb()))
}

/// Link status as seen by the quality monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Weak,
    Offline,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Weak => "weak",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// One normalized network reading.
///
/// Constructors keep the invariants: `Offline` carries zero speed and zero
/// signal, `Weak` carries signal below [`WEAK_SIGNAL_THRESHOLD`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub status: NetworkStatus,
    /// Estimated link speed in Mbps
    pub speed_mbps: f64,
    /// 0-100 inclusive
    pub signal: u8,
    pub metered: bool,
}

impl NetworkQuality {
    pub fn offline() -> Self {
        Self {
            status: NetworkStatus::Offline,
            speed_mbps: 0.0,
            signal: 0,
            metered: false,
        }
    }

    pub fn online(speed_mbps: f64, signal: u8, metered: bool) -> Self {
        Self {
            status: NetworkStatus::Online,
            speed_mbps: speed_mbps.max(0.0),
            signal: signal.min(100),
            metered,
        }
    }

    pub fn weak(speed_mbps: f64, signal: u8, metered: bool) -> Self {
        Self {
            status: NetworkStatus::Weak,
            speed_mbps: speed_mbps.max(0.0),
            signal: signal.min(WEAK_SIGNAL_THRESHOLD - 1),
            metered,
        }
    }

    /// Reading assumed before the first real sample arrives.
    pub fn online_default() -> Self {
        Self::online(100.0, 100, false)
    }

    pub fn is_offline(&self) -> bool {
        self.status == NetworkStatus::Offline
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1} Mbps, signal {}{})",
            self.status,
            self.speed_mbps,
            self.signal,
            if self.metered { ", metered" } else { "" }
        )
    }
}

/// How aggressively the transfer model uses the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Balanced,
    High,
}

impl Sensitivity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Low => 0.5,
            Self::Balanced => 1.0,
            Self::High => 1.5,
        }
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Balanced
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "balanced" => Ok(Self::Balanced),
            "high" => Ok(Self::High),
            other => Err(format!("unknown sensitivity '{}', expected low|balanced|high", other)),
        }
    }
}
