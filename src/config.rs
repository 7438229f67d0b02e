// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operator policy.
//!
//! [`Config`] is persisted as pretty JSON under the data directory. Every
//! field has a serde default so files written by older versions keep loading.
//! [`SharedConfig`] is the handle the orchestrator and eviction read on every
//! decision; it is only mutated through its setters.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::types::{Category, Sensitivity};
use crate::utils::{resilient_read, resilient_write};

/// Default endpoint for the reachability probe.
pub const DEFAULT_PROBE_URL: &str = "https://connectivitycheck.gstatic.com/generate_204";

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Local cache budget in megabytes
    #[serde(default = "default_storage_budget_mb")]
    pub storage_budget_mb: u64,
    /// Categories to sync. Empty means all.
    #[serde(default)]
    pub allowed_categories: Vec<Category>,
    /// Higher values are downloaded first
    #[serde(default)]
    pub category_priority: BTreeMap<Category, u8>,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_true")]
    pub auto_pause: bool,
    #[serde(default = "default_true")]
    pub auto_resume: bool,
    /// Refuse metered links
    #[serde(default)]
    pub wifi_only: bool,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// Catalog fetch attempts per session start
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_auto_sync_interval_secs")]
    pub auto_sync_interval_secs: u64,
    #[serde(default)]
    pub catalog_url: Option<String>,
    /// Largest HTTP catalog body accepted, in megabytes
    #[serde(default = "default_max_catalog_mb")]
    pub max_catalog_mb: u64,
    #[serde(default)]
    pub relay_url: Option<String>,
}

fn default_storage_budget_mb() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_auto_sync_interval_secs() -> u64 {
    900
}

fn default_max_catalog_mb() -> u64 {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_budget_mb: default_storage_budget_mb(),
            allowed_categories: Vec::new(),
            category_priority: BTreeMap::new(),
            auto_sync: false,
            auto_pause: true,
            auto_resume: true,
            wifi_only: false,
            sensitivity: Sensitivity::default(),
            retry_attempts: default_retry_attempts(),
            probe_url: default_probe_url(),
            probe_interval_secs: default_probe_interval_secs(),
            auto_sync_interval_secs: default_auto_sync_interval_secs(),
            catalog_url: None,
            max_catalog_mb: default_max_catalog_mb(),
            relay_url: None,
        }
    }
}

impl Config {
    pub fn allows(&self, category: Category) -> bool {
        self.allowed_categories.is_empty() || self.allowed_categories.contains(&category)
    }

    pub fn priority_of(&self, category: Category) -> u8 {
        self.category_priority.get(&category).copied().unwrap_or(0)
    }

    /// Load from `<data_dir>/config.json`, falling back to defaults when the
    /// file does not exist yet.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(data_dir.join(CONFIG_FILE), content).context("Failed to write config file")?;
        Ok(())
    }
}

/// Default data directory: `~/.offsync`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".offsync"))
        .unwrap_or_else(|| PathBuf::from(".offsync"))
}

/// Shared, read-mostly policy handle.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Current policy. Callers take a fresh snapshot per decision.
    pub fn snapshot(&self) -> Config {
        resilient_read(&self.inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut guard = resilient_write(&self.inner);
        f(&mut guard);
        tracing::debug!(config = ?*guard, "config updated");
    }

    pub fn set_storage_budget_mb(&self, mb: u64) {
        self.update(|c| c.storage_budget_mb = mb);
    }

    pub fn set_allowed_categories(&self, categories: Vec<Category>) {
        self.update(|c| c.allowed_categories = categories);
    }

    pub fn set_category_priority(&self, category: Category, priority: u8) {
        self.update(|c| {
            c.category_priority.insert(category, priority);
        });
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.update(|c| c.auto_sync = enabled);
    }

    pub fn set_auto_pause(&self, enabled: bool) {
        self.update(|c| c.auto_pause = enabled);
    }

    pub fn set_auto_resume(&self, enabled: bool) {
        self.update(|c| c.auto_resume = enabled);
    }

    pub fn set_wifi_only(&self, enabled: bool) {
        self.update(|c| c.wifi_only = enabled);
    }

    pub fn set_sensitivity(&self, sensitivity: Sensitivity) {
        self.update(|c| c.sensitivity = sensitivity);
    }

    pub fn set_retry_attempts(&self, attempts: u32) {
        self.update(|c| c.retry_attempts = attempts);
    }

    pub fn set_catalog_url(&self, url: Option<String>) {
        self.update(|c| c.catalog_url = url);
    }
}
