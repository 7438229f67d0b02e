// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! offsync - Offline content synchronization library
//!
//! Keeps a local, searchable copy of a remote content catalog that stays
//! usable without connectivity, within a storage budget, over a link whose
//! quality changes under it.
//!
//! **Monitor** -> **Orchestrator** -> **Staging buffer** -> **Local store** -> **Eviction**
//!
//! # Core Modules
//!
//! - [`monitor`] - Network quality sampling and subscriptions
//! - [`sync`] - Download session state machine, catalog and relay collaborators
//! - [`store`] - Local content cache, activity log, FIFO eviction
//! - [`config`] - Operator policy, persisted as JSON
//! - [`types`] - Content and network data model
//! - [`utils`] - Lock helpers and display formatting

pub mod config;
pub mod monitor;
pub mod store;
pub mod sync;
pub mod types;
pub mod utils;

pub use config::{Config, SharedConfig};
pub use monitor::{MonitorSubscription, QualityMonitor, QualityProbe};
pub use store::{LocalStore, StoreError, StoreResult, SyncLogEntry, Trigger};
pub use sync::{StartOutcome, SyncOrchestrator, SyncProgress, SyncState, Transition};
pub use types::{Category, ContentItem, Importance, NetworkQuality, NetworkStatus, Sensitivity};
