// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sync orchestrator
//!
//! Owns the single download session and its state machine:
//!
//! ```text
//!   idle ──start──▶ downloading ──drained──▶ completed
//!                    │      ▲                    │
//!               pause│      │resume              │commit
//!                    ▼      │                    ▼
//!                    paused ─┘               saving ──▶ idle
//!
//!   stop: downloading | paused | completed ──▶ stopped (acts like idle)
//! ```
//!
//! Items move from a fixed queue (computed once per session from the
//! catalog and the local versions) into a staging buffer, one at a time, with
//! a simulated transfer delay from [`SpeedModel`]. Nothing reaches the
//! [`LocalStore`](crate::store::LocalStore) until `commit()`; `stop()`
//! discards the buffer without touching persisted state.
//!
//! Network readings arrive through [`SyncOrchestrator::on_quality`] (or a
//! monitor attached with [`SyncOrchestrator::attach_monitor`]) and only ever
//! pause or resume an existing session.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offsync::config::SharedConfig;
//! use offsync::store::{LocalStore, Trigger};
//! use offsync::sync::{StaticCatalog, SyncOrchestrator, SyncState};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let sync = SyncOrchestrator::builder(
//!     LocalStore::in_memory(),
//!     Arc::new(StaticCatalog::new(Vec::new())),
//!     SharedConfig::default(),
//! )
//! .build();
//!
//! sync.start().await;
//! sync.subscribe().wait_until(|p| p.state == SyncState::Completed).await;
//! sync.commit(Trigger::Manual)?;
//! # Ok(())
//! # }
//! ```

pub mod auto;
pub mod catalog;
pub mod orchestrator;
pub mod policy;
pub mod relay;
pub mod session;
pub mod speed;
pub mod types;

pub use auto::{AutoSync, CycleResult};
pub use catalog::{CatalogSource, FileCatalog, HttpCatalog, StaticCatalog};
pub use orchestrator::{SyncHandle, SyncOrchestrator, SyncOrchestratorBuilder};
pub use relay::{HttpRelay, NoopRelay, SessionRelay};
pub use session::DownloadSession;
pub use speed::SpeedModel;
pub use types::{CommitOutcome, Reason, StartOutcome, SyncProgress, SyncState, Transition};
