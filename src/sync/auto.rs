// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic background sync, gated by `Config::auto_sync`.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::{StoreError, Trigger};

use super::orchestrator::SyncOrchestrator;
use super::types::{CommitOutcome, StartOutcome, SyncState};

/// What one scheduled cycle did.
#[derive(Debug)]
pub enum CycleResult {
    /// Policy refused, or a session was already running
    Skipped(StartOutcome),
    /// The session was stopped before it finished
    Abandoned,
    Committed(CommitOutcome),
    Failed(StoreError),
}

pub struct AutoSync {
    orchestrator: SyncOrchestrator,
}

impl AutoSync {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Start a session, wait for it to drain, commit it as `auto`.
    ///
    /// A session that auto-pauses is waited on until it resumes and
    /// finishes, or is stopped.
    pub async fn run_cycle(&self) -> CycleResult {
        match self.orchestrator.start().await {
            StartOutcome::Started { .. } | StartOutcome::NothingToSync => {}
            other => return CycleResult::Skipped(other),
        }

        let finished = self
            .orchestrator
            .subscribe()
            .wait_until(|p| matches!(p.state, SyncState::Completed | SyncState::Stopped | SyncState::Idle))
            .await;
        if finished.state != SyncState::Completed {
            return CycleResult::Abandoned;
        }

        match self.orchestrator.commit(Trigger::Auto) {
            Ok(outcome) => CycleResult::Committed(outcome),
            Err(e) => CycleResult::Failed(e),
        }
    }

    /// Run cycles every `auto_sync_interval_secs` until `shutdown` flips or
    /// its sender is dropped. Interval and the toggle are re-read each tick.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let interval = Duration::from_secs(
                    self.orchestrator.config().snapshot().auto_sync_interval_secs.max(1),
                );
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                if !self.orchestrator.config().snapshot().auto_sync {
                    continue;
                }
                tokio::select! {
                    result = self.run_cycle() => match result {
                        CycleResult::Committed(outcome) => tracing::info!(?outcome, "auto-sync cycle committed"),
                        CycleResult::Failed(e) => tracing::warn!(error = %e, "auto-sync commit failed"),
                        other => tracing::debug!(?other, "auto-sync cycle ended"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("auto-sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedConfig;
    use crate::store::LocalStore;
    use crate::sync::catalog::StaticCatalog;
    use crate::types::{Category, ContentItem, NetworkQuality};
    use std::sync::Arc;

    fn catalog() -> Vec<ContentItem> {
        (0..3)
            .map(|i| ContentItem::new(format!("c{}", i), Category::Culture, 1, "c").with_size_kb(100))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_commits_with_auto_trigger() {
        let store = LocalStore::in_memory();
        let sync = SyncOrchestrator::builder(store.clone(), Arc::new(StaticCatalog::new(catalog())), SharedConfig::default())
            .build();

        let result = AutoSync::new(sync).run_cycle().await;
        assert!(matches!(result, CycleResult::Committed(CommitOutcome::Committed { items: 3, .. })));
        let logs = store.recent_logs(1).unwrap();
        assert_eq!(logs[0].trigger, Trigger::Auto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skipped_offline() {
        let sync = SyncOrchestrator::builder(
            LocalStore::in_memory(),
            Arc::new(StaticCatalog::new(catalog())),
            SharedConfig::default(),
        )
        .quality(NetworkQuality::offline())
        .build();
        assert!(matches!(AutoSync::new(sync).run_cycle().await, CycleResult::Skipped(StartOutcome::Rejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_honors_toggle() {
        let store = LocalStore::in_memory();
        let config = SharedConfig::default();
        let sync = SyncOrchestrator::builder(store.clone(), Arc::new(StaticCatalog::new(catalog())), config.clone())
            .build();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = AutoSync::new(sync).spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(2000)).await;
        assert!(store.get_all().unwrap().is_empty(), "auto_sync is off by default");

        config.set_auto_sync(true);
        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert_eq!(store.get_all().unwrap().len(), 3);

        shutdown_tx.send_replace(true);
        task.await.unwrap();
    }
}
