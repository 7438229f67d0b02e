// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The download/pause/resume/stop/commit state machine.

use anyhow::anyhow;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SharedConfig;
use crate::store::{evict, LocalStore, StoreResult, SyncLogEntry, Trigger};
use crate::types::{ContentItem, NetworkQuality};
use crate::utils::{resilient_read, resilient_write};

use super::catalog::CatalogSource;
use super::policy;
use super::relay::{NoopRelay, SessionRelay};
use super::session::{compute_queue, DownloadSession, ESTIMATE_EVERY};
use super::speed::SpeedModel;
use super::types::{CommitOutcome, Reason, StartOutcome, SyncProgress, SyncState, Transition};

/// Backoff unit between catalog attempts; attempt `n` waits `n` units.
pub const CATALOG_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Read-only view of the session progress.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    progress_rx: watch::Receiver<SyncProgress>,
}

impl SyncHandle {
    pub fn progress(&self) -> SyncProgress {
        self.progress_rx.borrow().clone()
    }

    /// Wait until `done` holds for the published progress.
    pub async fn wait_until(&mut self, mut done: impl FnMut(&SyncProgress) -> bool) -> SyncProgress {
        loop {
            {
                let current = self.progress_rx.borrow_and_update();
                if done(&*current) {
                    return current.clone();
                }
            }
            if self.progress_rx.changed().await.is_err() {
                // Orchestrator gone
                return self.progress_rx.borrow().clone();
            }
        }
    }

    /// Wait for the next published change.
    pub async fn changed(&mut self) -> Option<SyncProgress> {
        self.progress_rx.changed().await.ok()?;
        Some(self.progress_rx.borrow_and_update().clone())
    }
}

struct Inner {
    store: LocalStore,
    catalog: Arc<dyn CatalogSource>,
    relay: Arc<dyn SessionRelay>,
    config: SharedConfig,
    speed: SpeedModel,
    session: RwLock<DownloadSession>,
    quality: RwLock<NetworkQuality>,
    progress_tx: watch::Sender<SyncProgress>,
}

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    store: LocalStore,
    catalog: Arc<dyn CatalogSource>,
    config: SharedConfig,
    relay: Arc<dyn SessionRelay>,
    speed: SpeedModel,
    quality: NetworkQuality,
}

impl SyncOrchestratorBuilder {
    pub fn relay(mut self, relay: Arc<dyn SessionRelay>) -> Self {
        self.relay = relay;
        self
    }

    pub fn speed_model(mut self, speed: SpeedModel) -> Self {
        self.speed = speed;
        self
    }

    /// Reading assumed until the first sample arrives.
    pub fn quality(mut self, quality: NetworkQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn build(self) -> SyncOrchestrator {
        let (progress_tx, _) = watch::channel(SyncProgress::default());
        SyncOrchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                catalog: self.catalog,
                relay: self.relay,
                config: self.config,
                speed: self.speed,
                session: RwLock::new(DownloadSession::default()),
                quality: RwLock::new(self.quality),
                progress_tx,
            }),
        }
    }
}

/// Owns the single download session.
///
/// Cheap to clone; clones drive the same session. The session lock is a
/// plain `RwLock` held only between suspension points, so every transition
/// is atomic with respect to the step loop. Methods that spawn the step loop
/// (`start`, `resume`, `on_quality`) must run inside a Tokio runtime.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn builder(
        store: LocalStore,
        catalog: Arc<dyn CatalogSource>,
        config: SharedConfig,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            store,
            catalog,
            config,
            relay: Arc::new(NoopRelay),
            speed: SpeedModel::default(),
            quality: NetworkQuality::online_default(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn config(&self) -> &SharedConfig {
        &self.inner.config
    }

    pub fn progress(&self) -> SyncProgress {
        self.inner.progress_tx.borrow().clone()
    }

    pub fn state(&self) -> SyncState {
        self.session().state()
    }

    /// Last reading seen.
    pub fn quality(&self) -> NetworkQuality {
        *resilient_read(&self.inner.quality)
    }

    pub fn subscribe(&self) -> SyncHandle {
        SyncHandle {
            progress_rx: self.inner.progress_tx.subscribe(),
        }
    }

    /// Items downloaded but not yet committed.
    pub fn buffered_items(&self) -> Vec<ContentItem> {
        self.session().buffer().to_vec()
    }

    fn session(&self) -> RwLockReadGuard<'_, DownloadSession> {
        resilient_read(&self.inner.session)
    }

    fn session_mut(&self) -> RwLockWriteGuard<'_, DownloadSession> {
        resilient_write(&self.inner.session)
    }

    /// Start a session: fetch the catalog, diff it against the store and
    /// begin downloading.
    pub async fn start(&self) -> StartOutcome {
        let config = self.inner.config.snapshot();
        let quality = self.quality();

        let epoch = {
            let mut session = self.session_mut();
            if !session.can_start() {
                tracing::debug!(state = %session.state(), busy = session.busy, "start ignored");
                return StartOutcome::AlreadyActive;
            }
            if let Some(reason) = policy::start_blocker(&quality, &config) {
                tracing::info!(%reason, "start rejected");
                return StartOutcome::Rejected(reason);
            }
            session.busy = true;
            session.epoch += 1;
            session.epoch
        };

        let remote = match self.fetch_catalog(config.retry_attempts).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "catalog unavailable");
                return self.abort_start(epoch, Reason::CatalogUnavailable(format!("{:#}", e)));
            }
        };

        let mut known = match self.inner.store.versions() {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(error = %e, "could not read local versions");
                return self.abort_start(epoch, Reason::Storage(e.to_string()));
            }
        };

        let (queued, total_kb) = {
            let mut session = self.session_mut();
            if session.epoch != epoch {
                tracing::info!("start cancelled while fetching catalog");
                return StartOutcome::Cancelled;
            }
            // Uncommitted items count as known so a restart never queues them twice.
            for item in session.buffer() {
                let entry = known.entry(item.id.clone()).or_insert(0);
                *entry = (*entry).max(item.version);
            }
            let queue = compute_queue(remote, &known, &self.inner.config.snapshot());
            session.begin(queue, Instant::now());
            self.publish(&session);
            (session.queue().len(), session.snapshot().remaining_kb)
        };

        if queued == 0 {
            tracing::info!("local copy is current, nothing to sync");
            return StartOutcome::NothingToSync;
        }

        tracing::info!(queued, total_kb, "sync session started");
        self.register_relay_session(epoch, queued);
        self.spawn_loop(epoch);
        StartOutcome::Started { queued }
    }

    fn abort_start(&self, epoch: u64, reason: Reason) -> StartOutcome {
        let mut session = self.session_mut();
        if session.epoch != epoch {
            return StartOutcome::Cancelled;
        }
        session.busy = false;
        StartOutcome::Rejected(reason)
    }

    async fn fetch_catalog(&self, attempts: u32) -> anyhow::Result<Vec<ContentItem>> {
        let attempts = attempts.max(1);
        let report = |percent: u8| tracing::debug!(percent, "catalog fetch progress");
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.inner.catalog.fetch_catalog(Some(&report)).await {
                Ok(items) => return Ok(items),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "catalog fetch failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(CATALOG_RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("catalog fetch was not attempted")))
    }

    /// Suspend the step loop. Only valid while downloading.
    pub fn pause(&self) -> Transition {
        let mut session = self.session_mut();
        if session.state() != SyncState::Downloading {
            return Transition::Ignored(session.state());
        }
        session.state = SyncState::Paused;
        session.epoch += 1;
        self.publish(&session);
        tracing::info!(cursor = session.cursor(), buffered = session.buffer().len(), "sync paused");
        Transition::Applied(SyncState::Paused)
    }

    /// Re-enter the step loop from the existing cursor.
    pub fn resume(&self) -> Transition {
        let config = self.inner.config.snapshot();
        let quality = self.quality();

        let epoch = {
            let mut session = self.session_mut();
            if session.state() != SyncState::Paused || !session.has_pending() {
                return Transition::Ignored(session.state());
            }
            if let Some(reason) = policy::start_blocker(&quality, &config) {
                tracing::info!(%reason, "resume rejected");
                return Transition::Rejected(reason);
            }
            session.state = SyncState::Downloading;
            session.epoch += 1;
            session.mark_checkpoint(Instant::now());
            self.publish(&session);
            tracing::info!(cursor = session.cursor(), "sync resumed");
            session.epoch
        };

        self.spawn_loop(epoch);
        Transition::Applied(SyncState::Downloading)
    }

    /// Discard the session and everything not yet committed.
    pub fn stop(&self) -> Transition {
        let mut session = self.session_mut();
        let state = session.state();
        let stoppable = match state {
            SyncState::Idle | SyncState::Stopped => session.busy,
            SyncState::Saving => false,
            SyncState::Downloading | SyncState::Paused | SyncState::Completed => true,
        };
        if !stoppable {
            return Transition::Ignored(state);
        }
        let discarded = session.buffer().len();
        self.send_relay_update(&session, SyncState::Stopped);
        session.reset();
        session.busy = false;
        session.state = SyncState::Stopped;
        session.epoch += 1;
        self.publish(&session);
        tracing::info!(discarded, "sync stopped");
        Transition::Applied(SyncState::Stopped)
    }

    /// Persist the buffer, log the batch and evict down to budget.
    ///
    /// On a storage fault the buffer is kept so the commit can be retried,
    /// and the session returns to `paused` (or `completed` if the queue was
    /// already drained).
    pub fn commit(&self, trigger: Trigger) -> StoreResult<CommitOutcome> {
        let (items, prior) = {
            let mut session = self.session_mut();
            if session.state() == SyncState::Saving || session.buffer().is_empty() {
                return Ok(CommitOutcome::NothingToCommit);
            }
            let prior = session.state();
            session.state = SyncState::Saving;
            // Invalidates a running step loop.
            session.epoch += 1;
            self.publish(&session);
            (session.buffer().to_vec(), prior)
        };
        let count = items.len();

        let written = match self.inner.store.put_many(items) {
            Ok(written) => written,
            Err(e) => {
                let restored = match prior {
                SyncState::Downloading | SyncState::Paused => SyncState::Paused,
                _ => SyncState::Completed,
            };
                {
                    let mut session = self.session_mut();
                    session.state = restored;
                    self.publish(&session);
                }
                tracing::warn!(error = %e, buffered = count, state = %restored, "commit failed, buffer kept");
                self.record(SyncLogEntry::failed(trigger, format!("Commit failed: {}", e), 0));
                return Err(e);
            }
        };
        if written < count {
            tracing::debug!(buffered = count, written, "stale buffered items skipped");
        }

        {
            let mut session = self.session_mut();
            self.send_relay_update(&session, SyncState::Idle);
            session.reset();
            session.state = SyncState::Idle;
            self.publish(&session);
        }
        self.record(SyncLogEntry::success(
            trigger,
            format!("Synced {} item{}", written, if written == 1 { "" } else { "s" }),
            written,
        ));

        let budget_mb = self.inner.config.snapshot().storage_budget_mb;
        let evicted = match evict(&self.inner.store, budget_mb) {
            Ok(evicted) => evicted,
            Err(e) => {
                tracing::warn!(error = %e, budget_mb, "post-commit eviction failed");
                0
            }
        };

        tracing::info!(items = written, evicted, trigger = trigger.as_str(), "commit complete");
        Ok(CommitOutcome::Committed { items: written, evicted })
    }

    /// Empty the local store and log it.
    pub fn clear_cache(&self, trigger: Trigger) -> StoreResult<usize> {
        match self.inner.store.clear() {
            Ok(removed) => {
                tracing::info!(removed, "cache cleared");
                self.record(SyncLogEntry::success(trigger, format!("Cleared {} cached items", removed), removed));
                Ok(removed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache clear failed");
                self.record(SyncLogEntry::failed(trigger, format!("Clear failed: {}", e), 0));
                Err(e)
            }
        }
    }

    /// Apply the auto-pause/auto-resume policy to a new reading.
    ///
    /// Never starts a session; only pauses or resumes an existing one.
    pub fn on_quality(&self, quality: NetworkQuality) -> Option<Transition> {
        *resilient_write(&self.inner.quality) = quality;
        let config = self.inner.config.snapshot();

        let (state, pending) = {
            let session = self.session();
            (session.state(), session.has_pending())
        };
        match state {
            SyncState::Downloading if policy::auto_pause_due(&quality, &config) => {
                tracing::info!(%quality, "auto-pausing on network change");
                Some(self.pause())
            }
            SyncState::Paused if pending && policy::auto_resume_due(&quality, &config) => {
                tracing::info!(%quality, "auto-resuming on network change");
                Some(self.resume())
            }
            _ => None,
        }
    }

    /// Feed every reading from a monitor subscription into [`on_quality`](Self::on_quality).
    pub fn attach_monitor(&self, mut readings: watch::Receiver<NetworkQuality>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let initial = *readings.borrow_and_update();
            orchestrator.on_quality(initial);
            while readings.changed().await.is_ok() {
                let quality = *readings.borrow_and_update();
                orchestrator.on_quality(quality);
            }
            tracing::debug!("monitor detached");
        })
    }

    fn spawn_loop(&self, epoch: u64) {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_loop(epoch).await });
    }

    /// Move queue items into the buffer one at a time until the queue is
    /// drained or the epoch moves on.
    async fn run_loop(self, epoch: u64) {
        loop {
            let size_kb = {
                let session = self.session();
                if session.epoch != epoch || session.state() != SyncState::Downloading {
                    return;
                }
                match session.current_item() {
                    Some(item) => item.effective_size_kb(),
                    None => return,
                }
            };

            let quality = self.quality();
            let sensitivity = self.inner.config.snapshot().sensitivity;
            let delay = self.inner.speed.transfer_delay(size_kb, quality.signal, sensitivity);
            tokio::time::sleep(delay).await;

            let mut session = self.session_mut();
            if session.epoch != epoch || session.state() != SyncState::Downloading {
                tracing::debug!(cursor = session.cursor(), "in-flight step abandoned");
                return;
            }
            let done = session.advance();
            tracing::debug!(cursor = session.cursor(), size_kb, ?delay, "item downloaded");
            let refresh = done || session.cursor() % ESTIMATE_EVERY == 0;
            if refresh {
                session.refresh_estimates(Instant::now());
            }
            if done {
                session.state = SyncState::Completed;
                tracing::info!(items = session.buffer().len(), "download complete, awaiting commit");
            }
            // The final update goes out through publish() with the state change.
            if refresh && !done {
                self.send_relay_update(&session, session.state());
            }
            self.publish(&session);
            if done {
                return;
            }
        }
    }

    fn publish(&self, session: &DownloadSession) {
        let snapshot = session.snapshot();
        let previous = self.inner.progress_tx.borrow().state;
        if previous != snapshot.state && snapshot.state != SyncState::Stopped {
            self.send_relay_update(session, snapshot.state);
        }
        self.inner.progress_tx.send_replace(snapshot);
    }

    fn register_relay_session(&self, epoch: u64, total_items: usize) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let orchestrator = self.clone();
        runtime.spawn(async move {
            match orchestrator.inner.relay.create_session(total_items).await {
                Ok(id) => {
                    let mut session = orchestrator.session_mut();
                    if session.epoch >= epoch && session.relay_id.is_none() && session.state().is_active() {
                        session.relay_id = Some(id);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "relay create_session failed"),
            }
        });
    }

    fn send_relay_update(&self, session: &DownloadSession, state: SyncState) {
        let Some(id) = session.relay_id.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let relay = Arc::clone(&self.inner.relay);
        let percent = session.percent();
        runtime.spawn(async move {
            if let Err(e) = relay.update_session(&id, percent, state).await {
                tracing::debug!(error = %e, "relay update_session failed");
            }
        });
    }

    /// Append to the activity log and relay it. Log write failures are
    /// reported but never undo the operation being logged.
    fn record(&self, entry: SyncLogEntry) {
        if let Err(e) = self.inner.store.append_log(&entry) {
            tracing::warn!(error = %e, "could not append sync log entry");
        }
        tracing::debug!(entry = %entry.to_log_line(), "sync log");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let relay = Arc::clone(&self.inner.relay);
        runtime.spawn(async move {
            if let Err(e) = relay.post_log(&entry).await {
                tracing::debug!(error = %e, "relay post_log failed");
            }
        });
    }
}
