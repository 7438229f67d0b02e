// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The in-flight download session and queue computation.

use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::time::Instant;

use crate::config::Config;
use crate::types::{total_size_kb, ContentItem};

use super::types::{SyncProgress, SyncState};

/// Observed speed and remaining size are recomputed every this many items.
pub const ESTIMATE_EVERY: usize = 10;

/// Session state owned by the orchestrator.
///
/// Only the orchestrator mutates it, always under its lock and never across
/// an await. `epoch` is bumped by every operation that invalidates a running
/// step loop (pause, stop, commit, a fresh loop); a loop whose captured epoch
/// no longer matches abandons its in-flight step.
#[derive(Debug)]
pub struct DownloadSession {
    pub(crate) state: SyncState,
    queue: Vec<ContentItem>,
    cursor: usize,
    buffer: Vec<ContentItem>,
    observed_kbps: Option<f64>,
    remaining_kb: u64,
    /// A `start()` is between its guard and `begin()`
    pub(crate) busy: bool,
    pub(crate) epoch: u64,
    pub(crate) relay_id: Option<String>,
    checkpoint: Option<(Instant, usize)>,
}

impl Default for DownloadSession {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            queue: Vec::new(),
            cursor: 0,
            buffer: Vec::new(),
            observed_kbps: None,
            remaining_kb: 0,
            busy: false,
            epoch: 0,
            relay_id: None,
            checkpoint: None,
        }
    }
}

impl DownloadSession {
    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn queue(&self) -> &[ContentItem] {
        &self.queue
    }

    pub fn buffer(&self) -> &[ContentItem] {
        &self.buffer
    }

    /// Items left between the cursor and the end of the queue.
    pub fn has_pending(&self) -> bool {
        self.cursor < self.queue.len()
    }

    pub fn current_item(&self) -> Option<&ContentItem> {
        self.queue.get(self.cursor)
    }

    /// `idle`/`stopped` always; `completed` once its buffer is committed or
    /// empty; `paused` only when nothing is left in the queue.
    pub fn can_start(&self) -> bool {
        if self.busy {
            return false;
        }
        match self.state {
            SyncState::Idle | SyncState::Stopped => true,
            SyncState::Completed => self.buffer.is_empty(),
            SyncState::Paused => !self.has_pending(),
            SyncState::Downloading | SyncState::Saving => false,
        }
    }

    /// Install a freshly computed queue. An empty queue completes at once.
    /// The buffer is left alone.
    pub fn begin(&mut self, queue: Vec<ContentItem>, now: Instant) {
        self.queue = queue;
        self.cursor = 0;
        self.busy = false;
        self.observed_kbps = None;
        self.remaining_kb = total_size_kb(&self.queue);
        self.checkpoint = Some((now, 0));
        self.state = if self.queue.is_empty() {
            SyncState::Completed
        } else {
            SyncState::Downloading
        };
    }

    /// Move the item at the cursor into the buffer. Returns true when the
    /// queue is exhausted.
    pub fn advance(&mut self) -> bool {
        if let Some(item) = self.queue.get(self.cursor) {
            self.buffer.push(item.clone());
            self.cursor += 1;
        }
        !self.has_pending()
    }

    /// Restart the throughput window, e.g. after a resume.
    pub fn mark_checkpoint(&mut self, now: Instant) {
        self.checkpoint = Some((now, self.cursor));
    }

    /// Recompute observed speed over the items moved since the last
    /// checkpoint, and the size of the rest of the queue.
    pub fn refresh_estimates(&mut self, now: Instant) {
        if let Some((since, from)) = self.checkpoint {
            let elapsed = now.saturating_duration_since(since).as_secs_f64();
            let moved_kb = total_size_kb(self.queue.get(from..self.cursor).unwrap_or_default());
            if elapsed > 0.0 && moved_kb > 0 {
                self.observed_kbps = Some(moved_kb as f64 / elapsed);
            }
        }
        self.remaining_kb = total_size_kb(self.queue.get(self.cursor..).unwrap_or_default());
        self.checkpoint = Some((now, self.cursor));
    }

    /// Drop queue, cursor, buffer and estimates. State is left to the caller.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.cursor = 0;
        self.buffer.clear();
        self.observed_kbps = None;
        self.remaining_kb = 0;
        self.relay_id = None;
        self.checkpoint = None;
    }

    pub fn percent(&self) -> f64 {
        if self.queue.is_empty() {
            return if self.state == SyncState::Completed { 100.0 } else { 0.0 };
        }
        self.cursor as f64 / self.queue.len() as f64 * 100.0
    }

    pub fn snapshot(&self) -> SyncProgress {
        SyncProgress {
            state: self.state,
            cursor: self.cursor,
            queue_len: self.queue.len(),
            buffered: self.buffer.len(),
            percent: self.percent(),
            observed_kbps: self.observed_kbps,
            remaining_kb: self.remaining_kb,
        }
    }
}

/// Items to download: allowed by the category filter, and either absent
/// locally or strictly newer than the known version.
///
/// Duplicate remote identifiers collapse to their highest version. The
/// result is stably ordered by category priority, then importance.
pub fn compute_queue(
    remote: Vec<ContentItem>,
    known: &HashMap<String, u64>,
    config: &Config,
) -> Vec<ContentItem> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ContentItem> = Vec::new();
    for item in remote {
        if !config.allows(item.category) {
            continue;
        }
        match index.get(&item.id) {
            Some(&at) => {
                if item.version > unique[at].version {
                    unique[at] = item;
                }
            }
            None => {
                index.insert(item.id.clone(), unique.len());
                unique.push(item);
            }
        }
    }

    let mut queue: Vec<ContentItem> = unique
        .into_iter()
        .filter(|item| known.get(&item.id).map_or(true, |&local| item.version > local))
        .collect();
    queue.sort_by_key(|item| (Reverse(config.priority_of(item.category)), Reverse(item.importance)));
    queue
}
