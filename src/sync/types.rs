// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types shared by the orchestrator and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::format_eta;

/// Download session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No session
    Idle,
    /// Step loop running
    Downloading,
    /// Step loop suspended, buffer and cursor kept
    Paused,
    /// Queue exhausted, buffer awaiting commit
    Completed,
    /// Session discarded; behaves like `Idle` for the next start
    Stopped,
    /// Buffer being written to the local store
    Saving,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Saving => "saving",
        }
    }

    /// A session exists and has not finished.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Paused | Self::Saving)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operation was refused. Shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    Offline,
    WifiOnlyViolated,
    CatalogUnavailable(String),
    Storage(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "You are offline; sync will be available once the network is back"),
            Self::WifiOnlyViolated => write!(f, "Wi-Fi only is enabled and the current connection is metered"),
            Self::CatalogUnavailable(e) => write!(f, "Could not fetch the catalog: {}", e),
            Self::Storage(e) => write!(f, "Local storage is unavailable: {}", e),
        }
    }
}

/// Result of `start()`.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// Step loop running over this many items
    Started { queued: usize },
    /// Local copy already current; session went straight to `Completed`
    NothingToSync,
    /// A session is already running or starting; nothing changed
    AlreadyActive,
    /// Policy or collaborator refused; nothing changed
    Rejected(Reason),
    /// `stop()` landed while the catalog was being fetched
    Cancelled,
}

/// Result of pause/resume/stop.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(SyncState),
    /// Not valid from the current state; a no-op
    Ignored(SyncState),
    Rejected(Reason),
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of a successful `commit()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { items: usize, evicted: usize },
    /// Empty buffer or a commit already in progress
    NothingToCommit,
}

/// Snapshot of the session, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    pub state: SyncState,
    pub cursor: usize,
    pub queue_len: usize,
    /// Items downloaded but not committed
    pub buffered: usize,
    /// 0-100
    pub percent: f64,
    /// Observed throughput, refreshed every few items
    pub observed_kbps: Option<f64>,
    pub remaining_kb: u64,
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            cursor: 0,
            queue_len: 0,
            buffered: 0,
            percent: 0.0,
            observed_kbps: None,
            remaining_kb: 0,
        }
    }
}

impl SyncProgress {
    /// Estimated seconds to drain the rest of the queue.
    pub fn eta_seconds(&self) -> Option<u64> {
        match self.observed_kbps {
            Some(kbps) if kbps > 0.0 => Some((self.remaining_kb as f64 / kbps).ceil() as u64),
            _ => None,
        }
    }

    pub fn speed_string(&self) -> Option<String> {
        self.observed_kbps.map(|kbps| {
            if kbps >= 1024.0 {
                format!("{:.1} MB/s", kbps / 1024.0)
            } else {
                format!("{:.0} KB/s", kbps)
            }
        })
    }

    pub fn eta_string(&self) -> Option<String> {
        self.eta_seconds().map(format_eta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(SyncState::Downloading.is_active());
        assert!(SyncState::Paused.is_active());
        assert!(!SyncState::Completed.is_active());
        assert!(!SyncState::Stopped.is_active());
    }

    #[test]
    fn test_eta_from_observed_speed() {
        let progress = SyncProgress {
            observed_kbps: Some(100.0),
            remaining_kb: 250,
            ..Default::default()
        };
        assert_eq!(progress.eta_seconds(), Some(3));
        assert_eq!(progress.eta_string().as_deref(), Some("3s"));
        assert_eq!(progress.speed_string().as_deref(), Some("100 KB/s"));
    }

    #[test]
    fn test_no_eta_without_speed() {
        assert_eq!(SyncProgress::default().eta_seconds(), None);
    }

    #[test]
    fn test_reason_is_user_readable() {
        assert!(Reason::WifiOnlyViolated.to_string().contains("metered"));
    }
}
