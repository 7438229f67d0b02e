// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sync activity log entries.
//!
//! Entries are immutable once created and are only produced by the
//! orchestrator at commit or clear time.
//!
//! Log line format:
//! `2024-01-15 10:23:45 | MANUAL | SUCCESS | 3 items | Synced 3 items`

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What caused the logged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Auto,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// One audit record of a commit or clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: Trigger,
    pub outcome: Outcome,
    pub detail: String,
    /// Number of items the action affected
    pub items_synced: usize,
}

impl SyncLogEntry {
    pub fn new(trigger: Trigger, outcome: Outcome, detail: impl Into<String>, items_synced: usize) -> Self {
        let timestamp = Utc::now();
        let suffix: u16 = rand::thread_rng().gen();
        Self {
            id: format!("log_{}_{:04x}", timestamp.timestamp_millis(), suffix),
            timestamp,
            trigger,
            outcome,
            detail: detail.into(),
            items_synced,
        }
    }

    pub fn success(trigger: Trigger, detail: impl Into<String>, items_synced: usize) -> Self {
        Self::new(trigger, Outcome::Success, detail, items_synced)
    }

    pub fn failed(trigger: Trigger, detail: impl Into<String>, items_synced: usize) -> Self {
        Self::new(trigger, Outcome::Failed, detail, items_synced)
    }

    /// Format as a human-readable log line in local time.
    pub fn to_log_line(&self) -> String {
        let local_time: DateTime<Local> = self.timestamp.into();
        format!(
            "{} | {:>6} | {:>7} | {} items | {}",
            local_time.format("%Y-%m-%d %H:%M:%S"),
            self.trigger.as_str(),
            self.outcome.as_str(),
            self.items_synced,
            self.detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_embeds_timestamp() {
        let entry = SyncLogEntry::success(Trigger::Manual, "a", 1);
        let prefix = format!("log_{}_", entry.timestamp.timestamp_millis());
        assert!(entry.id.starts_with(&prefix));
        assert_eq!(entry.outcome, Outcome::Success);
    }

    #[test]
    fn test_log_line_contains_fields() {
        let entry = SyncLogEntry::failed(Trigger::Auto, "quota exceeded", 4);
        let line = entry.to_log_line();
        assert!(line.contains("AUTO"));
        assert!(line.contains("FAILED"));
        assert!(line.contains("4 items"));
        assert!(line.contains("quota exceeded"));
    }

    #[test]
    fn test_serde_lowercase_tags() {
        let entry = SyncLogEntry::success(Trigger::Manual, "ok", 2);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"trigger\":\"manual\""));
        assert!(json.contains("\"outcome\":\"success\""));
    }
}
