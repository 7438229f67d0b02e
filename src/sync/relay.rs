// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Optional session/log relay for server-paired deployments.
//!
//! Telemetry only. The orchestrator spawns every call and logs failures at
//! debug; nothing here can affect local sync state.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::store::SyncLogEntry;

use super::types::SyncState;

const RELAY_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait SessionRelay: Send + Sync {
    /// Register a session; returns the remote session id.
    async fn create_session(&self, total_items: usize) -> Result<String>;
    async fn update_session(&self, id: &str, progress: f64, state: SyncState) -> Result<()>;
    async fn post_log(&self, entry: &SyncLogEntry) -> Result<()>;
}

/// Relay that goes nowhere.
pub struct NoopRelay;

#[async_trait]
impl SessionRelay for NoopRelay {
    async fn create_session(&self, _total_items: usize) -> Result<String> {
        Ok("local".to_string())
    }

    async fn update_session(&self, _id: &str, _progress: f64, _state: SyncState) -> Result<()> {
        Ok(())
    }

    async fn post_log(&self, _entry: &SyncLogEntry) -> Result<()> {
        Ok(())
    }
}

#[derive(Deserialize)]
struct CreatedSession {
    id: String,
}

/// JSON relay: `POST /sessions`, `PATCH /sessions/{id}`, `POST /logs`.
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RELAY_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn check(response: &reqwest::Response, what: &str) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("Relay {} failed: HTTP {}", what, response.status()))
        }
    }
}

#[async_trait]
impl SessionRelay for HttpRelay {
    async fn create_session(&self, total_items: usize) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&json!({ "total_items": total_items, "status": SyncState::Downloading }))
            .send()
            .await
            .context("Failed to reach relay")?;
        Self::check(&response, "create session")?;
        let created: CreatedSession = response.json().await.context("Failed to parse relay session")?;
        Ok(created.id)
    }

    async fn update_session(&self, id: &str, progress: f64, state: SyncState) -> Result<()> {
        let response = self
            .client
            .patch(format!("{}/sessions/{}", self.base_url, id))
            .json(&json!({ "progress": progress, "status": state }))
            .send()
            .await
            .context("Failed to reach relay")?;
        Self::check(&response, "update session")
    }

    async fn post_log(&self, entry: &SyncLogEntry) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/logs", self.base_url))
            .json(entry)
            .send()
            .await
            .context("Failed to reach relay")?;
        Self::check(&response, "post log")
    }
}
