// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote catalog sources.
//!
//! A catalog is a list of [`ContentItem`]s with versions. Sources accept an
//! optional progress callback that receives a monotonically increasing
//! percentage and always ends at 100 on success.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use crate::types::ContentItem;
use crate::utils::{resilient_read, resilient_write};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Largest catalog body accepted from a server.
pub const DEFAULT_MAX_CATALOG_BYTES: u64 = 64 * 1024 * 1024;

/// Upper bound on the up-front buffer reservation, whatever the server claims.
const INITIAL_BODY_CAPACITY: u64 = 1024 * 1024;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self, progress: Option<&(dyn Fn(u8) + Send + Sync)>) -> Result<Vec<ContentItem>>;
}

/// Accepts either a bare array or `{"items": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<ContentItem>),
    Wrapped { items: Vec<ContentItem> },
}

impl CatalogDocument {
    fn into_items(self) -> Vec<ContentItem> {
        match self {
            Self::List(items) | Self::Wrapped { items } => items,
        }
    }
}

/// Parse a catalog document.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<ContentItem>> {
    let document: CatalogDocument = serde_json::from_slice(bytes).context("Failed to parse catalog")?;
    Ok(document.into_items())
}

fn report(progress: Option<&(dyn Fn(u8) + Send + Sync)>, percent: u8) {
    if let Some(callback) = progress {
        callback(percent.min(100));
    }
}

/// In-memory catalog.
#[derive(Default)]
pub struct StaticCatalog {
    items: RwLock<Vec<ContentItem>>,
}

impl StaticCatalog {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Replace the published items, e.g. to simulate a remote update.
    pub fn set_items(&self, items: Vec<ContentItem>) {
        *resilient_write(&self.items) = items;
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_catalog(&self, progress: Option<&(dyn Fn(u8) + Send + Sync)>) -> Result<Vec<ContentItem>> {
        let items = resilient_read(&self.items).clone();
        report(progress, 100);
        Ok(items)
    }
}

/// Catalog read from a JSON file on disk.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalog {
    async fn fetch_catalog(&self, progress: Option<&(dyn Fn(u8) + Send + Sync)>) -> Result<Vec<ContentItem>> {
        report(progress, 0);
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read catalog file: {:?}", self.path))?;
        let items = parse_catalog(&bytes)?;
        report(progress, 100);
        Ok(items)
    }
}

/// Catalog served over HTTP as JSON.
pub struct HttpCatalog {
    client: reqwest::Client,
    url: String,
    max_bytes: u64,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            max_bytes: DEFAULT_MAX_CATALOG_BYTES,
        }
    }

    /// Reject catalog bodies larger than `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_catalog(&self, progress: Option<&(dyn Fn(u8) + Send + Sync)>) -> Result<Vec<ContentItem>> {
        report(progress, 0);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to reach catalog at {}", self.url))?;

        if !response.status().is_success() {
            return Err(anyhow!("Catalog request failed: HTTP {}", response.status()));
        }

        let total = response.content_length();
        if let Some(total) = total.filter(|t| *t > self.max_bytes) {
            return Err(anyhow!(
                "Catalog too large: {} bytes announced, limit is {}",
                total,
                self.max_bytes
            ));
        }
        let reserve = total.map_or(0, |t| t.min(INITIAL_BODY_CAPACITY)) as usize;
        let mut body: Vec<u8> = Vec::with_capacity(reserve);
        let mut stream = response.bytes_stream();
        let mut last_reported = 0u8;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Catalog download interrupted")?;
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(anyhow!("Catalog body exceeds the {} byte limit", self.max_bytes));
            }
            body.extend_from_slice(&chunk);
            if let Some(total) = total.filter(|t| *t > 0) {
                // Hold 100 back until the body has parsed.
                let percent = ((body.len() as u64 * 100 / total).min(99)) as u8;
                if percent > last_reported {
                    last_reported = percent;
                    report(progress, percent);
                }
            }
        }

        let items = parse_catalog(&body)?;
        tracing::debug!(url = %self.url, items = items.len(), bytes = body.len(), "catalog fetched");
        report(progress, 100);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer a single HTTP request with `response` verbatim. Returns the URL.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/catalog.json", addr)
    }

    #[test]
    fn test_parse_both_shapes() {
        let bare = br#"[{"id":"a","category":"design","version":1,"title":"A"}]"#;
        let wrapped = br#"{"items":[{"id":"a","category":"design","version":1,"title":"A","size_kb":120}]}"#;
        assert_eq!(parse_catalog(bare).unwrap()[0].id, "a");
        let items = parse_catalog(wrapped).unwrap();
        assert_eq!(items[0].size_kb, Some(120));
        assert!(parse_catalog(b"{\"nope\":1}").is_err());
    }

    #[tokio::test]
    async fn test_static_catalog_reports_completion() {
        let catalog = StaticCatalog::new(vec![ContentItem::new("a", Category::Design, 1, "A")]);
        let seen = Mutex::new(Vec::new());
        let callback = |p: u8| seen.lock().unwrap().push(p);
        let items = catalog.fetch_catalog(Some(&callback)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[tokio::test]
    async fn test_file_catalog() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"[{"id":"x","category":"science","version":4,"title":"X"}]"#).unwrap();

        let items = FileCatalog::new(&path).fetch_catalog(None).await.unwrap();
        assert_eq!(items[0].version, 4);
        assert!(FileCatalog::new(dir.path().join("missing.json")).fetch_catalog(None).await.is_err());
    }

    #[tokio::test]
    async fn test_http_catalog_parses_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 56\r\nConnection: close\r\n\r\n[{\"id\":\"h\",\"category\":\"design\",\"version\":2,\"title\":\"H\"}]",
        )
        .await;
        let items = HttpCatalog::new(url).fetch_catalog(None).await.unwrap();
        assert_eq!(items[0].id, "h");
        assert_eq!(items[0].version, 2);
    }

    #[tokio::test]
    async fn test_http_catalog_rejects_absurd_content_length() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 9223372036854775000\r\n\r\n[]").await;
        let result = HttpCatalog::new(url).fetch_catalog(None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_catalog_enforces_limit_without_length() {
        let url = serve_once("HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n[{\"id\":\"long-enough\"}]").await;
        let err = HttpCatalog::new(url)
            .with_max_bytes(8)
            .fetch_catalog(None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
    }
}
