// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence substrates underneath the local store.
//!
//! A substrate is a durable key-value map of items keyed by identifier plus
//! an append-only activity log and a usage query. [`FileSubstrate`] keeps a
//! JSON document on disk guarded by a lock file; [`MemorySubstrate`] keeps
//! everything in process and is used for ephemeral caches and tests.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};

use super::log::SyncLogEntry;
use super::{StoreError, StoreResult};
use crate::types::ContentItem;
use crate::utils::{resilient_read, resilient_write};

/// Default timeout for acquiring file locks
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const ITEMS_FILE: &str = "items.json";
const LOG_FILE: &str = "sync_log.jsonl";

/// Operations the local store needs from its backing storage.
pub trait Substrate: Send + Sync {
    /// Upsert every item in one write. Either all land or none do.
    fn put_many(&self, items: Vec<ContentItem>) -> StoreResult<()>;

    /// All items ordered by identifier.
    fn get_all(&self) -> StoreResult<Vec<ContentItem>>;

    /// Remove the given identifiers, returning how many existed.
    fn delete(&self, ids: &[String]) -> StoreResult<usize>;

    /// Remove every item, returning how many there were.
    fn clear(&self) -> StoreResult<usize>;

    /// Bytes currently used by items, if the substrate can tell.
    fn usage_bytes(&self) -> StoreResult<Option<u64>>;

    fn append_log(&self, entry: &SyncLogEntry) -> StoreResult<()>;

    /// Log entries in insertion order.
    fn read_logs(&self) -> StoreResult<Vec<SyncLogEntry>>;
}

/// On-disk document holding the cached items.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CacheDocument {
    items: BTreeMap<String, ContentItem>,
    last_saved: Option<DateTime<Utc>>,
    /// Version for future migrations
    version: u32,
}

fn check_capacity(needed: u64, capacity: Option<u64>) -> StoreResult<()> {
    match capacity {
        Some(capacity) if needed > capacity => Err(StoreError::QuotaExceeded { needed, capacity }),
        _ => Ok(()),
    }
}

/// JSON-file substrate.
///
/// Writes go to a temp file and are renamed into place while an exclusive
/// lock on a sibling `.lock` file is held, so a crash never leaves a torn
/// document behind and two processes never write at once.
pub struct FileSubstrate {
    dir: PathBuf,
    capacity_bytes: Option<u64>,
    lock_timeout: Duration,
}

impl FileSubstrate {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity_bytes: None,
            lock_timeout: LOCK_TIMEOUT,
        })
    }

    /// Cap the size of the items document.
    pub fn with_capacity_bytes(mut self, capacity: u64) -> Self {
        self.capacity_bytes = Some(capacity);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn items_path(&self) -> PathBuf {
        self.dir.join(ITEMS_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.items_path().with_extension("lock")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn open_lock_file(path: &Path) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    /// Acquire an exclusive lock with timeout.
    fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> StoreResult<File> {
        let lock_file = Self::open_lock_file(path)?;
        let start = Instant::now();

        loop {
            match FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout(timeout));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Acquire a shared lock with timeout.
    fn acquire_shared_lock_with_timeout(path: &Path, timeout: Duration) -> StoreResult<File> {
        let lock_file = Self::open_lock_file(path)?;
        let start = Instant::now();

        loop {
            match FileExt::try_lock_shared(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout(timeout));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read the document. Caller must hold a lock.
    fn read_document(&self) -> StoreResult<CacheDocument> {
        let path = self.items_path();
        if !path.exists() {
            return Ok(CacheDocument {
                version: 1,
                ..Default::default()
            });
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(format!("{}: {}", ITEMS_FILE, e)))
    }

    /// Atomically replace the document. Caller must hold the exclusive lock.
    fn write_document(&self, doc: &mut CacheDocument) -> StoreResult<()> {
        doc.last_saved = Some(Utc::now());
        let content = serde_json::to_vec_pretty(doc)?;
        check_capacity(content.len() as u64, self.capacity_bytes)?;

        let path = self.items_path();
        let temp_path = path.with_extension("tmp");
        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            temp_file.write_all(&content)?;
            temp_file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Run a read-modify-write cycle under the exclusive lock.
    fn modify<T>(&self, f: impl FnOnce(&mut CacheDocument) -> T) -> StoreResult<T> {
        let _lock_guard = Self::acquire_exclusive_lock_with_timeout(&self.lock_path(), self.lock_timeout)?;
        let mut doc = self.read_document()?;
        let out = f(&mut doc);
        self.write_document(&mut doc)?;
        Ok(out)
    }
}

impl Substrate for FileSubstrate {
    fn put_many(&self, items: Vec<ContentItem>) -> StoreResult<()> {
        self.modify(|doc| {
            for item in items {
                doc.items.insert(item.id.clone(), item);
            }
        })
    }

    fn get_all(&self) -> StoreResult<Vec<ContentItem>> {
        let _lock = Self::acquire_shared_lock_with_timeout(&self.lock_path(), self.lock_timeout)?;
        Ok(self.read_document()?.items.into_values().collect())
    }

    fn delete(&self, ids: &[String]) -> StoreResult<usize> {
        self.modify(|doc| ids.iter().filter(|id| doc.items.remove(id.as_str()).is_some()).count())
    }

    fn clear(&self) -> StoreResult<usize> {
        self.modify(|doc| {
            let count = doc.items.len();
            doc.items.clear();
            count
        })
    }

    fn usage_bytes(&self) -> StoreResult<Option<u64>> {
        match fs::metadata(self.items_path()) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(0)),
            Err(e) => Err(e.into()),
        }
    }

    fn append_log(&self, entry: &SyncLogEntry) -> StoreResult<()> {
        let _lock_guard = Self::acquire_exclusive_lock_with_timeout(&self.lock_path(), self.lock_timeout)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.log_path())?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn read_logs(&self) -> StoreResult<Vec<SyncLogEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let _lock = Self::acquire_shared_lock_with_timeout(&self.lock_path(), self.lock_timeout)?;
        let reader = BufReader::new(File::open(&path)?);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                // A torn trailing line from a crash should not hide the rest of the history.
                Err(e) => tracing::warn!(line = lineno + 1, error = %e, "skipping unreadable sync log line"),
            }
        }
        Ok(entries)
    }
}

/// In-process substrate with an adjustable capacity.
#[derive(Default)]
pub struct MemorySubstrate {
    items: RwLock<BTreeMap<String, ContentItem>>,
    logs: RwLock<Vec<SyncLogEntry>>,
    capacity_bytes: RwLock<Option<u64>>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(capacity: u64) -> Self {
        let substrate = Self::default();
        substrate.set_capacity_bytes(Some(capacity));
        substrate
    }

    pub fn set_capacity_bytes(&self, capacity: Option<u64>) {
        *resilient_write(&self.capacity_bytes) = capacity;
    }

    fn encoded_len(items: &BTreeMap<String, ContentItem>) -> StoreResult<u64> {
        Ok(serde_json::to_vec(items)?.len() as u64)
    }
}

impl Substrate for MemorySubstrate {
    fn put_many(&self, items: Vec<ContentItem>) -> StoreResult<()> {
        let mut guard = resilient_write(&self.items);
        let mut next = guard.clone();
        for item in items {
            next.insert(item.id.clone(), item);
        }
        check_capacity(Self::encoded_len(&next)?, *resilient_read(&self.capacity_bytes))?;
        *guard = next;
        Ok(())
    }

    fn get_all(&self) -> StoreResult<Vec<ContentItem>> {
        Ok(resilient_read(&self.items).values().cloned().collect())
    }

    fn delete(&self, ids: &[String]) -> StoreResult<usize> {
        let mut guard = resilient_write(&self.items);
        Ok(ids.iter().filter(|id| guard.remove(id.as_str()).is_some()).count())
    }

    fn clear(&self) -> StoreResult<usize> {
        let mut guard = resilient_write(&self.items);
        let count = guard.len();
        guard.clear();
        Ok(count)
    }

    fn usage_bytes(&self) -> StoreResult<Option<u64>> {
        Ok(Some(Self::encoded_len(&resilient_read(&self.items))?))
    }

    fn append_log(&self, entry: &SyncLogEntry) -> StoreResult<()> {
        resilient_write(&self.logs).push(entry.clone());
        Ok(())
    }

    fn read_logs(&self) -> StoreResult<Vec<SyncLogEntry>> {
        Ok(resilient_read(&self.logs).clone())
    }
}
