// src/fingerprint.rs
// Delivered-item markers with time-based expiry. Insert-if-absent is the
// whole concurrency contract: first writer wins, later writers see `seen`.
// Expiry is a query-time predicate; purge only reclaims storage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::fetch::NormalizedItem;

/// Content key for one item: the canonical link, or a digest of
/// title+timestamp when the feed has no stable link.
pub fn content_key(item: &NormalizedItem) -> String {
    let link = item.link.trim();
    if !link.is_empty() {
        return link.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(item.title.as_bytes());
    hasher.update(item.published_at.unwrap_or_default().to_be_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Composite store key: one namespace per source.
pub fn fingerprint_key(source_id: &str, item: &NormalizedItem) -> String {
    format!("{source_id}:{}", content_key(item))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFingerprint {
    pub source_id: String,
    /// Unix seconds.
    pub recorded_at: i64,
    pub expires_at: i64,
}

pub struct FingerprintStore {
    inner: Mutex<HashMap<String, StoredFingerprint>>,
    path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl FingerprintStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Open a JSON-snapshot-backed store. A missing or corrupt snapshot
    /// starts empty with a warning; dedup degrades to at-least-once, which
    /// is the documented guarantee.
    pub async fn open(path: &Path) -> Self {
        let map = match tokio::fs::read_to_string(path).await {
            Ok(s) => match serde_json::from_str::<HashMap<String, StoredFingerprint>>(&s) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "fingerprint snapshot unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            inner: Mutex::new(map),
            path: Some(path.to_path_buf()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Present and not yet expired. An expired-but-unpurged entry is "not
    /// seen".
    pub fn seen(&self, key: &str, now: i64) -> bool {
        let map = self.inner.lock().expect("fingerprint lock poisoned");
        map.get(key).map_or(false, |fp| fp.expires_at > now)
    }

    /// Insert-if-absent. Returns true when this call created the active
    /// entry; false when an unexpired entry already existed (the caller
    /// lost the race and must not dispatch). Expired entries are replaced.
    pub fn record(&self, key: &str, source_id: &str, now: i64, expires_at: i64) -> bool {
        let mut map = self.inner.lock().expect("fingerprint lock poisoned");
        if let Some(existing) = map.get(key) {
            if existing.expires_at > now {
                return false;
            }
        }
        map.insert(
            key.to_string(),
            StoredFingerprint {
                source_id: source_id.to_string(),
                recorded_at: now,
                expires_at,
            },
        );
        self.dirty.store(true, Ordering::Relaxed);
        true
    }

    /// Advisory housekeeping; correctness never depends on it.
    pub fn purge_expired(&self, now: i64) -> usize {
        let mut map = self.inner.lock().expect("fingerprint lock poisoned");
        let before = map.len();
        map.retain(|_, fp| fp.expires_at > now);
        let removed = before - map.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("fingerprint lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the snapshot if anything changed since the last flush.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let snapshot = {
            let map = self.inner.lock().expect("fingerprint lock poisoned");
            serde_json::to_vec_pretty(&*map).context("serialize fingerprint snapshot")?
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        tokio::fs::write(path, snapshot)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
