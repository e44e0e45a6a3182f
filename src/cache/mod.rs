//! Artifact cache (§4.5's fingerprint keying, §3's CacheEntry, §9's bounded
//! LRU note): a fingerprint-keyed store for probed metadata and processed
//! media files, capped by total size and evicted by LRU + age. Mirrors the
//! shape of the engine's bounded history collections, generalized to a
//! size-aware LRU with an on-disk JSON index (§6's `cache_index.json`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::sync_ext::MutexExt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheEntryKind {
    Metadata,
    ProcessedArtifact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fingerprint: String,
    pub kind: CacheEntryKind,
    pub payload_path: PathBuf,
    pub size_bytes: u64,
    pub created_at_ms: u64,
    pub last_access_at_ms: u64,
    pub origin_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_hash: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct ArtifactCache {
    root: PathBuf,
    cap_bytes: u64,
    max_age: Duration,
    index: Mutex<CacheIndex>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub cap_bytes: u64,
    pub metadata_entries: usize,
    pub artifact_entries: usize,
}

impl ArtifactCache {
    pub fn new(root: PathBuf, cap_bytes: u64, max_age: Duration) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root.join("metadata"))?;
        std::fs::create_dir_all(root.join("videos"))?;
        std::fs::create_dir_all(root.join("thumbnails"))?;

        let index_path = root.join("cache_index.json");
        let index = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            CacheIndex::default()
        };

        Ok(Self {
            root,
            cap_bytes,
            max_age,
            index: Mutex::new(index),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("cache_index.json")
    }

    fn persist_locked(&self, index: &CacheIndex) {
        if let Ok(json) = serde_json::to_string_pretty(index) {
            if let Err(err) = std::fs::write(self.index_path(), json) {
                tracing::warn!(error = %err, "failed to persist cache index");
            }
        }
    }

    fn partition_dir(&self, kind: CacheEntryKind) -> &'static str {
        match kind {
            CacheEntryKind::Metadata => "metadata",
            CacheEntryKind::ProcessedArtifact => "videos",
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let mut index = self.index.lock_unpoisoned();
        if let Some(entry) = index.entries.get_mut(fingerprint) {
            entry.last_access_at_ms = now_ms();
            let entry = entry.clone();
            self.persist_locked(&index);
            return Some(entry);
        }
        None
    }

    /// Inserts a new entry, evicting by LRU until the size cap is respected.
    /// `payload_rel_path` is relative to the entry's partition directory.
    pub fn put(
        &self,
        fingerprint: String,
        kind: CacheEntryKind,
        payload_rel_path: &Path,
        size_bytes: u64,
        origin_source: String,
        params_hash: Option<String>,
    ) -> PathBuf {
        let payload_path = self.root.join(self.partition_dir(kind)).join(payload_rel_path);
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            kind,
            payload_path: payload_path.clone(),
            size_bytes,
            created_at_ms: now_ms(),
            last_access_at_ms: now_ms(),
            origin_source,
            params_hash,
        };

        let mut index = self.index.lock_unpoisoned();
        index.entries.insert(fingerprint, entry);
        self.evict_to_cap(&mut index);
        self.persist_locked(&index);
        payload_path
    }

    fn evict_to_cap(&self, index: &mut CacheIndex) {
        loop {
            let total: u64 = index.entries.values().map(|e| e.size_bytes).sum();
            if total <= self.cap_bytes {
                return;
            }
            let Some(victim) = index
                .entries
                .values()
                .min_by_key(|e| e.last_access_at_ms)
                .map(|e| e.fingerprint.clone())
            else {
                return;
            };
            if let Some(entry) = index.entries.remove(&victim) {
                let _ = std::fs::remove_file(&entry.payload_path);
            }
        }
    }

    /// Janitor sweep: drop entries idle longer than `max_age`.
    pub fn evict_expired(&self) -> usize {
        let cutoff = now_ms().saturating_sub(self.max_age.as_millis() as u64);
        let mut index = self.index.lock_unpoisoned();
        let stale: Vec<String> = index
            .entries
            .values()
            .filter(|e| e.last_access_at_ms < cutoff)
            .map(|e| e.fingerprint.clone())
            .collect();
        for fingerprint in &stale {
            if let Some(entry) = index.entries.remove(fingerprint) {
                let _ = std::fs::remove_file(&entry.payload_path);
            }
        }
        self.persist_locked(&index);
        stale.len()
    }

    pub fn clear(&self) {
        let mut index = self.index.lock_unpoisoned();
        for entry in index.entries.values() {
            let _ = std::fs::remove_file(&entry.payload_path);
        }
        index.entries.clear();
        self.persist_locked(&index);
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock_unpoisoned();
        let total_bytes = index.entries.values().map(|e| e.size_bytes).sum();
        let metadata_entries = index
            .entries
            .values()
            .filter(|e| e.kind == CacheEntryKind::Metadata)
            .count();
        let artifact_entries = index.entries.len() - metadata_entries;
        CacheStats {
            entry_count: index.entries.len(),
            total_bytes,
            cap_bytes: self.cap_bytes,
            metadata_entries,
            artifact_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(cap_bytes: u64) -> ArtifactCache {
        let dir = tempfile::tempdir().unwrap();
        ArtifactCache::new(dir.into_path(), cap_bytes, Duration::from_secs(7 * 24 * 3600)).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = cache(1024 * 1024);
        cache.put(
            "fp1".into(),
            CacheEntryKind::Metadata,
            Path::new("fp1.json"),
            10,
            "probe".into(),
            None,
        );
        let entry = cache.get("fp1").expect("entry must exist");
        assert_eq!(entry.size_bytes, 10);
    }

    #[test]
    fn eviction_respects_cap() {
        let cache = cache(15);
        cache.put(
            "a".into(),
            CacheEntryKind::ProcessedArtifact,
            Path::new("a.bin"),
            10,
            "src".into(),
            Some("hash-a".into()),
        );
        cache.put(
            "b".into(),
            CacheEntryKind::ProcessedArtifact,
            Path::new("b.bin"),
            10,
            "src".into(),
            Some("hash-b".into()),
        );
        let stats = cache.stats();
        assert!(stats.total_bytes <= 15);
        assert_eq!(stats.entry_count, 1);
    }
}
