//! Deterministic on-disk cache with TTL, atomic writes, and stampede locks.
//!
//! Logical keys (`meta:ruby:rails`) are digested with SHA-256 and stored at
//! `<root>/ab/cd/<digest>.cache`, bounding directory fan-out and keeping the
//! paths stable across processes - two unrelated invocations on the same
//! host share cached work. The key-to-path derivation is a durable format.
//!
//! Writers stage into a temporary sibling and rename onto the final path,
//! so readers never observe torn data and reads take no lock. A bounded
//! in-memory hot tier sits in front of the disk.

use std::path::PathBuf;
use std::time::Duration;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Live registry metadata.
pub const TTL_SHORT: Duration = Duration::from_secs(24 * 60 * 60);
/// Version lists, dependents counts, source-host repo facts.
pub const TTL_LONG: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Last-seen maintainer identity for the ownership detector.
pub const TTL_OWNERSHIP: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const HOT_TIER_CAPACITY: u64 = 1000;
const STAMPEDE_RETRIES: u32 = 5;
const STAMPEDE_POLL: Duration = Duration::from_millis(50);

/// On-disk entry body: `{val, ts, ttl}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    val: Value,
    /// Write time, unix seconds.
    ts: i64,
    /// TTL recorded at write time, seconds. Freshness checks use the
    /// caller's TTL; this field documents the writer's intent.
    ttl: u64,
}

pub struct Cache {
    root: PathBuf,
    hot: moka::sync::Cache<String, Envelope>,
}

/// Removes the per-key lock file when the writer is done.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn now_secs() -> i64 {
    Timestamp::now().as_second()
}

fn fresh(envelope: &Envelope, ttl: Duration, now: i64) -> bool {
    now - envelope.ts < ttl.as_secs() as i64
}

impl Cache {
    /// Open (and create, mode 0700) the cache at `root`.
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self {
            root,
            hot: moka::sync::Cache::builder()
                .max_capacity(HOT_TIER_CAPACITY)
                .build(),
        })
    }

    /// Open the default home-scoped cache.
    pub fn open_default() -> Result<Self> {
        Self::new(crate::paths::cache_dir())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(format!("{digest}.cache"))
    }

    /// Return the stored value iff it was written less than `ttl` ago.
    /// Expired and corrupt entries are deleted opportunistically.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Value> {
        let now = now_secs();

        if let Some(envelope) = self.hot.get(key) {
            if fresh(&envelope, ttl, now) {
                return Some(envelope.val);
            }
            self.hot.invalidate(key);
        }

        let path = self.entry_path(key);
        let raw = std::fs::read(&path).ok()?;
        let Ok(envelope) = serde_json::from_slice::<Envelope>(&raw) else {
            tracing::debug!(key, "corrupt cache entry, removing");
            let _ = std::fs::remove_file(&path);
            return None;
        };
        if !fresh(&envelope, ttl, now) {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        self.hot.insert(key.to_string(), envelope.clone());
        Some(envelope.val)
    }

    /// Serialize and install `{value, now, ttl}` atomically.
    pub fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let envelope = Envelope {
            val: value.clone(),
            ts: now_secs(),
            ttl: ttl.as_secs(),
        };

        let path = self.entry_path(key);
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)?;

        // Stage to a sibling, then rename: partial writes never observable.
        let staged = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer(staged.as_file(), &envelope)?;
        staged
            .persist(&path)
            .map_err(|e| crate::error::ScanError::Io(e.error))?;

        self.hot.insert(key.to_string(), envelope);
        Ok(())
    }

    /// Cache-or-compute. On a miss, one writer holds the per-key lock while
    /// it runs `producer`; contenders briefly yield and retry-read, and fall
    /// back to producing for themselves only if the holder stalls.
    /// Absent producer results are returned but never stored.
    pub async fn fetch<F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Value>>>,
    {
        if let Some(value) = self.get(key, ttl) {
            return Ok(Some(value));
        }

        if let Some(_guard) = self.try_lock(key)? {
            // Double-check under the lock; a contender may have won.
            if let Some(value) = self.get(key, ttl) {
                return Ok(Some(value));
            }
            let produced = producer().await?;
            if let Some(ref value) = produced {
                self.set(key, value, ttl)?;
            }
            return Ok(produced);
        }

        for _ in 0..STAMPEDE_RETRIES {
            tokio::time::sleep(STAMPEDE_POLL).await;
            if let Some(value) = self.get(key, ttl) {
                return Ok(Some(value));
            }
        }

        // Lock holder stalled or died; the rename keeps racing writers safe.
        tracing::debug!(key, "cache lock contention timeout, producing independently");
        let produced = producer().await?;
        if let Some(ref value) = produced {
            self.set(key, value, ttl)?;
        }
        Ok(produced)
    }

    /// Exclusive-create the per-key lock file.
    fn try_lock(&self, key: &str) -> Result<Option<LockGuard>> {
        let path = self.entry_path(key).with_extension("lock");
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)?;

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Some(LockGuard { path })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    fn evict_hot(&self, key: &str) {
        self.hot.invalidate(key);
    }

    #[cfg(test)]
    fn disk_path(&self, key: &str) -> PathBuf {
        self.entry_path(key)
    }
}

/// Convenience for adapters caching plain JSON documents under a key.
pub fn cache_key(kind: &str, ecosystem: &str, name: &str) -> String {
    format!("{kind}:{ecosystem}:{name}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, Cache) {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (_dir, cache) = scratch();
        let value = json!({"downloads": 12345, "name": "rails"});
        cache.set("meta:ruby:rails", &value, TTL_SHORT).unwrap();
        assert_eq!(cache.get("meta:ruby:rails", TTL_SHORT), Some(value));
    }

    #[test]
    fn test_get_miss() {
        let (_dir, cache) = scratch();
        assert_eq!(cache.get("meta:ruby:nothing", TTL_SHORT), None);
    }

    #[test]
    fn test_expired_entry_removed() {
        let (_dir, cache) = scratch();
        let value = json!("v");
        cache.set("k", &value, TTL_SHORT).unwrap();
        // A zero TTL makes every entry stale.
        assert_eq!(cache.get("k", Duration::ZERO), None);
        assert!(!cache.disk_path("k").exists());
    }

    #[test]
    fn test_corrupt_entry_treated_as_absent() {
        let (_dir, cache) = scratch();
        cache.set("k", &json!(1), TTL_SHORT).unwrap();
        let path = cache.disk_path("k");
        std::fs::write(&path, b"{not json").unwrap();
        cache.evict_hot("k");
        assert_eq!(cache.get("k", TTL_SHORT), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_key_to_path_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let a = Cache::new(dir.path().join("c")).unwrap();
        let b = Cache::new(dir.path().join("c")).unwrap();
        assert_eq!(a.disk_path("meta:ruby:rails"), b.disk_path("meta:ruby:rails"));

        let rel = a
            .disk_path("meta:ruby:rails")
            .strip_prefix(dir.path().join("c"))
            .unwrap()
            .to_path_buf();
        let segments: Vec<_> = rel.components().collect();
        // Two 2-char shards, then <digest>.cache
        assert_eq!(segments.len(), 3);
        let file = rel.file_name().unwrap().to_string_lossy().to_string();
        assert!(file.ends_with(".cache"));
        assert_eq!(file.len(), 64 + ".cache".len());
    }

    #[test]
    fn test_cross_instance_sharing() {
        let dir = TempDir::new().unwrap();
        let writer = Cache::new(dir.path().join("c")).unwrap();
        writer.set("shared", &json!([1, 2, 3]), TTL_LONG).unwrap();
        let reader = Cache::new(dir.path().join("c")).unwrap();
        assert_eq!(reader.get("shared", TTL_LONG), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_hot_tier_serves_after_disk_loss() {
        let (_dir, cache) = scratch();
        cache.set("k", &json!("warm"), TTL_SHORT).unwrap();
        std::fs::remove_file(cache.disk_path("k")).unwrap();
        assert_eq!(cache.get("k", TTL_SHORT), Some(json!("warm")));
    }

    #[tokio::test]
    async fn test_fetch_computes_once() {
        let (_dir, cache) = scratch();
        let calls = std::sync::atomic::AtomicU32::new(0);

        for _ in 0..3 {
            let got = cache
                .fetch("k", TTL_SHORT, || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(Some(json!(7)))
                })
                .await
                .unwrap();
            assert_eq!(got, Some(json!(7)));
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_absent_not_stored() {
        let (_dir, cache) = scratch();
        let got = cache.fetch("gone", TTL_SHORT, || async { Ok(None) }).await.unwrap();
        assert_eq!(got, None);
        assert!(!cache.disk_path("gone").exists());

        // Next fetch runs the producer again.
        let got = cache
            .fetch("gone", TTL_SHORT, || async { Ok(Some(json!("late"))) })
            .await
            .unwrap();
        assert_eq!(got, Some(json!("late")));
    }

    #[tokio::test]
    async fn test_fetch_contender_falls_back_when_holder_stalls() {
        let (_dir, cache) = scratch();
        // Simulate a stalled writer by holding the lock file externally.
        let lock_path = cache.disk_path("busy").with_extension("lock");
        std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        std::fs::write(&lock_path, b"").unwrap();

        let got = cache
            .fetch("busy", TTL_SHORT, || async { Ok(Some(json!("fallback"))) })
            .await
            .unwrap();
        assert_eq!(got, Some(json!("fallback")));
    }

    #[test]
    fn test_lock_guard_releases() {
        let (_dir, cache) = scratch();
        {
            let guard = cache.try_lock("k").unwrap();
            assert!(guard.is_some());
            // Second writer is excluded while the guard lives.
            assert!(cache.try_lock("k").unwrap().is_none());
        }
        assert!(cache.try_lock("k").unwrap().is_some());
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("meta", "ruby", "rails"), "meta:ruby:rails");
    }
}
