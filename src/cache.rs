/// Per-identity TTL-bounded key cache, persisted as one JSON record per
/// identity under the cache directory
use crate::error::{KeygateError, KeygateResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::warn;

/// Distinguishes temp files written by concurrent tasks in one process;
/// the pid alone is not enough when a repeated identity fans out twice.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One cached fetch result for an external identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: String,
    pub keys: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// On-disk key cache shared across concurrent invocations.
///
/// Writes are atomic per identity (temp file, then rename), so a reader
/// racing a writer sees either the old record or the new one, never a torn
/// one. No cross-process locking: a corrupt read degrades to a miss.
#[derive(Debug, Clone)]
pub struct KeyCache {
    dir: PathBuf,
    ttl: Duration,
}

impl KeyCache {
    /// Create a cache rooted at `dir`, or a `keygate` subdirectory of the OS
    /// temp dir when unset. The directory is created if missing.
    pub fn new(dir: Option<PathBuf>, ttl: Duration) -> KeygateResult<Self> {
        let dir = dir.unwrap_or_else(|| std::env::temp_dir().join("keygate"));
        std::fs::create_dir_all(&dir).map_err(|e| {
            KeygateError::Cache(format!(
                "failed to create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(identity)))
    }

    /// Read the entry for an identity.
    ///
    /// A missing file is a miss, and so is a corrupt or half-written record.
    /// The flag reports whether a returned entry has outlived the TTL; an
    /// expired entry is still returned because the resolver needs it for
    /// offline fallback.
    pub async fn read(&self, identity: &str) -> KeygateResult<(Option<CacheEntry>, bool)> {
        let path = self.entry_path(identity);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((None, false)),
            Err(e) => {
                return Err(KeygateError::Cache(format!(
                    "failed to read cache file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(identity, error = %e, "corrupt cache record, treating as miss");
                return Ok((None, false));
            }
        };

        let expired = Utc::now() - entry.fetched_at > self.ttl;
        Ok((Some(entry), expired))
    }

    /// Store fresh keys for an identity, stamped with the current time
    pub async fn write(&self, identity: &str, keys: &[String]) -> KeygateResult<()> {
        self.write_entry(&CacheEntry {
            identity: identity.to_string(),
            keys: keys.to_vec(),
            fetched_at: Utc::now(),
        })
        .await
    }

    /// Persist an entry: serialize to a temp file in the cache directory,
    /// then rename over the final path.
    pub async fn write_entry(&self, entry: &CacheEntry) -> KeygateResult<()> {
        let path = self.entry_path(&entry.identity);
        let data = serde_json::to_vec_pretty(entry).map_err(|e| {
            KeygateError::Cache(format!("failed to serialize cache entry: {}", e))
        })?;

        let tmp = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, &data).await.map_err(|e| {
            KeygateError::Cache(format!(
                "failed to write cache file {}: {}",
                tmp.display(),
                e
            ))
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            KeygateError::Cache(format!(
                "failed to replace cache file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Remove the entry for an identity. Clearing an absent entry is not an
    /// error.
    pub async fn clear(&self, identity: &str) -> KeygateResult<()> {
        let path = self.entry_path(identity);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeygateError::Cache(format!(
                "failed to remove cache file {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Sanitize an identity for use as a file name.
///
/// Anything outside [A-Za-z0-9_-] becomes `_`, and an empty result maps to a
/// fixed token, so a hostile identity name cannot traverse out of the cache
/// directory or collide on path separators.
fn sanitize(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
