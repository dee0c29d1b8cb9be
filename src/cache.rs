//! Durable content-addressed cache for extracted page text.
//!
//! One file per canonical URL, named by the lowercase hex SHA-256 of the
//! key. Writes go to a temp file in the same directory and are renamed
//! into place, so readers never observe partial content. Concurrent
//! writers to the same key are allowed; the last rename wins. Read and
//! write failures are logged and downgraded (miss / no-op), never raised.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-backed key→text store. When disabled, both operations are no-ops.
#[derive(Debug)]
pub struct ContentCache {
    enabled: bool,
    dir: PathBuf,
}

impl ContentCache {
    pub fn new(enabled: bool, dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            dir: dir.into(),
        }
    }

    /// A cache that ignores all operations.
    pub fn disabled() -> Self {
        Self::new(false, PathBuf::new())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The hex digest used as the file name for a key.
    pub fn digest(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(Self::digest(key))
    }

    /// Read the cached text for a key. Absent or unreadable entries are
    /// misses.
    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                debug!(key, "Cache hit");
                Some(text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write text for a key atomically (temp file + rename).
    pub async fn put(&self, key: &str, text: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.try_put(key, text).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn try_put(&self, key: &str, text: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.entry_path(key);
        let serial = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .dir
            .join(format!("{}.{}.tmp", Self::digest(key), serial));
        tokio::fs::write(&temp, text).await?;
        tokio::fs::rename(&temp, &target).await
    }

    /// Remove every cache entry, returning the number removed. Tolerates
    /// concurrent removal and skips anything that is not an entry file.
    pub async fn clear(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut removed = 0usize;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !is_entry_name(&entry.file_name()) {
                continue;
            }
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        debug!(removed, "Cleared content cache");
        removed
    }

    /// Number of entry files currently on disk.
    pub async fn entry_count(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut count = 0usize;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if is_entry_name(&entry.file_name()) {
                count += 1;
            }
        }
        count
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

/// Entry files are exactly 64 lowercase hex characters.
fn is_entry_name(name: &std::ffi::OsStr) -> bool {
    match name.to_str() {
        Some(s) => s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
