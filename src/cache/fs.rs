//! Filesystem-backed cache store
//!
//! Each key is a directory under the store root holding the cached files
//! and an id file naming that generation of the entry. Writes go to a
//! staging directory first. The old entry is renamed aside before the
//! staging directory is renamed in, and deleted last. Readers compare the
//! id before and after taking a snapshot and retry when a swap raced them.

use super::{CacheEntry, CacheError, CacheKey, CacheStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

/// File inside each entry holding its generation id
const ENTRY_ID: &str = ".gatekeep-entry";

/// Snapshot attempts before a racing reader gives up and reports a miss
const READ_ATTEMPTS: usize = 3;

/// Cache store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under the user's local data directory
    pub fn default_location() -> Option<Self> {
        dirs::data_local_dir().map(|dir| Self::new(dir.join("gatekeep").join("cache")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(sanitize(key.as_str()))
    }
}

/// Keys become directory names; anything outside `[A-Za-z0-9._-]` is replaced
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_entry(root: &Path, target: &Path, entry: &CacheEntry) -> Result<(), CacheError> {
    std::fs::create_dir_all(root).map_err(|e| CacheError::io(root, e))?;

    let staging = root.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
    let id_file = staging.join(ENTRY_ID);
    let staged = std::fs::create_dir_all(&staging)
        .map_err(|e| CacheError::io(&staging, e))
        .and_then(|()| entry.restore(&staging))
        .and_then(|()| {
            std::fs::write(&id_file, Uuid::new_v4().to_string())
                .map_err(|e| CacheError::io(&id_file, e))
        });
    if let Err(e) = staged {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    // Move the old entry aside so the key never points at a partial directory
    let retired = root.join(format!("{}{}", RETIRED_PREFIX, Uuid::new_v4()));
    let had_old = match std::fs::rename(target, &retired) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(CacheError::io(target, e));
        }
    };

    let installed = std::fs::rename(&staging, target);
    if had_old {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            debug!("Failed to remove retired cache entry {}: {}", retired.display(), e);
        }
    }

    if let Err(e) = installed {
        let _ = std::fs::remove_dir_all(&staging);
        // A concurrent writer of the same key landed first
        if target.is_dir() {
            return Ok(());
        }
        return Err(CacheError::io(target, e));
    }
    Ok(())
}

fn entry_id(dir: &Path) -> Option<String> {
    std::fs::read_to_string(dir.join(ENTRY_ID)).ok()
}

fn is_not_found(error: &CacheError) -> bool {
    matches!(error, CacheError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
}

fn read_entry(dir: &Path) -> Result<Option<CacheEntry>, CacheError> {
    for _ in 0..READ_ATTEMPTS {
        // Between the two renames of a swap the key has no directory
        let Some(before) = entry_id(dir) else {
            if dir.is_dir() {
                continue;
            }
            return Ok(None);
        };
        let snapshot = CacheEntry::snapshot(dir);
        if entry_id(dir).as_deref() != Some(before.as_str()) {
            debug!("Cache entry {} changed while reading, retrying", dir.display());
            continue;
        }
        match snapshot {
            Ok(mut entry) => {
                entry.files.retain(|f| f.path != Path::new(ENTRY_ID));
                return Ok(Some(entry));
            }
            Err(e) if is_not_found(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let dir = self.entry_dir(key);
        tokio::task::spawn_blocking(move || read_entry(&dir))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let root = self.root.clone();
        let target = self.entry_dir(key);
        debug!("Writing cache entry {} ({} bytes)", key, entry.size_bytes());
        tokio::task::spawn_blocking(move || write_entry(&root, &target, &entry))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
    }
}
