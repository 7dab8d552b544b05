//! Keyed dependency cache
//!
//! The store is an external key-value service: `get` and `put` with no
//! transactions. Concurrent writers of the same key race benignly, the last
//! one wins, since identical keys are expected to hold identical content.

pub mod fs;

pub use fs::FsCacheStore;

use crate::core::{config::CacheConfig, RunContext};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Hex characters of the manifest digest kept in the key
const HASH_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// `{purpose}-{os}-{interpreter version}-{manifest hash}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key, hashing manifest paths and contents in order
    ///
    /// A missing manifest contributes its path and a `<missing>` marker, so
    /// adding the file later changes the key.
    pub fn derive(
        purpose: &str,
        os: &str,
        version: &str,
        workspace: &Path,
        manifests: &[String],
    ) -> Result<Self, CacheError> {
        let mut hasher = Sha256::new();
        for manifest in manifests {
            let path = workspace.join(manifest);
            hasher.update(manifest.as_bytes());
            hasher.update([0u8]);
            match std::fs::read(&path) {
                Ok(contents) => hasher.update(&contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => hasher.update(b"<missing>"),
                Err(e) => return Err(CacheError::io(path, e)),
            }
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());

        Ok(CacheKey(format!(
            "{}-{}-{}-{}",
            purpose,
            os,
            version,
            &digest[..HASH_LEN]
        )))
    }

    /// Key for a job's cache declaration in one cell's context
    ///
    /// `os` falls back to `matrix.os`, then the host OS; `version` falls
    /// back to `matrix.python-version`, then `any`.
    pub fn for_cell(
        config: &CacheConfig,
        context: &RunContext,
        workspace: &Path,
    ) -> Result<Self, CacheError> {
        let rendered = |template: &Option<String>| {
            template
                .as_deref()
                .map(|t| context.render(t))
                .filter(|v| !v.is_empty())
        };

        let os = rendered(&config.os)
            .or_else(|| context.matrix.get("os").map(str::to_string))
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        let version = rendered(&config.version)
            .or_else(|| context.matrix.get("python-version").map(str::to_string))
            .unwrap_or_else(|| "any".to_string());
        let manifests: Vec<String> = config.manifests.iter().map(|m| context.render(m)).collect();

        Self::derive(&config.purpose, &os, &version, workspace, &manifests)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file inside a cached directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// Path relative to the cached directory
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Restorable snapshot of a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub files: Vec<CachedFile>,
}

impl CacheEntry {
    /// Snapshot every regular file under `dir`
    pub fn snapshot(dir: &Path) -> Result<Self, CacheError> {
        let mut files = Vec::new();
        if dir.is_dir() {
            collect_files(dir, dir, &mut files)?;
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { files })
    }

    /// Write the snapshot under `dir`, creating directories as needed
    pub fn restore(&self, dir: &Path) -> Result<(), CacheError> {
        for file in &self.files {
            let target = dir.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
            }
            std::fs::write(&target, &file.contents).map_err(|e| CacheError::io(&target, e))?;
        }
        Ok(())
    }

    pub fn size_bytes(&self) -> usize {
        self.files.iter().map(|f| f.contents.len()).sum()
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<CachedFile>) -> Result<(), CacheError> {
    let entries = std::fs::read_dir(dir).map_err(|e| CacheError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let contents = std::fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            out.push(CachedFile {
                path: relative,
                contents,
            });
        }
    }
    Ok(())
}

/// Backend for the cache store
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, replacing whatever is under the key
    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError>;
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryCacheStore {
    entries: tokio::sync::RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().await.keys().cloned().collect()
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.clone(), entry);
        Ok(())
    }
}
