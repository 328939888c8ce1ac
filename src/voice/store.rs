//! Persistent store for synthesized audio
//!
//! Artifacts live as `<key>.mp3` in a single directory. Writes go to a
//! temporary file in the same directory and are renamed into place, so a
//! reader never observes a partially written artifact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::key::ContentKey;
use crate::{Error, Result};

/// File extension for stored artifacts
const ARTIFACT_EXT: &str = "mp3";

/// Prefix for in-progress writes; never matched by `get`
const PARTIAL_PREFIX: &str = ".partial-";

/// Where an artifact's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// Persisted file owned by the store
    File(PathBuf),
    /// Bytes held in memory because persisting them failed
    Memory(Arc<[u8]>),
}

/// A unit of synthesized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub key: ContentKey,
    pub location: ArtifactLocation,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl AudioArtifact {
    /// Wrap bytes that could not be persisted
    #[must_use]
    pub fn in_memory(key: ContentKey, bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            key,
            location: ArtifactLocation::Memory(bytes.into()),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Whether the artifact is backed by the store
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self.location, ArtifactLocation::File(_))
    }

    /// Load the audio bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backing file cannot be read
    pub async fn read_bytes(&self) -> Result<Arc<[u8]>> {
        match &self.location {
            ArtifactLocation::Memory(bytes) => Ok(Arc::clone(bytes)),
            ArtifactLocation::File(path) => tokio::fs::read(path)
                .await
                .map(Into::into)
                .map_err(|e| Error::Storage(format!("read {}: {e}", path.display()))),
        }
    }
}

/// Keyed storage for audio artifacts
///
/// `get` must never touch the network. `put` must be atomic per key.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Look up the artifact for `key`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the lookup itself fails (not on a miss)
    async fn get(&self, key: &ContentKey) -> Result<Option<AudioArtifact>>;

    /// Persist `bytes` under `key`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the write cannot complete
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> Result<AudioArtifact>;
}

/// Entry count and size of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Result of an eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub removed: usize,
    pub freed_bytes: u64,
}

/// Filesystem-backed artifact store with an optional size cap
///
/// When the cap is exceeded after a write, the least recently written
/// artifacts are removed first. The artifact just written is kept.
#[derive(Debug)]
pub struct FsArtifactStore {
    dir: PathBuf,
    max_bytes: Option<u64>,
    eviction: Mutex<()>,
}

/// Artifact file found while scanning the store
#[derive(Debug)]
struct Entry {
    key: ContentKey,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl FsArtifactStore {
    /// Open (and create if needed) a store rooted at `dir`
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the directory cannot be created
    pub fn open(dir: impl Into<PathBuf>, max_bytes: Option<u64>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("create {}: {e}", dir.display())))?;

        tracing::debug!(path = %dir.display(), ?max_bytes, "artifact store opened");

        Ok(Self {
            dir,
            max_bytes,
            eviction: Mutex::new(()),
        })
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an artifact for `key` is stored at
    #[must_use]
    pub fn path_for(&self, key: &ContentKey) -> PathBuf {
        self.dir.join(format!("{key}.{ARTIFACT_EXT}"))
    }

    /// Count stored artifacts and their total size
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the directory cannot be listed
    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.scan().await?;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|e| e.size).sum(),
        })
    }

    /// Enforce the size cap now
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the directory cannot be listed
    pub async fn prune(&self) -> Result<EvictionReport> {
        self.evict(None).await
    }

    async fn scan(&self) -> Result<Vec<Entry>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || scan_dir(&dir))
            .await
            .map_err(|e| Error::Storage(format!("scan task failed: {e}")))?
    }

    async fn evict(&self, keep: Option<&ContentKey>) -> Result<EvictionReport> {
        let Some(max_bytes) = self.max_bytes else {
            return Ok(EvictionReport::default());
        };

        let _guard = self.eviction.lock().await;
        let mut entries = self.scan().await?;
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= max_bytes {
            return Ok(EvictionReport::default());
        }

        entries.sort_by_key(|e| e.modified);

        let mut report = EvictionReport::default();
        for entry in entries {
            if total <= max_bytes {
                break;
            }
            if keep == Some(&entry.key) {
                continue;
            }
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    total = total.saturating_sub(entry.size);
                    report.removed += 1;
                    report.freed_bytes += entry.size;
                    tracing::debug!(key = %entry.key, bytes = entry.size, "evicted artifact");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    total = total.saturating_sub(entry.size);
                }
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "failed to evict artifact");
                }
            }
        }

        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                freed_bytes = report.freed_bytes,
                "artifact store pruned"
            );
        }

        Ok(report)
    }

    fn artifact_from(key: &ContentKey, path: PathBuf, meta: &std::fs::Metadata) -> AudioArtifact {
        let created_at = meta
            .modified()
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        AudioArtifact {
            key: key.clone(),
            location: ArtifactLocation::File(path),
            size_bytes: meta.len(),
            created_at,
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, key: &ContentKey) -> Result<Option<AudioArtifact>> {
        let path = self.path_for(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(Self::artifact_from(key, path, &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("stat {}: {e}", path.display()))),
        }
    }

    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> Result<AudioArtifact> {
        if bytes.is_empty() {
            return Err(Error::Storage("refusing to store empty artifact".to_string()));
        }

        // Artifacts are immutable once written
        if let Some(existing) = self.get(key).await? {
            return Ok(existing);
        }

        let dir = self.dir.clone();
        let path = self.path_for(key);
        let bytes = bytes.to_vec();
        let meta = tokio::task::spawn_blocking({
            let path = path.clone();
            move || write_atomic(&dir, &path, &bytes)
        })
        .await
        .map_err(|e| Error::Storage(format!("write task failed: {e}")))??;

        let artifact = Self::artifact_from(key, path, &meta);
        tracing::debug!(key = %key, bytes = artifact.size_bytes, "artifact stored");

        if let Err(e) = self.evict(Some(key)).await {
            tracing::warn!(error = %e, "eviction after put failed");
        }

        Ok(artifact)
    }
}

/// Write `bytes` to a temp file beside `path`, then rename over it
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<std::fs::Metadata> {
    let storage = |e: std::io::Error| Error::Storage(format!("write {}: {e}", path.display()));

    let mut tmp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(storage)?;
    tmp.write_all(bytes).map_err(storage)?;
    tmp.as_file().sync_all().map_err(storage)?;
    tmp.persist(path).map_err(|e| storage(e.error))?;

    std::fs::metadata(path).map_err(storage)
}

fn scan_dir(dir: &Path) -> Result<Vec<Entry>> {
    let read = std::fs::read_dir(dir)
        .map_err(|e| Error::Storage(format!("list {}: {e}", dir.display())))?;

    let entries = read
        .flatten()
        .filter_map(|item| {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                return None;
            }
            let key = ContentKey::from_hex(path.file_stem()?.to_str()?)?;
            let meta = item.metadata().ok().filter(std::fs::Metadata::is_file)?;
            Some(Entry {
                key,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            })
        })
        .collect();

    Ok(entries)
}
