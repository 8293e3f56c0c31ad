//! Backup artifact storage: strict naming, listing, resolution, deletion.
//!
//! Every filename coming in for download, delete, or restore is reduced to
//! its basename and matched against the exact artifact pattern before any
//! filesystem call; this is the sole traversal defense for the backup
//! directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::fs;

use crate::error::{StoreError, StoreResult};

const ARTIFACT_PATTERN: &str = r"^flatwiki-backup-\d{14}\.tar\.gz\.enc$";
const CHECKSUM_SUFFIX: &str = ".sha256";

/// A backup artifact on disk.
#[derive(Clone, Debug)]
pub struct BackupArtifactInfo {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub has_checksum: bool,
}

/// Owner of the backup output directory.
#[derive(Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
    artifact_re: Regex,
}

impl BackupStore {
    pub async fn new(backup_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let backup_dir = backup_dir.into();
        fs::create_dir_all(&backup_dir).await?;
        let artifact_re = Regex::new(ARTIFACT_PATTERN)
            .map_err(|e| StoreError::Metadata(format!("artifact pattern: {}", e)))?;
        Ok(Self {
            backup_dir,
            artifact_re,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Artifact name for a job started at `now`:
    /// `flatwiki-backup-<YYYYMMDDHHMMSS>.tar.gz.enc`.
    pub fn generate_artifact_name(&self, now: DateTime<Utc>) -> String {
        format!("flatwiki-backup-{}.tar.gz.enc", now.format("%Y%m%d%H%M%S"))
    }

    /// Whether a basename matches the strict artifact pattern.
    pub fn is_artifact_name(&self, name: &str) -> bool {
        self.artifact_re.is_match(name)
    }

    /// Resolve a client-supplied name to a path inside the backup
    /// directory. Only exact-pattern basenames of existing files resolve;
    /// anything else is `None`.
    pub async fn resolve_backup_file_path(&self, name: &str) -> Option<PathBuf> {
        let base = Path::new(name).file_name().and_then(|n| n.to_str())?;
        if !self.artifact_re.is_match(base) {
            return None;
        }
        let path = self.backup_dir.join(base);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// List existing artifacts, newest first.
    pub async fn list_artifacts(&self) -> StoreResult<Vec<BackupArtifactInfo>> {
        let mut entries = fs::read_dir(&self.backup_dir).await?;
        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.artifact_re.is_match(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let has_checksum = fs::try_exists(self.sidecar_path(&name))
                .await
                .unwrap_or(false);
            artifacts.push(BackupArtifactInfo {
                name,
                size_bytes: meta.len(),
                modified_at,
                has_checksum,
            });
        }
        // The timestamp is embedded in the name, so name order is age order.
        artifacts.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(artifacts)
    }

    /// Delete an artifact and its checksum sidecar. The sidecar removal is
    /// best-effort.
    pub async fn delete_artifact(&self, name: &str) -> StoreResult<()> {
        let path = self
            .resolve_backup_file_path(name)
            .await
            .ok_or_else(|| StoreError::NotFound(format!("backup {}", name)))?;
        fs::remove_file(&path).await?;
        if let Err(e) = fs::remove_file(self.sidecar_path_for(&path)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(backup = %name, error = %e, "Failed to remove checksum sidecar");
            }
        }
        tracing::info!(backup = %name, "Backup artifact deleted");
        Ok(())
    }

    /// Contents of the `.sha256` sidecar, when present.
    pub async fn read_checksum_sidecar(&self, name: &str) -> Option<String> {
        if !self.artifact_re.is_match(name) {
            return None;
        }
        fs::read_to_string(self.sidecar_path(name)).await.ok()
    }

    pub fn sidecar_path(&self, name: &str) -> PathBuf {
        self.backup_dir.join(format!("{}{}", name, CHECKSUM_SUFFIX))
    }

    fn sidecar_path_for(&self, artifact_path: &Path) -> PathBuf {
        let mut sidecar = artifact_path.as_os_str().to_owned();
        sidecar.push(CHECKSUM_SUFFIX);
        PathBuf::from(sidecar)
    }
}
