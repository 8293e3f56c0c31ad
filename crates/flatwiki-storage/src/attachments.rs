//! Attachment blob and metadata storage.
//!
//! Owns the quarantine and attachments directories and the
//! `attachments.json` metadata document. All index mutations run inside the
//! per-resource lock and persist via write-temp-then-rename, so a crash
//! mid-write never leaves a torn document behind.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use rand::RngCore;
use tokio::fs;
use uuid::Uuid;

use flatwiki_core::validation::sanitize_filename;
use flatwiki_core::{AttachmentIndex, AttachmentRecord, Config, LockMap};

use crate::error::{StoreError, StoreResult};

const INDEX_FILE: &str = "attachments.json";
const QUARANTINE_SUFFIX: &str = "upload";

/// A file held in quarantine, not yet referenced by any persisted record.
#[derive(Clone, Debug)]
pub struct QuarantinedUpload {
    /// Where the HTTP layer must write the raw upload.
    pub path: PathBuf,
    /// Sanitized form of the client-supplied filename.
    pub safe_original_name: String,
}

/// Storage for attachment blobs and their metadata index.
#[derive(Clone)]
pub struct AttachmentStore {
    attachments_dir: PathBuf,
    quarantine_dir: PathBuf,
    index_path: PathBuf,
    locks: LockMap,
}

impl AttachmentStore {
    pub async fn new(config: &Config, locks: LockMap) -> StoreResult<Self> {
        for dir in [&config.attachments_dir, &config.quarantine_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(Self {
            attachments_dir: config.attachments_dir.clone(),
            quarantine_dir: config.quarantine_dir.clone(),
            index_path: config.data_dir.join(INDEX_FILE),
            locks,
        })
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// Allocate a quarantine slot for an incoming upload.
    ///
    /// The on-disk name is random and collision-resistant; nothing of the
    /// client-supplied name reaches the filesystem.
    pub fn create_quarantine_path(&self, original_name: &str) -> QuarantinedUpload {
        let file_name = format!("{}.{}", Uuid::new_v4(), QUARANTINE_SUFFIX);
        QuarantinedUpload {
            path: self.quarantine_dir.join(file_name),
            safe_original_name: sanitize_filename(original_name),
        }
    }

    /// Validate that `candidate` addresses a file directly inside the
    /// quarantine directory (basename-then-rejoin check) and return the
    /// rejoined path.
    pub fn checked_quarantine_path(&self, candidate: &Path) -> StoreResult<PathBuf> {
        let name = candidate
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StoreError::InvalidName("quarantine path has no file name".to_string())
            })?;
        let rejoined = self.quarantine_dir.join(name);
        if rejoined != candidate {
            return Err(StoreError::InvalidName(
                "path is outside the quarantine directory".to_string(),
            ));
        }
        Ok(rejoined)
    }

    /// Generate a server-side storage name: high-resolution timestamp plus
    /// a random component, with the validated extension.
    pub fn generate_storage_name(&self, extension: &str) -> String {
        format!(
            "{}-{:08x}.{}",
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            rand::rng().next_u32(),
            extension
        )
    }

    /// Absolute path for a record's blob. The storage name is re-validated
    /// even though it is server-generated; the index file on disk is input,
    /// not truth.
    pub fn resolve_attachment_path(&self, record: &AttachmentRecord) -> StoreResult<PathBuf> {
        let name = &record.storage_name;
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(StoreError::InvalidName(format!(
                "invalid storage name: {}",
                name
            )));
        }
        Ok(self.attachments_dir.join(name))
    }

    /// Open a record's blob for streaming to an HTTP response.
    pub async fn open_attachment_stream(
        &self,
        record: &AttachmentRecord,
    ) -> StoreResult<Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>>> {
        let path = self.resolve_attachment_path(record)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(record.storage_name.clone()));
        }
        let file = fs::File::open(&path).await?;
        let reader = tokio_util::io::ReaderStream::new(file);
        Ok(Box::pin(reader.map(|chunk| chunk.map_err(StoreError::Io))))
    }

    /// Filename offered to the browser on download.
    pub fn download_filename(&self, record: &AttachmentRecord) -> String {
        sanitize_filename(&record.original_name)
    }

    /// Best-effort blob removal; a missing file is not an error.
    pub async fn delete_blob(&self, storage_name: &str) {
        let path = self.attachments_dir.join(storage_name);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    storage_name = %storage_name,
                    error = %e,
                    "Failed to remove attachment blob"
                );
            }
        }
    }

    async fn load_index(&self) -> StoreResult<AttachmentIndex> {
        let raw = match fs::read(&self.index_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AttachmentIndex::default());
            }
            Err(e) => return Err(e.into()),
        };
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Attachment index unreadable; starting empty");
            serde_json::Value::Null
        });
        Ok(AttachmentIndex::normalize(value))
    }

    async fn save_index(&self, index: &AttachmentIndex) -> StoreResult<()> {
        let body = serde_json::to_vec_pretty(index)
            .map_err(|e| StoreError::Metadata(format!("failed to serialize index: {}", e)))?;
        // Temp file in the same directory so the rename stays atomic.
        let tmp = self
            .index_path
            .with_file_name(format!(".{}.tmp-{}", INDEX_FILE, Uuid::new_v4()));
        fs::write(&tmp, &body).await?;
        if let Err(e) = fs::rename(&tmp, &self.index_path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn index_lock_key(&self) -> String {
        self.index_path.to_string_lossy().into_owned()
    }

    /// Append a new record to the index (locked read-modify-write).
    pub async fn append_record(&self, record: AttachmentRecord) -> StoreResult<()> {
        self.locks
            .with_lock(&self.index_lock_key(), || async {
                let mut index = self.load_index().await?;
                index.attachments.push(record);
                self.save_index(&index).await
            })
            .await
    }

    /// Remove a record by id, returning it when present.
    pub async fn remove_record(&self, id: Uuid) -> StoreResult<Option<AttachmentRecord>> {
        self.locks
            .with_lock(&self.index_lock_key(), || async {
                let mut index = self.load_index().await?;
                let position = index.attachments.iter().position(|r| r.id == id);
                let Some(position) = position else {
                    return Ok(None);
                };
                let removed = index.attachments.remove(position);
                self.save_index(&index).await?;
                Ok(Some(removed))
            })
            .await
    }

    /// Remove every record for a page, returning the removed records.
    pub async fn remove_records_for_slug(
        &self,
        slug: &str,
    ) -> StoreResult<Vec<AttachmentRecord>> {
        self.locks
            .with_lock(&self.index_lock_key(), || async {
                let mut index = self.load_index().await?;
                let (removed, kept): (Vec<_>, Vec<_>) = index
                    .attachments
                    .drain(..)
                    .partition(|r| r.slug == slug);
                if removed.is_empty() {
                    return Ok(removed);
                }
                index.attachments = kept;
                self.save_index(&index).await?;
                Ok(removed)
            })
            .await
    }

    pub async fn records_for_slug(&self, slug: &str) -> StoreResult<Vec<AttachmentRecord>> {
        self.locks
            .with_lock(&self.index_lock_key(), || async {
                let index = self.load_index().await?;
                Ok(index
                    .attachments
                    .into_iter()
                    .filter(|r| r.slug == slug)
                    .collect())
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Option<AttachmentRecord>> {
        self.locks
            .with_lock(&self.index_lock_key(), || async {
                let index = self.load_index().await?;
                Ok(index.attachments.into_iter().find(|r| r.id == id))
            })
            .await
    }
}
