//! Attachment ingestion pipeline: quarantine -> validate -> scan -> hash ->
//! finalize -> persist.
//!
//! Every step is a hard gate. Any failure deletes the quarantine file and
//! returns the error; no partial record is ever persisted and no blob
//! reaches the attachments directory without a record following it.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use flatwiki_core::validation::{
    allowed_mime_types, check_magic_bytes, derive_extension, sanitize_filename, validate_slug,
    ValidationError, MAGIC_SNIFF_LEN,
};
use flatwiki_core::{Actor, AppError, AttachmentRecord, Config, ScanMode, ScanStatus};
use flatwiki_storage::{AttachmentStore, QuarantinedUpload};

use crate::hash::sha256_file;
use crate::scanner::{ScanOutcome, Scanner};

pub struct AttachmentPipeline {
    config: Arc<Config>,
    store: Arc<AttachmentStore>,
    scanner: Arc<dyn Scanner>,
}

impl AttachmentPipeline {
    pub fn new(config: Arc<Config>, store: Arc<AttachmentStore>, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            config,
            store,
            scanner,
        }
    }

    /// Allocate a quarantine slot for an incoming upload.
    pub fn create_quarantine_path(&self, original_name: &str) -> QuarantinedUpload {
        self.store.create_quarantine_path(original_name)
    }

    /// Promote a quarantined upload into a stored attachment.
    pub async fn finalize(
        &self,
        slug: &str,
        quarantine_path: &Path,
        original_name: &str,
        declared_mime: &str,
        uploader: &Actor,
    ) -> Result<AttachmentRecord, AppError> {
        let result = self
            .ingest(slug, quarantine_path, original_name, declared_mime, uploader)
            .await;

        if let Err(ref error) = result {
            tracing::warn!(
                slug = %slug,
                original_name = %original_name,
                error = %error,
                "Attachment ingestion rejected"
            );
            // The quarantine file is removed on every failure, but only via
            // its validated in-quarantine path.
            if let Ok(path) = self.store.checked_quarantine_path(quarantine_path) {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to remove quarantine file");
                    }
                }
            }
        }
        result
    }

    async fn ingest(
        &self,
        slug: &str,
        quarantine_path: &Path,
        original_name: &str,
        declared_mime: &str,
        uploader: &Actor,
    ) -> Result<AttachmentRecord, AppError> {
        validate_slug(slug).map_err(reject)?;
        let quarantine = self.store.checked_quarantine_path(quarantine_path)?;

        let safe_name = sanitize_filename(original_name);
        let extension = derive_extension(&safe_name).map_err(reject)?;
        let allowed = allowed_mime_types(&extension).ok_or_else(|| {
            reject(ValidationError::InvalidExtension(extension.clone()))
        })?;

        let mime_type = declared_mime.trim().to_lowercase();
        if !allowed.contains(&mime_type.as_str()) {
            return Err(reject(ValidationError::InvalidContentType {
                content_type: declared_mime.to_string(),
                extension,
            }));
        }

        let head = read_head(&quarantine).await?;
        check_magic_bytes(&extension, &head).map_err(reject)?;

        let size_bytes = fs::metadata(&quarantine).await?.len();
        if size_bytes == 0 {
            return Err(reject(ValidationError::EmptyFile));
        }
        if size_bytes > self.config.max_upload_size_bytes as u64 {
            return Err(reject(ValidationError::FileTooLarge {
                size: size_bytes,
                max: self.config.max_upload_size_bytes as u64,
            }));
        }

        let (scan_status, scanner) = self.run_scan(&quarantine).await?;
        let sha256 = sha256_file(&quarantine).await?;

        let storage_name = self.store.generate_storage_name(&extension);
        let final_path = self.store.attachments_dir().join(&storage_name);
        fs::rename(&quarantine, &final_path).await?;

        let record = AttachmentRecord {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            storage_name: storage_name.clone(),
            original_name: safe_name,
            mime_type,
            extension,
            size_bytes,
            sha256,
            uploaded_at: Utc::now(),
            uploader: uploader.uploader_info(),
            scan_status,
            scanner,
        };

        if let Err(e) = self.store.append_record(record.clone()).await {
            // The blob has already been promoted; without a record it is
            // unreachable, so take it back out.
            self.store.delete_blob(&storage_name).await;
            return Err(e.into());
        }

        tracing::info!(
            slug = %slug,
            attachment_id = %record.id,
            storage_name = %storage_name,
            size_bytes,
            scan_status = ?scan_status,
            "Attachment stored"
        );
        Ok(record)
    }

    /// Apply the configured scan policy to a quarantined file.
    async fn run_scan(&self, path: &Path) -> Result<(ScanStatus, Option<String>), AppError> {
        let mode = self.config.scan.mode;
        if mode == ScanMode::Off {
            return Ok((ScanStatus::Skipped, None));
        }

        if !self.scanner.is_available().await {
            return match mode {
                ScanMode::Optional => {
                    tracing::warn!("No virus scanner available; accepting upload as skipped");
                    Ok((ScanStatus::Skipped, None))
                }
                _ => Err(AppError::ScanRejected(
                    "no virus scanner available".to_string(),
                )),
            };
        }

        match self.scanner.scan_file(path).await {
            ScanOutcome::Clean => Ok((ScanStatus::Clean, Some(self.scanner.identifier()))),
            // Infections are fatal under every scanning mode.
            ScanOutcome::Infected(name) => Err(AppError::ScanRejected(format!(
                "malware detected: {}",
                name
            ))),
            ScanOutcome::Error(detail) => match mode {
                ScanMode::Optional => {
                    tracing::warn!(detail = %detail, "Scanner failed; accepting upload");
                    Ok((ScanStatus::Failed, Some(self.scanner.identifier())))
                }
                _ => Err(AppError::ScanRejected(format!("scan failed: {}", detail))),
            },
        }
    }

    /// Delete one attachment. Only the uploader or an administrator may do
    /// so; metadata goes first, the blob removal is best-effort.
    pub async fn delete_attachment(
        &self,
        id: Uuid,
        actor: &Actor,
    ) -> Result<AttachmentRecord, AppError> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("attachment {}", id)))?;

        if !actor.is_admin && actor.id != record.uploader.id {
            return Err(AppError::Unauthorized(
                "only the uploader or an administrator may delete an attachment".to_string(),
            ));
        }

        let removed = self
            .store
            .remove_record(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("attachment {}", id)))?;
        self.store.delete_blob(&removed.storage_name).await;

        tracing::info!(
            attachment_id = %id,
            actor = %actor.username,
            "Attachment deleted"
        );
        Ok(removed)
    }

    /// Cascade deletion for a page being removed.
    pub async fn delete_attachments_for_page(
        &self,
        slug: &str,
    ) -> Result<Vec<AttachmentRecord>, AppError> {
        validate_slug(slug).map_err(reject)?;
        let removed = self.store.remove_records_for_slug(slug).await?;
        for record in &removed {
            self.store.delete_blob(&record.storage_name).await;
        }
        if !removed.is_empty() {
            tracing::info!(slug = %slug, count = removed.len(), "Page attachments deleted");
        }
        Ok(removed)
    }

    pub async fn list_attachments(&self, slug: &str) -> Result<Vec<AttachmentRecord>, AppError> {
        validate_slug(slug).map_err(reject)?;
        Ok(self.store.records_for_slug(slug).await?)
    }

    pub async fn get_attachment(&self, id: Uuid) -> Result<Option<AttachmentRecord>, AppError> {
        Ok(self.store.get(id).await?)
    }
}

fn reject(err: ValidationError) -> AppError {
    AppError::InvalidInput(err.to_string())
}

async fn read_head(path: &Path) -> Result<Vec<u8>, AppError> {
    let mut file = fs::File::open(path).await?;
    let mut head = vec![0u8; MAGIC_SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    Ok(head)
}
