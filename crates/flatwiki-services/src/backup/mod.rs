//! Encrypted backup pipeline.
//!
//! One process-wide job at a time: enumerate the data tree, pack it with
//! the configured [`Archiver`], derive an archive key from the passphrase,
//! stream-encrypt, publish the artifact atomically, and leave a checksum
//! sidecar next to it. Status is observable throughout via point-in-time
//! snapshots; all temporary files are removed whether the job succeeds or
//! fails.

pub mod crypto;

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::RngCore;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use flatwiki_core::{AppError, BackupPhase, BackupStatus, Config, SingleFlight};
use flatwiki_storage::{BackupArtifactInfo, BackupStore};

use crate::archive::{Archiver, ProgressFn};
use crate::hash::sha256_file;
use crypto::{
    decode_field, derive_key, open_artifact, BackupHeader, KdfParams, BACKUP_MAGIC, NONCE_LEN,
    SALT_LEN, TAG_LEN,
};

const COPY_BUF_LEN: usize = 64 * 1024;

/// Result of a start request.
#[derive(Clone, Debug)]
pub struct StartOutcome {
    pub started: bool,
    pub reason: Option<String>,
    pub status: BackupStatus,
}

/// Shared, observable job state. Percent updates are monotonic within a
/// job; `running` flips only on reset and terminal transitions.
#[derive(Clone, Default)]
struct StatusHandle(Arc<RwLock<BackupStatus>>);

impl StatusHandle {
    fn update(&self, f: impl FnOnce(&mut BackupStatus)) {
        let mut status = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    fn snapshot(&self) -> BackupStatus {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin(&self) {
        self.update(|s| {
            *s = BackupStatus {
                phase: BackupPhase::Preparing,
                running: true,
                message: "Preparing backup".to_string(),
                started_at: Some(Utc::now()),
                ..BackupStatus::default()
            };
        });
    }

    fn progress(&self, phase: BackupPhase, percent: u8, message: &str) {
        self.update(|s| {
            s.phase = phase;
            s.running = phase.is_running();
            s.percent = s.percent.max(percent.min(100));
            s.message = message.to_string();
        });
    }

    fn percent(&self, percent: u8) {
        self.update(|s| s.percent = s.percent.max(percent.min(100)));
    }

    fn finish_done(&self, name: String, size: u64) {
        self.update(|s| {
            s.phase = BackupPhase::Done;
            s.running = false;
            s.percent = 100;
            s.message = format!("Backup complete: {}", name);
            s.archive_name = Some(name);
            s.archive_size = Some(size);
            s.finished_at = Some(Utc::now());
            s.error = None;
        });
    }

    fn finish_error(&self, message: String) {
        self.update(|s| {
            s.phase = BackupPhase::Error;
            s.running = false;
            s.message = "Backup failed".to_string();
            s.error = Some(message);
            s.finished_at = Some(Utc::now());
        });
    }
}

pub struct BackupService {
    config: Arc<Config>,
    store: Arc<BackupStore>,
    archiver: Arc<dyn Archiver>,
    flight: SingleFlight,
    status: StatusHandle,
}

impl BackupService {
    pub fn new(config: Arc<Config>, store: Arc<BackupStore>, archiver: Arc<dyn Archiver>) -> Self {
        Self {
            config,
            store,
            archiver,
            flight: SingleFlight::new(),
            status: StatusHandle::default(),
        }
    }

    /// Current job snapshot.
    pub fn status(&self) -> BackupStatus {
        self.status.snapshot()
    }

    /// Start a backup job. A second start while one is in flight is not an
    /// error; it is refused with the current status. The job itself runs on
    /// a spawned task and is observed via [`BackupService::status`].
    pub fn start(&self) -> StartOutcome {
        let Some(permit) = self.flight.try_begin() else {
            return StartOutcome {
                started: false,
                reason: Some("already running".to_string()),
                status: self.status(),
            };
        };

        let Some(passphrase) = self.config.backup.passphrase.clone() else {
            drop(permit);
            return StartOutcome {
                started: false,
                reason: Some("backup passphrase not configured".to_string()),
                status: self.status(),
            };
        };
        if self.config.secrets.active.as_deref() == Some(passphrase.as_str()) {
            drop(permit);
            return StartOutcome {
                started: false,
                reason: Some(
                    "backup passphrase must differ from the secret encryption key".to_string(),
                ),
                status: self.status(),
            };
        }

        self.status.begin();

        let ctx = JobContext {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            archiver: Arc::clone(&self.archiver),
            status: self.status.clone(),
            passphrase,
        };
        tokio::spawn(async move {
            // Held for the whole job; dropping it in any exit path frees
            // the single-flight slot.
            let _permit = permit;
            run_job(ctx).await;
        });

        StartOutcome {
            started: true,
            reason: None,
            status: self.status(),
        }
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupArtifactInfo>, AppError> {
        Ok(self.store.list_artifacts().await?)
    }

    /// Pattern-gated resolution for download; `None` for anything that is
    /// not an exact artifact basename.
    pub async fn resolve_backup_file_path(&self, name: &str) -> Option<PathBuf> {
        self.store.resolve_backup_file_path(name).await
    }

    pub async fn delete_backup(&self, name: &str) -> Result<(), AppError> {
        Ok(self.store.delete_artifact(name).await?)
    }

    pub async fn read_checksum_sidecar(&self, name: &str) -> Option<String> {
        self.store.read_checksum_sidecar(name).await
    }

    /// Decrypt an artifact back into a `.tar.gz` at `dest`, re-deriving the
    /// key from the header's recorded KDF parameters. Returns the plaintext
    /// size. Unpacking the archive is left to the restore glue.
    pub async fn decrypt_backup(
        &self,
        name: &str,
        passphrase: &str,
        dest: &Path,
    ) -> Result<u64, AppError> {
        let path = self
            .resolve_backup_file_path(name)
            .await
            .ok_or_else(|| AppError::NotFound(format!("backup {}", name)))?;

        let result = decrypt_artifact(&path, passphrase, dest).await;
        match result {
            Ok(size) => {
                tracing::info!(backup = %name, plaintext_bytes = size, "Backup decrypted");
                Ok(size)
            }
            Err(e) => {
                let _ = fs::remove_file(dest).await;
                Err(AppError::Crypto(e.to_string()))
            }
        }
    }
}

async fn decrypt_artifact(
    path: &Path,
    passphrase: &str,
    dest: &Path,
) -> anyhow::Result<u64> {
    let (header, mut reader) = open_artifact(path).await?;
    let salt: [u8; SALT_LEN] = decode_field(&header.salt, "salt")?;
    let iv: [u8; NONCE_LEN] = decode_field(&header.iv, "iv")?;
    let tag: [u8; TAG_LEN] = decode_field(&header.tag, "tag")?;

    let key = derive_key(
        passphrase,
        salt,
        header.kdf.n,
        header.kdf.r,
        header.kdf.p,
    )
    .await?;

    let mut out = fs::File::create(dest).await?;
    let written = crypto::decrypt_stream(&key, &iv, &tag, &mut reader, &mut out).await?;
    out.sync_all().await?;
    Ok(written)
}

struct JobContext {
    config: Arc<Config>,
    store: Arc<BackupStore>,
    archiver: Arc<dyn Archiver>,
    status: StatusHandle,
    passphrase: String,
}

struct TempPaths {
    archive: PathBuf,
    cipher: PathBuf,
    artifact: PathBuf,
}

impl TempPaths {
    fn new(backup_dir: &Path) -> Self {
        let token = Uuid::new_v4();
        Self {
            archive: backup_dir.join(format!(".tmp-archive-{}.tar.gz", token)),
            cipher: backup_dir.join(format!(".tmp-cipher-{}", token)),
            artifact: backup_dir.join(format!(".tmp-artifact-{}", token)),
        }
    }

    async fn cleanup(&self) {
        for path in [&self.archive, &self.cipher, &self.artifact] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }
}

async fn run_job(ctx: JobContext) {
    let temp = TempPaths::new(ctx.store.backup_dir());
    let result = run_pipeline(&ctx, &temp).await;
    // Temp files are purged on every exit path.
    temp.cleanup().await;

    match result {
        Ok((name, size)) => {
            tracing::info!(backup = %name, size_bytes = size, "Backup finished");
            ctx.status.finish_done(name, size);
        }
        Err(e) => {
            tracing::error!(error = %e, "Backup failed");
            ctx.status.finish_error(e.to_string());
        }
    }
}

async fn run_pipeline(ctx: &JobContext, temp: &TempPaths) -> anyhow::Result<(String, u64)> {
    use anyhow::Context as _;

    let status = &ctx.status;

    // Enumerate everything under the data root except the backup output
    // directory itself.
    status.progress(BackupPhase::Preparing, 2, "Enumerating data files");
    let files = enumerate_files(&ctx.config.data_dir, ctx.store.backup_dir())
        .await
        .context("failed to enumerate data files")?;
    let files_total = files.len() as u64;
    status.update(|s| s.files_total = files_total);
    status.progress(BackupPhase::Preparing, 10, "Data files enumerated");

    // Pack. Each completed entry advances the 10-65% span.
    status.progress(BackupPhase::Packing, 10, "Packing archive");
    let on_entry: ProgressFn = {
        let status = status.clone();
        Arc::new(move |done: u64| {
            status.update(|s| s.files_packed = done.min(files_total));
            status.percent(span_percent(10, 55, done, files_total));
        })
    };
    ctx.archiver
        .create_archive(&ctx.config.data_dir, &files, &temp.archive, on_entry)
        .await
        .context("archiving failed")?;
    status.progress(BackupPhase::Packing, 65, "Archive packed");

    // Derive the archive key and encrypt the archive stream.
    status.progress(BackupPhase::Encrypting, 65, "Deriving encryption key");
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let mut iv = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut iv);
    let backup_cfg = &ctx.config.backup;
    let key = derive_key(
        &ctx.passphrase,
        salt,
        backup_cfg.scrypt_n,
        backup_cfg.scrypt_r,
        backup_cfg.scrypt_p,
    )
    .await?;

    let archive_size = fs::metadata(&temp.archive).await?.len();
    let mut archive_in = fs::File::open(&temp.archive).await?;
    let mut cipher_out = fs::File::create(&temp.cipher).await?;
    let tag = {
        let status = status.clone();
        crypto::encrypt_stream(&key, &iv, &mut archive_in, &mut cipher_out, move |done| {
            status.percent(span_percent(65, 25, done, archive_size));
        })
        .await
        .context("encryption failed")?
    };
    cipher_out.sync_all().await?;
    drop(cipher_out);
    status.progress(BackupPhase::Encrypting, 90, "Archive encrypted");

    // Compose the artifact: magic line, metadata line, ciphertext.
    status.progress(BackupPhase::Writing, 90, "Writing backup artifact");
    let created_at = Utc::now();
    let name = ctx.store.generate_artifact_name(created_at);
    let header = BackupHeader {
        v: 1,
        alg: "aes-256-gcm".to_string(),
        kdf: KdfParams {
            name: "scrypt".to_string(),
            n: backup_cfg.scrypt_n,
            r: backup_cfg.scrypt_r,
            p: backup_cfg.scrypt_p,
        },
        salt: general_purpose::STANDARD.encode(salt),
        iv: general_purpose::STANDARD.encode(iv),
        tag: general_purpose::STANDARD.encode(tag),
        created_at,
        source: "flatwiki".to_string(),
    };

    let mut out = fs::File::create(&temp.artifact).await?;
    out.write_all(BACKUP_MAGIC.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.write_all(serde_json::to_string(&header)?.as_bytes())
        .await?;
    out.write_all(b"\n").await?;

    let cipher_size = fs::metadata(&temp.cipher).await?.len();
    let mut cipher_in = fs::File::open(&temp.cipher).await?;
    let mut copy_buf = vec![0u8; COPY_BUF_LEN];
    let mut appended: u64 = 0;
    loop {
        let n = cipher_in.read(&mut copy_buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&copy_buf[..n]).await?;
        appended += n as u64;
        status.percent(span_percent(90, 8, appended, cipher_size));
    }
    out.sync_all().await?;
    drop(out);

    let final_path = ctx.store.backup_dir().join(&name);
    fs::rename(&temp.artifact, &final_path)
        .await
        .context("failed to publish backup artifact")?;
    status.progress(BackupPhase::Writing, 98, "Computing checksum");

    // Checksum sidecar over the finished artifact.
    let digest = sha256_file(&final_path).await?;
    let sidecar = ctx.store.sidecar_path(&name);
    fs::write(&sidecar, format!("{}  {}\n", digest, name)).await?;

    let artifact_size = fs::metadata(&final_path).await?.len();
    Ok((name, artifact_size))
}

fn span_percent(base: u8, span: u8, done: u64, total: u64) -> u8 {
    if total == 0 {
        return base.saturating_add(span);
    }
    let scaled = (done.min(total) * span as u64) / total;
    base.saturating_add(scaled as u8)
}

/// All regular files under `root`, as relative paths, excluding `exclude`
/// and anything beneath it. Symlinks are skipped.
async fn enumerate_files(root: &Path, exclude: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut stack = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path == exclude {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.push(rel.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}
