#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use flatwiki_core::{
    Actor, BackupConfig, Config, ScanConfig, ScanMode, SecretKeyConfig,
};
use flatwiki_services::archive::{Archiver, ProgressFn};
use flatwiki_services::scanner::{ScanOutcome, Scanner};

/// Test configuration rooted at a temp directory. Scrypt cost is lowered so
/// key derivation stays fast; the parameters remain structurally valid.
pub fn test_config(root: &Path, mode: ScanMode) -> Config {
    Config {
        data_dir: root.to_path_buf(),
        attachments_dir: root.join("attachments"),
        quarantine_dir: root.join("quarantine"),
        backup_dir: root.join("backups"),
        max_upload_size_bytes: 25 * 1024 * 1024,
        scan: ScanConfig {
            mode,
            scanner_bin: "clamscan".to_string(),
            timeout_secs: 30,
        },
        backup: BackupConfig {
            passphrase: Some("backup-passphrase".to_string()),
            scrypt_n: 1024,
            scrypt_r: 8,
            scrypt_p: 1,
        },
        secrets: SecretKeyConfig {
            active: Some("content-secret-key".to_string()),
            legacy: None,
        },
    }
}

pub fn alice() -> Actor {
    Actor {
        id: "u-alice".to_string(),
        username: "alice".to_string(),
        display_name: "Alice".to_string(),
        is_admin: false,
    }
}

pub fn bob(is_admin: bool) -> Actor {
    Actor {
        id: "u-bob".to_string(),
        username: "bob".to_string(),
        display_name: "Bob".to_string(),
        is_admin,
    }
}

#[derive(Clone, Copy)]
pub enum MockVerdict {
    Clean,
    Infected,
    Error,
}

/// Scanner double with a fixed availability and verdict.
pub struct MockScanner {
    pub available: bool,
    pub verdict: MockVerdict,
}

#[async_trait]
impl Scanner for MockScanner {
    fn identifier(&self) -> String {
        "mock-av".to_string()
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn scan_file(&self, _path: &Path) -> ScanOutcome {
        match self.verdict {
            MockVerdict::Clean => ScanOutcome::Clean,
            MockVerdict::Infected => ScanOutcome::Infected("Eicar-Test-Signature".to_string()),
            MockVerdict::Error => ScanOutcome::Error("scanner crashed".to_string()),
        }
    }
}

/// Archiver double that blocks until released, then writes a placeholder
/// archive. Lets tests observe a job mid-flight deterministically.
pub struct GatedArchiver {
    pub release: Arc<Notify>,
}

#[async_trait]
impl Archiver for GatedArchiver {
    async fn create_archive(
        &self,
        _root: &Path,
        _files: &[PathBuf],
        dest: &Path,
        on_entry: ProgressFn,
    ) -> anyhow::Result<()> {
        self.release.notified().await;
        tokio::fs::write(dest, b"placeholder-archive-bytes").await?;
        on_entry(1);
        Ok(())
    }
}

/// Archiver double that always fails.
pub struct FailingArchiver;

#[async_trait]
impl Archiver for FailingArchiver {
    async fn create_archive(
        &self,
        _root: &Path,
        _files: &[PathBuf],
        _dest: &Path,
        _on_entry: ProgressFn,
    ) -> anyhow::Result<()> {
        anyhow::bail!("archiver exploded: no space left on device")
    }
}
