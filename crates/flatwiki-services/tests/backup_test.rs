//! Encrypted backup pipeline integration tests.

mod helpers;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::sync::Notify;

use flatwiki_core::{BackupPhase, BackupStatus, ScanMode};
use flatwiki_services::backup::BackupService;
use flatwiki_services::{Archiver, TarBuilderArchiver};
use flatwiki_storage::BackupStore;

use helpers::{test_config, FailingArchiver, GatedArchiver};

async fn service_with(root: &Path, archiver: Arc<dyn Archiver>) -> BackupService {
    let config = Arc::new(test_config(root, ScanMode::Off));
    let store = Arc::new(BackupStore::new(&config.backup_dir).await.unwrap());
    BackupService::new(config, store, archiver)
}

async fn wait_terminal(service: &BackupService) -> BackupStatus {
    for _ in 0..1500 {
        let status = service.status();
        if status.phase.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("backup job did not reach a terminal phase");
}

async fn seed_data_tree(root: &Path) {
    tokio::fs::create_dir_all(root.join("pages")).await.unwrap();
    tokio::fs::create_dir_all(root.join("attachments")).await.unwrap();
    tokio::fs::write(root.join("pages/home.md"), b"# home page\n")
        .await
        .unwrap();
    tokio::fs::write(root.join("pages/budget.md"), b"# budget\n")
        .await
        .unwrap();
    tokio::fs::write(root.join("attachments/report.pdf"), b"%PDF-1.7 content")
        .await
        .unwrap();
    tokio::fs::write(root.join("attachments.json"), b"{\"attachments\":[]}")
        .await
        .unwrap();
}

#[tokio::test]
async fn end_to_end_backup_checksum_and_decrypt() {
    let dir = tempdir().unwrap();
    seed_data_tree(dir.path()).await;
    let service = service_with(dir.path(), Arc::new(TarBuilderArchiver::new())).await;

    let outcome = service.start();
    assert!(outcome.started);
    assert!(outcome.reason.is_none());

    let status = wait_terminal(&service).await;
    assert_eq!(status.phase, BackupPhase::Done, "error: {:?}", status.error);
    assert!(!status.running);
    assert_eq!(status.percent, 100);
    assert_eq!(status.files_total, 4);
    assert_eq!(status.files_packed, 4);
    assert!(status.started_at.is_some() && status.finished_at.is_some());

    let name = status.archive_name.clone().unwrap();
    assert!(name.starts_with("flatwiki-backup-") && name.ends_with(".tar.gz.enc"));

    // Artifact + sidecar on disk, checksum verifies independently.
    let artifact = service.resolve_backup_file_path(&name).await.unwrap();
    assert_eq!(
        tokio::fs::metadata(&artifact).await.unwrap().len(),
        status.archive_size.unwrap()
    );
    let sidecar = service.read_checksum_sidecar(&name).await.unwrap();
    let recomputed = flatwiki_services::hash::sha256_file(&artifact).await.unwrap();
    assert_eq!(sidecar.trim(), format!("{}  {}", recomputed, name));

    let listed = service.list_backups().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, name);
    assert!(listed[0].has_checksum);

    // No temp droppings left behind.
    assert_no_temp_files(dir.path().join("backups")).await;

    // Decrypt and unpack: the round-tripped tree must match the source.
    let plain = dir.path().join("restored.tar.gz");
    let written = service
        .decrypt_backup(&name, "backup-passphrase", &plain)
        .await
        .unwrap();
    assert!(written > 0);

    let file = std::fs::File::open(&plain).unwrap();
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut found_home = false;
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap() == Path::new("pages/home.md") {
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            assert_eq!(body, "# home page\n");
            found_home = true;
        }
    }
    assert!(found_home);
}

#[tokio::test]
async fn second_start_is_refused_while_running() {
    let dir = tempdir().unwrap();
    seed_data_tree(dir.path()).await;
    let release = Arc::new(Notify::new());
    let service = service_with(
        dir.path(),
        Arc::new(GatedArchiver {
            release: Arc::clone(&release),
        }),
    )
    .await;

    let first = service.start();
    assert!(first.started);

    // Job is parked inside the archiver; a second start must be refused
    // with the current status, not queued.
    let second = service.start();
    assert!(!second.started);
    assert_eq!(second.reason.as_deref(), Some("already running"));
    assert!(second.status.running);

    release.notify_one();
    let status = wait_terminal(&service).await;
    assert_eq!(status.phase, BackupPhase::Done, "error: {:?}", status.error);

    // Terminal phase frees the slot immediately.
    let third = service.start();
    assert!(third.started);
    release.notify_one();
    wait_terminal(&service).await;
}

#[tokio::test]
async fn start_without_passphrase_is_refused() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), ScanMode::Off);
    config.backup.passphrase = None;
    let config = Arc::new(config);
    let store = Arc::new(BackupStore::new(&config.backup_dir).await.unwrap());
    let service = BackupService::new(config, store, Arc::new(TarBuilderArchiver::new()));

    let outcome = service.start();
    assert!(!outcome.started);
    assert!(outcome.reason.unwrap().contains("passphrase"));

    // The refused start must not leave the slot claimed.
    assert_eq!(service.status().phase, BackupPhase::Idle);
}

#[tokio::test]
async fn passphrase_equal_to_secret_key_is_refused() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), ScanMode::Off);
    config.backup.passphrase = Some("shared".to_string());
    config.secrets.active = Some("shared".to_string());
    let config = Arc::new(config);
    let store = Arc::new(BackupStore::new(&config.backup_dir).await.unwrap());
    let service = BackupService::new(config, store, Arc::new(TarBuilderArchiver::new()));

    let outcome = service.start();
    assert!(!outcome.started);
    assert!(outcome.reason.unwrap().contains("differ"));
}

#[tokio::test]
async fn wrong_passphrase_and_corruption_fail_decryption() {
    let dir = tempdir().unwrap();
    seed_data_tree(dir.path()).await;
    let service = service_with(dir.path(), Arc::new(TarBuilderArchiver::new())).await;

    service.start();
    let status = wait_terminal(&service).await;
    assert_eq!(status.phase, BackupPhase::Done, "error: {:?}", status.error);
    let name = status.archive_name.unwrap();

    let out = dir.path().join("restored.tar.gz");
    assert!(service
        .decrypt_backup(&name, "wrong-passphrase", &out)
        .await
        .is_err());
    assert!(!out.exists());

    // Flip one ciphertext byte in the published artifact.
    let artifact = service.resolve_backup_file_path(&name).await.unwrap();
    let mut bytes = tokio::fs::read(&artifact).await.unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    tokio::fs::write(&artifact, &bytes).await.unwrap();
    assert!(service
        .decrypt_backup(&name, "backup-passphrase", &out)
        .await
        .is_err());
}

#[tokio::test]
async fn decrypt_rejects_unvalidated_names() {
    let dir = tempdir().unwrap();
    let service = service_with(dir.path(), Arc::new(TarBuilderArchiver::new())).await;
    let out = dir.path().join("restored.tar.gz");
    assert!(service
        .decrypt_backup("../../etc/passwd", "backup-passphrase", &out)
        .await
        .is_err());
    assert!(service
        .decrypt_backup(
            "flatwiki-backup-20260101000000.tar.gz.enc/../x",
            "backup-passphrase",
            &out
        )
        .await
        .is_err());
}

#[tokio::test]
async fn failure_reaches_error_phase_and_cleans_up() {
    let dir = tempdir().unwrap();
    seed_data_tree(dir.path()).await;
    let service = service_with(dir.path(), Arc::new(FailingArchiver)).await;

    assert!(service.start().started);
    let status = wait_terminal(&service).await;
    assert_eq!(status.phase, BackupPhase::Error);
    assert!(!status.running);
    assert!(status.error.unwrap().contains("archiving failed"));

    // Temp files purged; no artifact published; slot released.
    assert_no_temp_files(dir.path().join("backups")).await;
    assert!(service.list_backups().await.unwrap().is_empty());
    assert!(service.start().started);
    wait_terminal(&service).await;
}

#[tokio::test]
async fn progress_is_monotonic_through_a_job() {
    let dir = tempdir().unwrap();
    seed_data_tree(dir.path()).await;
    let service = service_with(dir.path(), Arc::new(TarBuilderArchiver::new())).await;

    assert!(service.start().started);
    let mut last = 0u8;
    loop {
        let status = service.status();
        assert!(status.percent >= last, "{} < {}", status.percent, last);
        assert!(status.percent <= 100);
        last = status.percent;
        if status.phase.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(service.status().phase, BackupPhase::Done);
}

async fn assert_no_temp_files(backup_dir: std::path::PathBuf) {
    let mut entries = tokio::fs::read_dir(&backup_dir).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().into_owned();
        assert!(
            !name.starts_with(".tmp-"),
            "temp file left behind: {}",
            name
        );
    }
}
