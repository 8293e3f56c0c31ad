//! In-process archiver built on the `tar` crate with gzip compression.
//!
//! Substitutable for [`super::SystemTarArchiver`] wherever no tar binary is
//! available (tests, minimal containers). The archive work is synchronous
//! and runs on the blocking pool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{Archiver, ProgressFn};

#[derive(Default)]
pub struct TarBuilderArchiver;

impl TarBuilderArchiver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Archiver for TarBuilderArchiver {
    async fn create_archive(
        &self,
        root: &Path,
        files: &[PathBuf],
        dest: &Path,
        on_entry: ProgressFn,
    ) -> Result<()> {
        let root = root.to_path_buf();
        let files = files.to_vec();
        let dest = dest.to_path_buf();

        let entries = tokio::task::spawn_blocking(move || -> Result<u64> {
            let file = std::fs::File::create(&dest)
                .with_context(|| format!("failed to create {}", dest.display()))?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.follow_symlinks(false);

            let mut done: u64 = 0;
            for rel in &files {
                builder
                    .append_path_with_name(root.join(rel), rel)
                    .with_context(|| format!("failed to archive {}", rel.display()))?;
                done += 1;
                on_entry(done);
            }

            let encoder = builder.into_inner().context("failed to finish archive")?;
            encoder.finish().context("failed to finish compression")?;
            Ok(done)
        })
        .await
        .context("archive task failed")??;

        tracing::info!(entries, "Archive created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn builds_a_readable_tar_gz() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        tokio::fs::create_dir_all(root.join("pages")).await.unwrap();
        tokio::fs::write(root.join("pages/home.md"), b"# home")
            .await
            .unwrap();
        tokio::fs::write(root.join("attachments.json"), b"{}")
            .await
            .unwrap();

        let count = Arc::new(AtomicU64::new(0));
        let count_cb = Arc::clone(&count);
        let dest = dir.path().join("out.tar.gz");
        TarBuilderArchiver::new()
            .create_archive(
                &root,
                &[
                    PathBuf::from("pages/home.md"),
                    PathBuf::from("attachments.json"),
                ],
                &dest,
                Arc::new(move |n| {
                    count_cb.store(n, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Unpack and verify contents round-trip.
        let file = std::fs::File::open(&dest).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut names = Vec::new();
        let mut home = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            if path == "pages/home.md" {
                entry.read_to_string(&mut home).unwrap();
            }
            names.push(path);
        }
        names.sort();
        assert_eq!(names, vec!["attachments.json", "pages/home.md"]);
        assert_eq!(home, "# home");
    }

    #[tokio::test]
    async fn missing_source_file_fails() {
        let dir = tempdir().unwrap();
        let result = TarBuilderArchiver::new()
            .create_archive(
                dir.path(),
                &[PathBuf::from("ghost.txt")],
                &dir.path().join("out.tar.gz"),
                Arc::new(|_| {}),
            )
            .await;
        assert!(result.is_err());
    }
}
