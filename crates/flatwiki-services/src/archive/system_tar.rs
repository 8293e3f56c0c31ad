//! Archiver that drives the system `tar` binary.
//!
//! `tar` runs with `-v` and its stdout is consumed line by line while the
//! process is still writing, so per-file progress reaches the status object
//! without buffering the listing. A non-zero exit surfaces the diagnostic
//! stderr tail.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use super::{Archiver, ProgressFn};

const STDERR_TAIL_LEN: usize = 2000;

pub struct SystemTarArchiver {
    tar_bin: String,
}

impl Default for SystemTarArchiver {
    fn default() -> Self {
        Self::new("tar")
    }
}

impl SystemTarArchiver {
    pub fn new(tar_bin: impl Into<String>) -> Self {
        Self {
            tar_bin: tar_bin.into(),
        }
    }
}

#[async_trait]
impl Archiver for SystemTarArchiver {
    async fn create_archive(
        &self,
        root: &Path,
        files: &[PathBuf],
        dest: &Path,
        on_entry: ProgressFn,
    ) -> Result<()> {
        // Entry names go through a list file; thousands of attachments would
        // overflow the argument vector otherwise. Absolute path, since -C
        // changes the directory tar resolves relative names against.
        let list_path = std::env::temp_dir().join(format!("flatwiki-tar-{}.list", Uuid::new_v4()));
        let mut listing = String::new();
        for file in files {
            listing.push_str(&file.to_string_lossy());
            listing.push('\n');
        }
        tokio::fs::write(&list_path, listing)
            .await
            .context("failed to write archive file list")?;

        let result = self.run_tar(root, &list_path, dest, on_entry).await;

        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }
}

impl SystemTarArchiver {
    async fn run_tar(
        &self,
        root: &Path,
        list_path: &Path,
        dest: &Path,
        on_entry: ProgressFn,
    ) -> Result<()> {
        let mut child = Command::new(&self.tar_bin)
            .arg("-czvf")
            .arg(dest)
            .arg("-C")
            .arg(root)
            .arg("-T")
            .arg(list_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.tar_bin))?;

        let stdout = child
            .stdout
            .take()
            .context("tar stdout was not captured")?;
        let mut stderr = child
            .stderr
            .take()
            .context("tar stderr was not captured")?;

        // Drain stderr concurrently; tar blocks if either pipe fills up.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut entries: u64 = 0;
        while let Some(_line) = lines
            .next_line()
            .await
            .context("failed to read tar output")?
        {
            entries += 1;
            on_entry(entries);
        }

        let status = child.wait().await.context("failed to wait for tar")?;
        let diagnostics = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let tail: String = diagnostics
                .chars()
                .rev()
                .take(STDERR_TAIL_LEN)
                .collect::<String>()
                .chars()
                .rev()
                .collect();
            bail!("tar exited with {}: {}", status, tail.trim());
        }

        tracing::info!(
            archive = %dest.display(),
            entries,
            "Archive created"
        );
        Ok(())
    }
}
