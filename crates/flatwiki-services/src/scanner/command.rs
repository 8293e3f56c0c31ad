//! Scanner backed by an external binary (`clamscan`-compatible contract:
//! exit 0 = clean, exit 1 = infected, anything else = scanner error).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::{ScanOutcome, Scanner};

pub struct CommandScanner {
    binary: String,
    timeout: Duration,
}

impl CommandScanner {
    pub fn new(binary: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Resolve the configured binary: absolute paths are taken as-is,
    /// anything else is searched on `PATH`.
    fn resolve_binary(&self) -> Option<PathBuf> {
        let candidate = Path::new(&self.binary);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(&self.binary))
            .find(|p| p.is_file())
    }
}

#[async_trait]
impl Scanner for CommandScanner {
    fn identifier(&self) -> String {
        self.binary.clone()
    }

    async fn is_available(&self) -> bool {
        self.resolve_binary().is_some()
    }

    async fn scan_file(&self, path: &Path) -> ScanOutcome {
        let Some(binary) = self.resolve_binary() else {
            return ScanOutcome::Error(format!("scanner binary {} not found", self.binary));
        };

        let start = Instant::now();
        tracing::debug!(scanner = %binary.display(), file = %path.display(), "Starting scan");

        let run = Command::new(&binary).arg("--no-summary").arg(path).output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(scanner = %self.binary, error = %e, "Scanner failed to spawn");
                return ScanOutcome::Error(format!("failed to run scanner: {}", e));
            }
            Err(_) => {
                tracing::error!(
                    scanner = %self.binary,
                    timeout_secs = self.timeout.as_secs(),
                    "Scanner timed out"
                );
                return ScanOutcome::Error(format!(
                    "scanner timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        match output.status.code() {
            Some(0) => {
                tracing::info!(
                    file = %path.display(),
                    duration_ms = start.elapsed().as_millis(),
                    "File scan completed: clean"
                );
                ScanOutcome::Clean
            }
            Some(1) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let detail = stdout
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("threat detected")
                    .trim()
                    .to_string();
                tracing::warn!(
                    file = %path.display(),
                    detail = %detail,
                    duration_ms = start.elapsed().as_millis(),
                    "File scan detected threat"
                );
                ScanOutcome::Infected(detail)
            }
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = format!(
                    "scanner exited with {:?}: {}",
                    code,
                    stderr.lines().next().unwrap_or("").trim()
                );
                tracing::error!(scanner = %self.binary, detail = %detail, "Scanner error");
                ScanOutcome::Error(detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let scanner = CommandScanner::new("definitely-not-a-real-scanner-7f3a", 5);
        assert!(!scanner.is_available().await);
        assert!(matches!(
            scanner.scan_file(Path::new("/tmp/x")).await,
            ScanOutcome::Error(_)
        ));
    }

    #[tokio::test]
    async fn absolute_missing_path_is_unavailable() {
        let scanner = CommandScanner::new("/nonexistent/bin/clamscan", 5);
        assert!(!scanner.is_available().await);
    }

    #[test]
    fn identifier_is_configured_name() {
        let scanner = CommandScanner::new("clamscan", 5);
        assert_eq!(scanner.identifier(), "clamscan");
    }
}
