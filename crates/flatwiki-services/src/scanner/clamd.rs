//! Scanner backed by a ClamAV daemon over TCP.
//!
//! Uses the sync `clamav-client` API inside `spawn_blocking` to avoid !Send
//! tokio futures.

use std::path::Path;
use std::str;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clamav_client::{clean, Tcp};

use super::{ScanOutcome, Scanner};

pub struct ClamdScanner {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ClamdScanner {
    pub fn new(host: impl Into<String>, port: u16, timeout_secs: u64) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Scanner for ClamdScanner {
    fn identifier(&self) -> String {
        format!("clamd://{}", self.address())
    }

    async fn is_available(&self) -> bool {
        let address = self.address();
        let ping = tokio::task::spawn_blocking(move || {
            let connection = Tcp {
                host_address: address.as_str(),
            };
            clamav_client::ping(connection)
        });
        match tokio::time::timeout(self.timeout, ping).await {
            Ok(Ok(Ok(response))) => response.starts_with(b"PONG"),
            _ => false,
        }
    }

    async fn scan_file(&self, path: &Path) -> ScanOutcome {
        let start = Instant::now();
        let address = self.address();
        let file_path = path.to_path_buf();

        let scan = tokio::task::spawn_blocking(move || {
            let connection = Tcp {
                host_address: address.as_str(),
            };
            clamav_client::scan_file(&file_path, connection, None)
        });

        let response = match tokio::time::timeout(self.timeout, scan).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => {
                tracing::error!(error = %e, "clamd scan failed");
                return ScanOutcome::Error(format!("clamd scan error: {}", e));
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "clamd scan task panicked");
                return ScanOutcome::Error(format!("clamd scan task error: {}", e));
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "clamd scan timed out"
                );
                return ScanOutcome::Error(format!(
                    "clamd scan timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        match clean(&response) {
            Ok(true) => {
                tracing::info!(
                    file = %path.display(),
                    duration_ms = start.elapsed().as_millis(),
                    "File scan completed: clean"
                );
                ScanOutcome::Clean
            }
            Ok(false) => {
                let response_str = str::from_utf8(&response).unwrap_or("unknown").trim();
                let virus_name = if response_str.contains("FOUND") {
                    response_str
                        .split(':')
                        .nth(1)
                        .unwrap_or("unknown")
                        .split_whitespace()
                        .next()
                        .unwrap_or("unknown")
                        .to_string()
                } else {
                    "unknown".to_string()
                };
                tracing::warn!(
                    file = %path.display(),
                    virus = %virus_name,
                    duration_ms = start.elapsed().as_millis(),
                    "File scan detected virus"
                );
                ScanOutcome::Infected(virus_name)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse clamd response");
                ScanOutcome::Error(format!("failed to parse clamd response: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_names_the_daemon() {
        let scanner = ClamdScanner::new("localhost", 3310, 30);
        assert_eq!(scanner.identifier(), "clamd://localhost:3310");
    }
}
