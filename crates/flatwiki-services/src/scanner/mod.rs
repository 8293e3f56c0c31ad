//! Antivirus scanning capability.
//!
//! Scanners are a capability behind a trait so the ingestion pipeline never
//! cares whether scanning happens via a spawned binary, a clamd daemon, or
//! a test double. Policy (when a scan is mandatory, what a malfunction
//! means) lives in the pipeline, not here.

mod clamd;
mod command;

pub use clamd::ClamdScanner;
pub use command::CommandScanner;

use std::path::Path;

use async_trait::async_trait;

/// Raw outcome of one scan attempt.
#[derive(Debug)]
pub enum ScanOutcome {
    Clean,
    /// Signature or threat name reported by the scanner.
    Infected(String),
    /// The scanner could not complete: spawn failure, timeout, protocol
    /// error, or an exit code with no verdict semantics.
    Error(String),
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Identifier persisted into attachment records.
    fn identifier(&self) -> String;

    /// Whether the scanner can currently be reached at all.
    async fn is_available(&self) -> bool;

    /// Scan one file. Never panics; every failure is an [`ScanOutcome::Error`].
    async fn scan_file(&self, path: &Path) -> ScanOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysClean;

    #[async_trait]
    impl Scanner for AlwaysClean {
        fn identifier(&self) -> String {
            "always-clean".to_string()
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn scan_file(&self, _path: &Path) -> ScanOutcome {
            ScanOutcome::Clean
        }
    }

    #[tokio::test]
    async fn trait_object_dispatch() {
        let scanner: Box<dyn Scanner> = Box::new(AlwaysClean);
        assert!(scanner.is_available().await);
        assert!(matches!(
            scanner.scan_file(Path::new("/tmp/x")).await,
            ScanOutcome::Clean
        ));
    }
}
