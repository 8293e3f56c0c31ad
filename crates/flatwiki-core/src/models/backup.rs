//! Backup job state machine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the process-wide backup job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupPhase {
    #[default]
    Idle,
    Preparing,
    Packing,
    Encrypting,
    Writing,
    Done,
    Error,
}

impl BackupPhase {
    /// `true` for the in-flight phases; `Idle`, `Done` and `Error` are not
    /// running.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            BackupPhase::Preparing
                | BackupPhase::Packing
                | BackupPhase::Encrypting
                | BackupPhase::Writing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BackupPhase::Done | BackupPhase::Error)
    }
}

/// Point-in-time snapshot of the backup job, consumed by status pollers.
///
/// `percent` is monotonically non-decreasing within a job and clamped to
/// 0..=100; `running` flips to false only on terminal phases.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub phase: BackupPhase,
    pub running: bool,
    pub percent: u8,
    pub message: String,
    pub files_total: u64,
    pub files_packed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub archive_name: Option<String>,
    pub archive_size: Option<u64>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_only_in_flight() {
        assert!(!BackupPhase::Idle.is_running());
        assert!(BackupPhase::Preparing.is_running());
        assert!(BackupPhase::Packing.is_running());
        assert!(BackupPhase::Encrypting.is_running());
        assert!(BackupPhase::Writing.is_running());
        assert!(!BackupPhase::Done.is_running());
        assert!(!BackupPhase::Error.is_running());
    }

    #[test]
    fn terminal_phases() {
        assert!(BackupPhase::Done.is_terminal());
        assert!(BackupPhase::Error.is_terminal());
        assert!(!BackupPhase::Packing.is_terminal());
        assert!(!BackupPhase::Idle.is_terminal());
    }

    #[test]
    fn default_status_is_idle() {
        let status = BackupStatus::default();
        assert_eq!(status.phase, BackupPhase::Idle);
        assert!(!status.running);
        assert_eq!(status.percent, 0);
    }
}
