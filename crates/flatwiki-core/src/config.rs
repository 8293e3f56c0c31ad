//! Configuration module
//!
//! Environment-driven configuration for the artifact pipelines. All values
//! have defaults suitable for a local installation; `validate` enforces the
//! cross-field constraints that `from_env` cannot express.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

// Common constants
const MAX_UPLOAD_MB: usize = 25;
const SCANNER_TIMEOUT_SECS: u64 = 120;
const SCRYPT_N: u32 = 16384;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Upper bound on scrypt working memory (128 * n * r bytes).
pub const MAX_KDF_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Antivirus scan policy for uploaded files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Never scan; uploads are recorded as skipped.
    Off,
    /// Scan when a scanner is available; a missing or failing scanner is
    /// tolerated. Detected infections are always fatal.
    Optional,
    /// A scanner must be available and report clean; anything else rejects
    /// the upload.
    Required,
}

impl FromStr for ScanMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(ScanMode::Off),
            "optional" => Ok(ScanMode::Optional),
            "required" => Ok(ScanMode::Required),
            _ => Err(anyhow::anyhow!("Unsupported scan mode: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub mode: ScanMode,
    /// Scanner binary name (resolved against PATH) or an absolute path.
    pub scanner_bin: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BackupConfig {
    /// Passphrase the backup key is derived from. Backups are rejected when
    /// unset.
    pub passphrase: Option<String>,
    pub scrypt_n: u32,
    pub scrypt_r: u32,
    pub scrypt_p: u32,
}

#[derive(Clone, Debug)]
pub struct SecretKeyConfig {
    /// Active key material for the secret envelope. `None` disables
    /// encryption of new secrets.
    pub active: Option<String>,
    /// Previously active key, accepted for decryption only.
    pub legacy: Option<String>,
}

/// Application configuration for the trusted-artifact core.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub attachments_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub max_upload_size_bytes: usize,
    pub scan: ScanConfig,
    pub backup: BackupConfig,
    pub secrets: SecretKeyConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let data_dir = PathBuf::from(
            env::var("FLATWIKI_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        let dir_from_env = |key: &str, default: PathBuf| -> PathBuf {
            env::var(key).map(PathBuf::from).unwrap_or(default)
        };
        let attachments_dir =
            dir_from_env("FLATWIKI_ATTACHMENTS_DIR", data_dir.join("attachments"));
        let quarantine_dir = dir_from_env("FLATWIKI_QUARANTINE_DIR", data_dir.join("quarantine"));
        let backup_dir = dir_from_env("FLATWIKI_BACKUP_DIR", data_dir.join("backups"));

        let max_upload_mb = env::var("FLATWIKI_MAX_UPLOAD_MB")
            .unwrap_or_else(|_| MAX_UPLOAD_MB.to_string())
            .parse::<usize>()
            .unwrap_or(MAX_UPLOAD_MB);

        let scan = ScanConfig {
            mode: env::var("FLATWIKI_SCAN_MODE")
                .unwrap_or_else(|_| "off".to_string())
                .parse()?,
            scanner_bin: env::var("FLATWIKI_SCANNER_BIN")
                .unwrap_or_else(|_| "clamscan".to_string()),
            timeout_secs: env::var("FLATWIKI_SCANNER_TIMEOUT_SECS")
                .unwrap_or_else(|_| SCANNER_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(SCANNER_TIMEOUT_SECS),
        };

        let parse_cost = |key: &str, default: u32| -> u32 {
            env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let backup = BackupConfig {
            passphrase: env::var("FLATWIKI_BACKUP_PASSPHRASE")
                .ok()
                .filter(|s| !s.is_empty()),
            scrypt_n: parse_cost("FLATWIKI_SCRYPT_N", SCRYPT_N),
            scrypt_r: parse_cost("FLATWIKI_SCRYPT_R", SCRYPT_R),
            scrypt_p: parse_cost("FLATWIKI_SCRYPT_P", SCRYPT_P),
        };

        let secrets = SecretKeyConfig {
            active: env::var("FLATWIKI_SECRET_KEY").ok().filter(|s| !s.is_empty()),
            legacy: env::var("FLATWIKI_SECRET_KEY_PREVIOUS")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        let config = Config {
            attachments_dir,
            quarantine_dir,
            backup_dir,
            data_dir,
            max_upload_size_bytes: max_upload_mb * 1024 * 1024,
            scan,
            backup,
            secrets,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.backup.scrypt_n.is_power_of_two() || self.backup.scrypt_n < 2 {
            return Err(anyhow::anyhow!(
                "FLATWIKI_SCRYPT_N must be a power of two >= 2 (got {})",
                self.backup.scrypt_n
            ));
        }

        let memory = 128 * self.backup.scrypt_n as u64 * self.backup.scrypt_r as u64;
        if memory > MAX_KDF_MEMORY_BYTES {
            return Err(anyhow::anyhow!(
                "scrypt parameters require {} bytes, exceeding the {} byte ceiling",
                memory,
                MAX_KDF_MEMORY_BYTES
            ));
        }

        if self.backup.scrypt_r == 0 || self.backup.scrypt_p == 0 {
            return Err(anyhow::anyhow!("scrypt r and p must be non-zero"));
        }

        // One secret must not serve two trust domains: the backup passphrase
        // and the content-encryption key are rejected when identical.
        if let (Some(passphrase), Some(active)) =
            (&self.backup.passphrase, &self.secrets.active)
        {
            if passphrase == active {
                return Err(anyhow::anyhow!(
                    "FLATWIKI_BACKUP_PASSPHRASE must differ from FLATWIKI_SECRET_KEY"
                ));
            }
        }

        if self.scan.mode == ScanMode::Required && self.scan.scanner_bin.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "FLATWIKI_SCANNER_BIN must be set when FLATWIKI_SCAN_MODE=required"
            ));
        }

        Ok(())
    }
}
