//! Flatwiki Core Library
//!
//! This crate provides the domain models, error types, configuration,
//! secret encryption, and concurrency primitives shared across the
//! flatwiki trusted-artifact pipeline.

pub mod config;
pub mod error;
pub mod models;
pub mod secrets;
pub mod sync;
pub mod validation;

// Re-export commonly used types
pub use config::{BackupConfig, Config, ScanConfig, ScanMode, SecretKeyConfig};
pub use error::AppError;
pub use models::{
    Actor, AttachmentIndex, AttachmentRecord, BackupPhase, BackupStatus, ScanStatus, UploaderInfo,
};
pub use secrets::SecretCipher;
pub use sync::{FlightPermit, LockMap, SingleFlight};
