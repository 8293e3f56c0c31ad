//! Archiving capability for the backup pipeline.
//!
//! An [`Archiver`] turns an enumerated file list into a gzip-compressed tar
//! archive, reporting per-entry progress as it goes. The default backend
//! drives the system `tar` binary; [`TarBuilderArchiver`] is the in-process
//! alternative built on the `tar` crate.

mod builder;
mod system_tar;

pub use builder::TarBuilderArchiver;
pub use system_tar::SystemTarArchiver;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

/// Called with the number of entries completed so far.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

#[async_trait]
pub trait Archiver: Send + Sync {
    /// Create a `.tar.gz` at `dest` containing `files` (paths relative to
    /// `root`). `on_entry` is invoked as entries complete.
    async fn create_archive(
        &self,
        root: &Path,
        files: &[PathBuf],
        dest: &Path,
        on_entry: ProgressFn,
    ) -> anyhow::Result<()>;
}
