//! Storage abstractions for relay state and fallback copies.
//!
//! Two concerns live here:
//! - the ingest cursor, persisted so a restart resumes where polling stopped
//! - secondary storage that hands out a public link when the primary upload
//!   path is unavailable
//!
//! ## Backends
//!
//! ```text
//! CursorStore      FileCursorStore      state/cursor.json (atomic rewrite)
//! FallbackStorage  YandexDiskStorage    disk:/bots_temp/<dir>_<file> (published)
//!                  S3Storage            s3://<bucket>/<prefix>/<dir>_<file> (presigned)
//! ```

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
pub mod yandex;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Cursor;

// Re-export for convenience
pub use local::FileCursorStore;
#[cfg(feature = "s3")]
pub use s3::S3Storage;
pub use yandex::YandexDiskStorage;

/// Durable home of the ingest cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last persisted cursor, or `None` on a cold start.
    async fn load(&self) -> Result<Option<Cursor>>;

    /// Persist `cursor`, replacing the previous value.
    async fn save(&self, cursor: Cursor) -> Result<()>;
}

/// Secondary storage that can publish a local file under a public URL.
#[async_trait]
pub trait FallbackStorage: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Upload the file at `path` and return a URL anyone can download it from.
    async fn store(&self, path: &Path) -> Result<String>;
}

/// Remote object name for `path`: its file name prefixed with the name of the
/// directory holding it. Every link gets its own scratch directory, so two
/// links that both produce `video.mp4` land on different remote names.
pub(crate) fn remote_file_name(path: &Path) -> Result<String> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .ok_or_else(|| crate::error::AppError::fallback(format!("{} has no file name", path.display())))?;
    match path.parent().and_then(Path::file_name) {
        Some(parent) => Ok(format!("{}_{}", parent.to_string_lossy(), file_name)),
        None => Ok(file_name.into_owned()),
    }
}
