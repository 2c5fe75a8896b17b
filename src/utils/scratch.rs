//! Per-link scratch directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

/// Temporary directory owned by one link's processing.
///
/// Removed by [`ScratchDir::cleanup`], which may be called any number of
/// times, or on drop if cleanup never ran.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under `base`, or under the system temp dir.
    pub fn new(base: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("link-");
        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory and everything in it.
    pub fn cleanup(&mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
            log::debug!("Removed scratch dir {}", self.path.display());
        }
        Ok(())
    }
}
