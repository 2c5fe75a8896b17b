//! Local filesystem cursor persistence.
//!
//! The cursor lives in a small JSON document:
//!
//! ```text
//! {
//!   "marker": 1718000000000,
//!   "updated_at": "2026-10-19T08:00:00Z"
//! }
//! ```
//!
//! Writes go to a sibling `.tmp` file first and are renamed into place, so a
//! crash mid-write leaves the previous cursor intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Cursor;
use crate::storage::CursorStore;

/// On-disk shape of the cursor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorFile {
    marker: Cursor,
    updated_at: DateTime<Utc>,
}

/// Cursor store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<Cursor>> {
        match self.read_bytes().await? {
            Some(bytes) => {
                let file: CursorFile = serde_json::from_slice(&bytes)?;
                Ok(Some(file.marker))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, cursor: Cursor) -> Result<()> {
        let file = CursorFile {
            marker: cursor,
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        self.write_bytes(&bytes).await?;
        log::debug!("Persisted cursor {} to {}", cursor.value(), self.path.display());
        Ok(())
    }
}
