//! File handling boundary: copying an inbound file reference into a
//! conversation's workspace directory.
//!
//! Downloading from the real messaging platform (resolving a platform file
//! id to bytes) is out of scope — the trait starts from an already-resolved
//! source path, which is as much of "download" as can be implemented
//! without a platform SDK.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::Result;

/// Copies a source file into a conversation's workspace.
#[async_trait]
pub trait FileDownloader: Send + Sync {
    /// Copy `source` into `workspace_dir`, returning the destination path.
    async fn download_into(&self, source: &Path, workspace_dir: &Path) -> Result<PathBuf>;
}

/// Filesystem-local [`FileDownloader`]: a plain async copy.
pub struct LocalFileDownloader;

#[async_trait]
impl FileDownloader for LocalFileDownloader {
    async fn download_into(&self, source: &Path, workspace_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(workspace_dir).await?;
        let file_name = source
            .file_name()
            .ok_or_else(|| crate::errors::AppError::Io("source path has no file name".into()))?;
        let dest = workspace_dir.join(file_name);
        tokio::fs::copy(source, &dest).await?;
        Ok(dest)
    }
}
