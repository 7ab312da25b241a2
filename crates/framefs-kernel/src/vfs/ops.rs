//! VFS operations trait.
//!
//! The operation set a native driver forwards to us: path-based, explicit
//! offset/size, no handle state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::VfsResult;
use super::error::VfsError;
use super::types::{DirEntry, Disposition, FileAttr, SetAttr, StatFs};

/// Core VFS operations trait.
///
/// Implemented by the passthrough backends and by
/// [`SequenceRouter`](crate::sequence::SequenceRouter), so routers stack like
/// any other backend. Paths are relative to the implementor's root.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Read a symlink's target.
    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`, returning the number of bytes written.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32>;

    /// Create a new, empty file. Fails if the path exists.
    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    /// Create a directory (and any missing parents).
    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    /// Remove a file or symlink.
    async fn unlink(&self, path: &Path) -> VfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Truncate (or extend) a file to `size` bytes.
    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Apply attribute changes, returning the resulting attributes.
    async fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr>;

    /// Create a symlink at `path` pointing to `target`.
    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr>;

    /// Create a hard link.
    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr>;

    // ========================================================================
    // Handle lifecycle
    // ========================================================================

    /// Open or create `path` according to `disposition`.
    ///
    /// The default is expressed in terms of `getattr`, `create` and
    /// `truncate`, which is exactly what a handle-less backend needs.
    async fn open(&self, path: &Path, disposition: Disposition) -> VfsResult<()> {
        let existing = match self.getattr(path).await {
            Ok(attr) => Some(attr),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        match (disposition, existing) {
            (Disposition::CreateNew, Some(_)) => {
                Err(VfsError::already_exists(path.display().to_string()))
            }
            (Disposition::CreateNew, None)
            | (Disposition::CreateAlways, None)
            | (Disposition::OpenAlways, None) => {
                self.create(path, 0o644).await?;
                Ok(())
            }
            (Disposition::CreateAlways, Some(attr))
            | (Disposition::TruncateExisting, Some(attr)) => {
                if attr.is_dir() {
                    return Err(VfsError::is_a_directory(path.display().to_string()));
                }
                self.truncate(path, 0).await
            }
            (Disposition::OpenExisting, Some(_)) | (Disposition::OpenAlways, Some(_)) => Ok(()),
            (Disposition::OpenExisting, None) | (Disposition::TruncateExisting, None) => {
                Err(VfsError::not_found(path.display().to_string()))
            }
        }
    }

    /// Release whatever the last open of `path` acquired.
    ///
    /// Handle-less backends have nothing to release.
    async fn close(&self, path: &Path) -> VfsResult<()> {
        let _ = path;
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool;

    /// Get filesystem statistics.
    async fn statfs(&self) -> VfsResult<StatFs>;

    /// Resolve `path` to a location on the real filesystem, if there is one.
    ///
    /// Backends without a disk presence return `Ok(None)`.
    async fn real_path(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        let _ = path;
        Ok(None)
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Read entire file contents.
    ///
    /// Reads in `u32`-sized chunks until `getattr`'s size is reached or the
    /// backend returns nothing.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        let mut out = Vec::new();
        let mut offset = 0u64;
        while offset < attr.size {
            let chunk = self.read(path, offset, chunk_len(attr.size - offset)).await?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Replace the whole file with `data`, creating it if needed.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.open(path, Disposition::CreateAlways).await?;
        self.write(path, 0, data).await?;
        Ok(())
    }
}

/// Largest single read covering `remaining` bytes.
fn chunk_len(remaining: u64) -> u32 {
    u32::try_from(remaining).unwrap_or(u32::MAX)
}
