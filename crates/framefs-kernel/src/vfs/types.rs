//! Core VFS types.
//!
//! Path-based, no inodes. These are what a driver layer (FUSE, Dokan,
//! WinFsp) translates its native request structures into.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o644).
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time (optional).
    pub atime: Option<SystemTime>,
    /// Creation time (optional).
    pub ctime: Option<SystemTime>,
    /// Number of hard links.
    pub nlink: u32,
}

impl FileAttr {
    /// Attributes for a regular file stamped with the current time.
    pub fn file(size: u64, perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            size,
            kind: FileType::File,
            perm,
            mtime: now,
            atime: Some(now),
            ctime: Some(now),
            nlink: 1,
        }
    }

    /// Attributes for a directory stamped with the current time.
    pub fn directory(perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            size: 0,
            kind: FileType::Directory,
            perm,
            mtime: now,
            atime: Some(now),
            ctime: Some(now),
            nlink: 2, // . and ..
        }
    }

    /// Attributes for a symlink whose target is `target_len` bytes long.
    pub fn symlink(target_len: u64) -> Self {
        Self {
            kind: FileType::Symlink,
            nlink: 1,
            ..Self::file(target_len, 0o777)
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Attribute changes for `setattr`. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// New size (truncate/extend).
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub atime: Option<SystemTime>,
    /// New permission bits.
    pub perm: Option<u32>,
}

impl SetAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn with_atime(mut self, atime: SystemTime) -> Self {
        self.atime = Some(atime);
        self
    }

    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm);
        self
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            blocks: 1024 * 1024,
            bfree: 512 * 1024,
            bavail: 512 * 1024,
            files: 1024 * 1024,
            ffree: 512 * 1024,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }
}

/// What an open request wants done when the target does or does not exist.
///
/// Mirrors the creation dispositions native drivers hand us (Win32
/// `CreateFile`, FUSE `O_CREAT`/`O_EXCL`/`O_TRUNC` combinations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Create; fail if the entry exists.
    CreateNew,
    /// Create, or truncate an existing entry to zero.
    CreateAlways,
    /// Open; fail if the entry does not exist.
    OpenExisting,
    /// Open, creating the entry if missing.
    OpenAlways,
    /// Truncate to zero; fail if the entry does not exist.
    TruncateExisting,
}

impl Disposition {
    /// Whether this disposition may bring a new entry into existence.
    pub fn should_create(&self) -> bool {
        matches!(
            self,
            Disposition::CreateNew | Disposition::CreateAlways | Disposition::OpenAlways
        )
    }

    /// Map POSIX open flags onto a disposition.
    pub fn from_posix(create: bool, exclusive: bool, truncate: bool) -> Self {
        match (create, exclusive, truncate) {
            (true, true, _) => Disposition::CreateNew,
            (true, false, true) => Disposition::CreateAlways,
            (true, false, false) => Disposition::OpenAlways,
            (false, _, true) => Disposition::TruncateExisting,
            (false, _, false) => Disposition::OpenExisting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_attr_constructors() {
        let file = FileAttr::file(1024, 0o644);
        assert!(file.is_file());
        assert_eq!(file.size, 1024);
        assert_eq!(file.perm, 0o644);

        let dir = FileAttr::directory(0o755);
        assert!(dir.is_dir());
        assert_eq!(dir.nlink, 2);
    }

    #[test]
    fn test_symlink_attr_and_set_attr() {
        let link = FileAttr::symlink(12);
        assert!(link.is_symlink());
        assert_eq!(link.size, 12);

        let set = SetAttr::new().with_size(2048).with_perm(0o600);
        assert_eq!(set.size, Some(2048));
        assert_eq!(set.perm, Some(0o600));
        assert!(set.mtime.is_none());
    }

    #[test]
    fn test_should_create() {
        assert!(Disposition::CreateNew.should_create());
        assert!(Disposition::CreateAlways.should_create());
        assert!(Disposition::OpenAlways.should_create());
        assert!(!Disposition::OpenExisting.should_create());
        assert!(!Disposition::TruncateExisting.should_create());
    }

    #[test]
    fn test_from_posix() {
        assert_eq!(Disposition::from_posix(true, true, false), Disposition::CreateNew);
        assert_eq!(Disposition::from_posix(true, false, true), Disposition::CreateAlways);
        assert_eq!(Disposition::from_posix(true, false, false), Disposition::OpenAlways);
        assert_eq!(Disposition::from_posix(false, false, true), Disposition::TruncateExisting);
        assert_eq!(Disposition::from_posix(false, false, false), Disposition::OpenExisting);
    }
}
