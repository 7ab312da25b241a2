//! Local filesystem backend.
//!
//! The loopback target: every operation lands unmodified in a real
//! directory tree. Paths are confined to the root.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};

/// Local filesystem backend rooted at a directory.
///
/// If `root` is `/srv/captures`, then `read("clip0001.tga")` reads
/// `/srv/captures/clip0001.tga`. Attempts to escape via `..` or symlinks
/// pointing outside the root are rejected.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a writable backend rooted at `root`.
    ///
    /// The root is canonicalized up front (macOS `/tmp` → `/private/tmp`)
    /// so containment checks compare like with like.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only backend rooted at `root`.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a backend-relative path to an absolute path under the root.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if relative.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let joined = self.root.join(relative);

        // Existing paths are canonicalized outright; new ones through their
        // parent, so symlinked parents are still caught.
        let resolved = if joined.exists() {
            dunce::canonicalize(&joined)?
        } else {
            let name = joined
                .file_name()
                .ok_or_else(|| VfsError::invalid_path(relative.display().to_string()))?;
            match joined.parent() {
                Some(parent) if parent.exists() => dunce::canonicalize(parent)?.join(name),
                _ => Self::lexical_join(&self.root, relative)?,
            }
        };

        if !resolved.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                resolved.display(),
                self.root.display()
            )));
        }
        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve) but leaves the final component alone,
    /// so a symlink names itself rather than its target.
    fn resolve_entry(&self, path: &Path) -> VfsResult<PathBuf> {
        let relative = path.strip_prefix("/").unwrap_or(path);
        match (relative.parent(), relative.file_name()) {
            (Some(parent), Some(name)) => Ok(self.resolve(parent)?.join(name)),
            _ => self.resolve(relative),
        }
    }

    /// Join without touching the disk, refusing to climb above `root`.
    fn lexical_join(root: &Path, relative: &Path) -> VfsResult<PathBuf> {
        let mut out = root.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(s) => out.push(s),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir => {
                    if out == root || !out.pop() {
                        return Err(VfsError::path_escapes_root(relative.display().to_string()));
                    }
                }
                Component::Prefix(_) => {
                    return Err(VfsError::invalid_path(relative.display().to_string()));
                }
            }
        }
        Ok(out)
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn kind_of(file_type: std::fs::FileType) -> FileType {
        if file_type.is_dir() {
            FileType::Directory
        } else if file_type.is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        }
    }

    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        FileAttr {
            size: meta.len(),
            kind: Self::kind_of(meta.file_type()),
            perm: Self::mode_of(meta),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            atime: meta.accessed().ok(),
            ctime: meta.created().ok(),
            nlink: Self::nlink_of(meta),
        }
    }

    #[cfg(unix)]
    fn mode_of(meta: &std::fs::Metadata) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    }

    #[cfg(not(unix))]
    fn mode_of(meta: &std::fs::Metadata) -> u32 {
        match (meta.is_dir(), meta.permissions().readonly()) {
            (true, _) => 0o755,
            (false, true) => 0o444,
            (false, false) => 0o644,
        }
    }

    #[cfg(unix)]
    fn nlink_of(meta: &std::fs::Metadata) -> u32 {
        use std::os::unix::fs::MetadataExt;
        meta.nlink() as u32
    }

    #[cfg(not(unix))]
    fn nlink_of(_meta: &std::fs::Metadata) -> u32 {
        1
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let full = self.resolve_entry(path)?;
        let meta = fs::symlink_metadata(&full).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let mut dir = fs::read_dir(&full).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let kind = Self::kind_of(entry.file_type().await?);
            entries.push(DirEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind,
            ));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let mut file = fs::File::open(&full).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        // A single read() may return short; keep going until size or EOF.
        let available = file.metadata().await?.len().saturating_sub(offset);
        let mut buffer = Vec::with_capacity(available.min(size as u64) as usize);
        file.take(size as u64).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let full = self.resolve_entry(path)?;
        let meta = fs::symlink_metadata(&full).await?;
        if !meta.file_type().is_symlink() {
            return Err(VfsError::not_a_symlink(path.display().to_string()));
        }
        Ok(fs::read_link(&full).await?)
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.check_writable()?;
        let full = self.resolve(path)?;

        let mut file = fs::OpenOptions::new().write(true).open(&full).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(data.len() as u32)
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(&full).await?;
        let meta = file.metadata().await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path)?;

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(&full).await?;

        let meta = fs::metadata(&full).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve_entry(path)?;
        fs::remove_file(&full).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        fs::remove_dir(&full).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let from = self.resolve_entry(from)?;
        let to = self.resolve_entry(to)?;

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from, &to).await?;
        Ok(())
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        let file = fs::OpenOptions::new().write(true).open(&full).await?;
        file.set_len(size).await?;
        Ok(())
    }

    async fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path)?;

        if let Some(size) = attr.size {
            let file = fs::OpenOptions::new().write(true).open(&full).await?;
            file.set_len(size).await?;
        }

        if let Some(perm) = attr.perm {
            let mut permissions = fs::metadata(&full).await?.permissions();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                permissions.set_mode(perm);
            }
            #[cfg(not(unix))]
            permissions.set_readonly(perm & 0o222 == 0);
            fs::set_permissions(&full, permissions).await?;
        }

        if attr.mtime.is_some() || attr.atime.is_some() {
            let mut times = std::fs::FileTimes::new();
            if let Some(mtime) = attr.mtime {
                times = times.set_modified(mtime);
            }
            if let Some(atime) = attr.atime {
                times = times.set_accessed(atime);
            }
            let file = fs::File::open(&full).await?.into_std().await;
            file.set_times(times)?;
        }

        let meta = fs::metadata(&full).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve_entry(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        #[cfg(unix)]
        fs::symlink(target, &full).await?;
        #[cfg(windows)]
        fs::symlink_file(target, &full).await?;

        let meta = fs::symlink_metadata(&full).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let old = self.resolve_entry(oldpath)?;
        let new = self.resolve_entry(newpath)?;
        if let Some(parent) = new.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::hard_link(&old, &new).await?;

        let meta = fs::symlink_metadata(&new).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn statfs(&self) -> VfsResult<StatFs> {
        #[cfg(unix)]
        {
            let stat = rustix::fs::statvfs(&self.root).map_err(|e| VfsError::Io(e.into()))?;
            Ok(StatFs {
                blocks: stat.f_blocks,
                bfree: stat.f_bfree,
                bavail: stat.f_bavail,
                files: stat.f_files,
                ffree: stat.f_ffree,
                bsize: stat.f_bsize as u32,
                namelen: stat.f_namemax as u32,
                frsize: stat.f_frsize as u32,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(StatFs::default())
        }
    }

    async fn real_path(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        let full = self.resolve(path)?;
        // Only existing entries have a real location.
        if !full.exists() {
            return Err(VfsError::not_found(path.display().to_string()));
        }
        Ok(Some(full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::types::Disposition;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    #[tokio::test]
    async fn test_create_write_read() {
        let (backend, _dir) = setup();

        backend.create(Path::new("clip0001.tga"), 0o644).await.unwrap();
        backend
            .write(Path::new("clip0001.tga"), 0, b"hello world")
            .await
            .unwrap();

        let data = backend.read(Path::new("clip0001.tga"), 6, 5).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_create_makes_parents() {
        let (backend, dir) = setup();
        backend.create(Path::new("a/b/c.txt"), 0o644).await.unwrap();
        assert!(dir.path().join("a/b/c.txt").is_file());
    }

    #[tokio::test]
    async fn test_readdir_sorted() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = backend.readdir(Path::new("")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(entries[2].kind.is_dir());
    }

    #[tokio::test]
    async fn test_read_only() {
        let (mut backend, _dir) = setup();
        backend.set_read_only(true);

        let result = backend.create(Path::new("test.txt"), 0o644).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (backend, _dir) = setup();

        let result = backend.read(Path::new("../../../etc/passwd"), 0, 100).await;
        assert!(result.is_err());

        let result = backend.create(Path::new("../../escape.txt"), 0o644).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_truncate_and_rename() {
        let (backend, _dir) = setup();
        backend.write_all(Path::new("old.txt"), b"hello world").await.unwrap();
        backend.truncate(Path::new("old.txt"), 5).await.unwrap();
        backend
            .rename(Path::new("old.txt"), Path::new("new.txt"))
            .await
            .unwrap();

        assert!(!backend.exists(Path::new("old.txt")).await);
        assert_eq!(backend.read_all(Path::new("new.txt")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_open_existing_missing() {
        let (backend, _dir) = setup();
        let err = backend
            .open(Path::new("render0007.tga"), Disposition::OpenExisting)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_real_path() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("test.txt"), "hello").unwrap();

        let real = backend.real_path(Path::new("test.txt")).await.unwrap().unwrap();
        assert!(real.is_absolute());
        assert!(real.ends_with("test.txt"));

        assert!(backend.real_path(Path::new("nonexistent.txt")).await.is_err());
        assert!(backend.real_path(Path::new("../etc/passwd")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_is_not_followed() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("clip0042.tga"), "pixels").unwrap();

        let attr = backend
            .symlink(Path::new("latest.tga"), Path::new("clip0042.tga"))
            .await
            .unwrap();
        assert!(attr.is_symlink());
        assert!(backend.getattr(Path::new("latest.tga")).await.unwrap().is_symlink());
        assert_eq!(
            backend.readlink(Path::new("latest.tga")).await.unwrap(),
            PathBuf::from("clip0042.tga")
        );
        assert!(matches!(
            backend.readlink(Path::new("clip0042.tga")).await,
            Err(VfsError::NotASymlink(_))
        ));

        // Removing the link leaves its target.
        backend.unlink(Path::new("latest.tga")).await.unwrap();
        assert!(dir.path().join("clip0042.tga").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hard_link() {
        let (backend, dir) = setup();
        std::fs::write(dir.path().join("a.txt"), "shared").unwrap();

        let attr = backend
            .link(Path::new("a.txt"), Path::new("b.txt"))
            .await
            .unwrap();
        assert_eq!(attr.nlink, 2);
        assert_eq!(backend.read_all(Path::new("b.txt")).await.unwrap(), b"shared");
    }

    #[tokio::test]
    async fn test_rmdir() {
        let (backend, dir) = setup();
        std::fs::create_dir(dir.path().join("shots")).unwrap();
        std::fs::write(dir.path().join("shots/a.txt"), "").unwrap();

        assert!(backend.rmdir(Path::new("shots")).await.is_err());
        std::fs::remove_file(dir.path().join("shots/a.txt")).unwrap();
        backend.rmdir(Path::new("shots")).await.unwrap();
        assert!(!dir.path().join("shots").exists());
        assert!(backend.rmdir(Path::new("")).await.is_err());
    }

    #[tokio::test]
    async fn test_setattr_size_and_mtime() {
        let (backend, _dir) = setup();
        backend.write_all(Path::new("a.txt"), b"hello world").await.unwrap();
        let mtime = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);

        let attr = backend
            .setattr(Path::new("a.txt"), SetAttr::new().with_size(5).with_mtime(mtime))
            .await
            .unwrap();
        assert_eq!(attr.size, 5);
        assert_eq!(attr.mtime, mtime);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_statfs() {
        let (backend, _dir) = setup();
        let stat = backend.statfs().await.unwrap();
        assert!(stat.bsize > 0);
    }
}
