//! In-memory filesystem backend.
//!
//! Ephemeral passthrough target. Used by tests and by anything that wants
//! the overlay without touching disk.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::vfs::buffer;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType, SetAttr, StatFs};

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
    Symlink { target: PathBuf, attr: FileAttr },
}

impl Node {
    fn attr(&self) -> &FileAttr {
        match self {
            Node::File { attr, .. } | Node::Directory { attr } | Node::Symlink { attr, .. } => attr,
        }
    }

    fn attr_mut(&mut self) -> &mut FileAttr {
        match self {
            Node::File { attr, .. } | Node::Directory { attr } | Node::Symlink { attr, .. } => attr,
        }
    }

    fn kind(&self) -> FileType {
        match self {
            Node::File { .. } => FileType::File,
            Node::Directory { .. } => FileType::Directory,
            Node::Symlink { .. } => FileType::Symlink,
        }
    }
}

/// In-memory filesystem backend.
///
/// Keys are normalized relative paths; the root is the empty path and always
/// exists.
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: RwLock<HashMap<PathBuf, Node>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            PathBuf::new(),
            Node::Directory {
                attr: FileAttr::directory(0o755),
            },
        );
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Strip the root, `.` and `..` so every spelling of a path maps to one key.
    fn normalize(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => out.push(s),
                Component::ParentDir => {
                    out.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        out
    }

    fn display(path: &Path) -> String {
        path.display().to_string()
    }

    /// Insert directory nodes for every missing ancestor of `path`.
    fn ensure_parents(nodes: &mut HashMap<PathBuf, Node>, path: &Path) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            current.push(component);
            match nodes.get(&current) {
                Some(Node::Directory { .. }) => {}
                Some(_) => {
                    return Err(VfsError::not_a_directory(Self::display(&current)));
                }
                None => {
                    nodes.insert(
                        current.clone(),
                        Node::Directory {
                            attr: FileAttr::directory(0o755),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn with_file<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut Vec<u8>, &mut FileAttr) -> T,
    ) -> VfsResult<T> {
        let key = Self::normalize(path);
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&key) {
            Some(Node::File { data, attr }) => {
                let out = f(data, attr);
                attr.size = data.len() as u64;
                attr.mtime = SystemTime::now();
                Ok(out)
            }
            Some(Node::Directory { .. }) => Err(VfsError::is_a_directory(Self::display(&key))),
            Some(Node::Symlink { .. }) => Err(VfsError::invalid_path(Self::display(&key))),
            None => Err(VfsError::not_found(Self::display(&key))),
        }
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let key = Self::normalize(path);
        self.nodes
            .read()
            .get(&key)
            .map(|node| node.attr().clone())
            .ok_or_else(|| VfsError::not_found(Self::display(&key)))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let key = Self::normalize(path);
        let nodes = self.nodes.read();

        match nodes.get(&key) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::display(&key))),
            None => return Err(VfsError::not_found(Self::display(&key))),
        }

        let mut entries: Vec<DirEntry> = nodes
            .iter()
            .filter(|(child, _)| child.parent() == Some(key.as_path()))
            .filter_map(|(child, node)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                Some(DirEntry::new(name, node.kind()))
            })
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let key = Self::normalize(path);
        let nodes = self.nodes.read();
        match nodes.get(&key) {
            Some(Node::File { data, .. }) => Ok(buffer::read_at(data, offset, size)),
            Some(Node::Directory { .. }) => Err(VfsError::is_a_directory(Self::display(&key))),
            Some(Node::Symlink { .. }) => Err(VfsError::invalid_path(Self::display(&key))),
            None => Err(VfsError::not_found(Self::display(&key))),
        }
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let key = Self::normalize(path);
        match self.nodes.read().get(&key) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(VfsError::not_a_symlink(Self::display(&key))),
            None => Err(VfsError::not_found(Self::display(&key))),
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.with_file(path, |contents, _| buffer::write_at(contents, offset, data))?
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let key = Self::normalize(path);
        if key.as_os_str().is_empty() {
            return Err(VfsError::already_exists("/"));
        }

        let mut nodes = self.nodes.write();
        if nodes.contains_key(&key) {
            return Err(VfsError::already_exists(Self::display(&key)));
        }
        Self::ensure_parents(&mut nodes, &key)?;

        let attr = FileAttr::file(0, mode);
        nodes.insert(
            key,
            Node::File {
                data: Vec::new(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let key = Self::normalize(path);
        let mut nodes = self.nodes.write();

        match nodes.get(&key) {
            Some(Node::Directory { attr }) => return Ok(attr.clone()),
            Some(_) => {
                return Err(VfsError::already_exists(Self::display(&key)));
            }
            None => {}
        }
        Self::ensure_parents(&mut nodes, &key)?;

        let attr = FileAttr::directory(mode);
        nodes.insert(key, Node::Directory { attr: attr.clone() });
        Ok(attr)
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        let key = Self::normalize(path);
        let mut nodes = self.nodes.write();
        match nodes.get(&key) {
            Some(Node::File { .. } | Node::Symlink { .. }) => {
                nodes.remove(&key);
                Ok(())
            }
            Some(Node::Directory { .. }) => Err(VfsError::is_a_directory(Self::display(&key))),
            None => Err(VfsError::not_found(Self::display(&key))),
        }
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        let key = Self::normalize(path);
        if key.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut nodes = self.nodes.write();
        match nodes.get(&key) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::display(&key))),
            None => return Err(VfsError::not_found(Self::display(&key))),
        }
        if nodes.keys().any(|k| k.parent() == Some(key.as_path())) {
            return Err(VfsError::directory_not_empty(Self::display(&key)));
        }
        nodes.remove(&key);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from = Self::normalize(from);
        let to = Self::normalize(to);
        if from == to {
            return Ok(());
        }

        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&from) {
            return Err(VfsError::not_found(Self::display(&from)));
        }
        Self::ensure_parents(&mut nodes, &to)?;

        // Move the node and, for directories, everything beneath it.
        let moved: Vec<PathBuf> = nodes
            .keys()
            .filter(|k| k.starts_with(&from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let suffix = old.strip_prefix(&from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(suffix)
                };
                nodes.insert(new, node);
            }
        }
        Ok(())
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.with_file(path, |contents, _| buffer::resize(contents, size))?
    }

    async fn setattr(&self, path: &Path, set: SetAttr) -> VfsResult<FileAttr> {
        let key = Self::normalize(path);
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&key)
            .ok_or_else(|| VfsError::not_found(Self::display(&key)))?;

        if let Some(size) = set.size {
            match node {
                Node::File { data, attr } => {
                    buffer::resize(data, size)?;
                    attr.size = size;
                }
                Node::Directory { .. } => return Err(VfsError::is_a_directory(Self::display(&key))),
                Node::Symlink { .. } => return Err(VfsError::invalid_path(Self::display(&key))),
            }
        }

        let attr = node.attr_mut();
        if let Some(mtime) = set.mtime {
            attr.mtime = mtime;
        }
        if let Some(atime) = set.atime {
            attr.atime = Some(atime);
        }
        if let Some(perm) = set.perm {
            attr.perm = perm;
        }
        Ok(attr.clone())
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        let key = Self::normalize(path);
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&key) {
            return Err(VfsError::already_exists(Self::display(&key)));
        }
        Self::ensure_parents(&mut nodes, &key)?;

        let attr = FileAttr::symlink(target.as_os_str().len() as u64);
        nodes.insert(
            key,
            Node::Symlink {
                target: target.to_path_buf(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        let _ = (oldpath, newpath);
        Err(VfsError::other("hard links not supported in memory backend"))
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn statfs(&self) -> VfsResult<StatFs> {
        Ok(StatFs::default())
    }
}
