//! The sequence router.
//!
//! Sits in front of a passthrough filesystem. Every call is classified by
//! path: frames of a numbered sequence go to that sequence's handler,
//! everything else goes to the passthrough untouched.
//!
//! | operation            | frame path             | other path   |
//! |----------------------|------------------------|--------------|
//! | `open` (creating)    | handler `create_file`  | passthrough  |
//! | `open` (existing)    | passthrough            | passthrough  |
//! | `create`             | handler `create_file`  | passthrough  |
//! | `close`              | handler `close_file`   | passthrough  |
//! | `truncate`           | handler `truncate_file`| passthrough  |
//! | `write`              | handler `write_file`   | passthrough  |
//! | `getattr`            | handler `get_file_info`| passthrough  |
//! | `readdir`            | passthrough, or empty while files are hidden |
//! | everything else      | passthrough            | passthrough  |
//!
//! A creating open only reaches `create_file` when it really replaces or
//! creates the frame: `CreateNew` (and `create`) on an existing frame fails
//! with `AlreadyExists`, and `OpenAlways` on one leaves it as it is.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::classify::SequenceClassifier;
use super::handler::{GroupHandler, HandlerFactory, HandlerParams};
use super::listeners::{ListenerSet, SequenceListener};
use super::registry::HandlerRegistry;
use crate::vfs::{DirEntry, Disposition, FileAttr, SetAttr, StatFs, VfsError, VfsOps, VfsResult};

/// Routes filesystem operations between sequence handlers and a passthrough.
pub struct SequenceRouter {
    backing: Arc<dyn VfsOps>,
    classifier: SequenceClassifier,
    registry: Arc<HandlerRegistry>,
    listeners: Arc<ListenerSet>,
    hide_files: AtomicBool,
}

impl std::fmt::Debug for SequenceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRouter")
            .field("classifier", &self.classifier)
            .field("registry", &self.registry)
            .field("listeners", &self.listeners)
            .field("hide_files", &self.hide_files())
            .finish()
    }
}

impl SequenceRouter {
    /// Create a router over `backing` using the default `.tga` classifier.
    ///
    /// `params` are handed unchanged to every handler `factory` builds.
    pub fn new(
        backing: Arc<dyn VfsOps>,
        factory: Arc<dyn HandlerFactory>,
        params: HandlerParams,
    ) -> Self {
        let listeners = Arc::new(ListenerSet::new());
        let registry = HandlerRegistry::new(
            Arc::clone(&backing),
            factory,
            params,
            Arc::clone(&listeners),
        );
        Self {
            backing,
            classifier: SequenceClassifier::default(),
            registry,
            listeners,
            hide_files: AtomicBool::new(false),
        }
    }

    /// Replace the classifier (e.g. for a different frame extension).
    pub fn with_classifier(mut self, classifier: SequenceClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The passthrough filesystem.
    pub fn backing(&self) -> &Arc<dyn VfsOps> {
        &self.backing
    }

    pub fn classifier(&self) -> &SequenceClassifier {
        &self.classifier
    }

    /// The live handler registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    /// Register an observer for frame events.
    pub fn add_listener(&self, listener: Arc<dyn SequenceListener>) -> bool {
        self.listeners.add(listener)
    }

    /// Unregister an observer.
    pub fn remove_listener(&self, listener: &Arc<dyn SequenceListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn notify_frame_processed(&self, name: &str) {
        self.listeners.notify_frame_processed(name);
    }

    pub fn notify_frame_saved(&self, path: &Path) {
        self.listeners.notify_frame_saved(path);
    }

    /// Hide (or reveal) every directory's contents from enumeration.
    ///
    /// Files stay reachable by exact path.
    pub fn set_hide_files(&self, hide: bool) {
        self.hide_files.store(hide, Ordering::SeqCst);
        tracing::debug!(hide, "directory enumeration visibility changed");
    }

    pub fn hide_files(&self) -> bool {
        self.hide_files.load(Ordering::SeqCst)
    }

    /// Tell the handler for `path`'s sequence that no more frames are coming.
    ///
    /// Never creates a handler. Returns `true` if the handler released itself.
    pub fn finish_sequence(&self, path: &Path) -> bool {
        self.classifier
            .classify(path)
            .and_then(|key| self.registry.get(&key))
            .is_some_and(|handler| handler.finish())
    }

    /// The handler for `path`, or `None` for passthrough paths.
    fn handler_for(&self, path: &Path) -> VfsResult<Option<Arc<dyn GroupHandler>>> {
        match self.classifier.classify(path) {
            Some(key) => {
                let handler = self.registry.resolve(&key)?;
                tracing::trace!(path = %path.display(), key = %key, "routed to sequence handler");
                Ok(Some(handler))
            }
            None => Ok(None),
        }
    }

    /// Whether the handler already knows `path`, buffered or on disk.
    async fn frame_exists(handler: &dyn GroupHandler, path: &Path) -> VfsResult<bool> {
        match handler.get_file_info(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VfsOps for SequenceRouter {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        match self.handler_for(path)? {
            Some(handler) => handler.get_file_info(path).await,
            None => self.backing.getattr(path).await,
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        if self.hide_files() {
            return Ok(Vec::new());
        }
        self.backing.readdir(path).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        self.backing.read(path, offset, size).await
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        self.backing.readlink(path).await
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        match self.handler_for(path)? {
            Some(handler) => handler.write_file(path, offset, data).await,
            None => self.backing.write(path, offset, data).await,
        }
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        match self.handler_for(path)? {
            Some(handler) => {
                if Self::frame_exists(handler.as_ref(), path).await? {
                    return Err(VfsError::already_exists(path.display().to_string()));
                }
                handler.create_file(path).await?;
                handler.get_file_info(path).await
            }
            None => self.backing.create(path, mode).await,
        }
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.backing.mkdir(path, mode).await
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.backing.unlink(path).await
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.backing.rmdir(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.backing.rename(from, to).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        match self.handler_for(path)? {
            Some(handler) => handler.truncate_file(path, size).await,
            None => self.backing.truncate(path, size).await,
        }
    }

    async fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr> {
        self.backing.setattr(path, attr).await
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        self.backing.symlink(path, target).await
    }

    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        self.backing.link(oldpath, newpath).await
    }

    async fn open(&self, path: &Path, disposition: Disposition) -> VfsResult<()> {
        // Opening an existing frame is plain passthrough; only creation is
        // a handler's business.
        if !disposition.should_create() {
            return self.backing.open(path, disposition).await;
        }
        let Some(handler) = self.handler_for(path)? else {
            return self.backing.open(path, disposition).await;
        };
        if disposition != Disposition::CreateAlways
            && Self::frame_exists(handler.as_ref(), path).await?
        {
            return match disposition {
                Disposition::CreateNew => {
                    Err(VfsError::already_exists(path.display().to_string()))
                }
                _ => Ok(()),
            };
        }
        handler.create_file(path).await
    }

    async fn close(&self, path: &Path) -> VfsResult<()> {
        match self.handler_for(path)? {
            Some(handler) => handler.close_file(path).await,
            None => self.backing.close(path).await,
        }
    }

    fn read_only(&self) -> bool {
        self.backing.read_only()
    }

    async fn statfs(&self) -> VfsResult<StatFs> {
        self.backing.statfs().await
    }

    async fn real_path(&self, path: &Path) -> VfsResult<Option<PathBuf>> {
        self.backing.real_path(path).await
    }
}
