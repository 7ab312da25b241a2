//! Reference sequence handler: capture frames verbatim.
//!
//! Frames created through the handler are held in memory while the
//! producer writes them and land in backing storage in one piece when the
//! producer closes them. Listeners hear about each frame twice once it is on
//! disk: processed (by name), then saved (by location). A frame whose flush
//! fails stays buffered and the close can be retried.
//!
//! Blend parameters are carried and exposed for downstream handlers but
//! frames are stored exactly as written.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::classify::GroupKey;
use super::handler::{GroupHandler, HandlerContext, HandlerFactory, HandlerId, HandlerParams};
use super::listeners::ListenerSet;
use super::registry::RegistryHandle;
use crate::vfs::{FileAttr, VfsOps, VfsResult, buffer};

/// Builds a [`CaptureHandler`] per sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureFactory;

impl HandlerFactory for CaptureFactory {
    fn create(&self, ctx: HandlerContext) -> VfsResult<Arc<dyn GroupHandler>> {
        tracing::debug!(
            key = %ctx.key,
            blend_rate = ctx.params.blend_rate,
            shutter_angle = ctx.params.shutter_angle,
            "capturing sequence"
        );
        Ok(Arc::new(CaptureHandler::new(ctx)))
    }
}

/// Buffers frames of one sequence and flushes them on close.
pub struct CaptureHandler {
    id: HandlerId,
    key: GroupKey,
    backing: Arc<dyn VfsOps>,
    params: HandlerParams,
    listeners: Arc<ListenerSet>,
    registry: RegistryHandle,
    /// Frames opened for creation and not yet closed.
    pending: Mutex<HashMap<PathBuf, Vec<u8>>>,
    saved: AtomicU64,
}

impl std::fmt::Debug for CaptureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandler")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("pending", &self.pending.lock().len())
            .field("saved", &self.frames_saved())
            .finish()
    }
}

impl CaptureHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            id: ctx.id,
            key: ctx.key,
            backing: ctx.backing,
            params: ctx.params,
            listeners: ctx.listeners,
            registry: ctx.registry,
            pending: Mutex::new(HashMap::new()),
            saved: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn params(&self) -> HandlerParams {
        self.params
    }

    /// Frames flushed to backing storage so far.
    pub fn frames_saved(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    /// Frames created but not yet closed.
    pub fn frames_pending(&self) -> usize {
        self.pending.lock().len()
    }

    async fn flush(&self, path: &Path, frame: &[u8]) -> VfsResult<()> {
        self.backing.write_all(path, frame).await?;
        self.backing.close(path).await
    }

    fn frame_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

#[async_trait]
impl GroupHandler for CaptureHandler {
    fn id(&self) -> HandlerId {
        self.id
    }

    async fn create_file(&self, path: &Path) -> VfsResult<()> {
        // Re-creating a pending frame starts it over.
        self.pending.lock().insert(path.to_path_buf(), Vec::new());
        Ok(())
    }

    async fn close_file(&self, path: &Path) -> VfsResult<()> {
        let frame = self.pending.lock().remove(path);
        let Some(frame) = frame else {
            // Not one of ours; the backing file was written in place.
            return self.backing.close(path).await;
        };

        if let Err(e) = self.flush(path, &frame).await {
            tracing::warn!(key = %self.key, path = %path.display(), error = %e, "frame flush failed");
            // A create that raced the flush wins over the stale frame.
            self.pending.lock().entry(path.to_path_buf()).or_insert(frame);
            return Err(e);
        }
        let saved = self.saved.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.notify_frame_processed(&Self::frame_name(path));

        let location = match self.backing.real_path(path).await {
            Ok(Some(real)) => real,
            _ => path.to_path_buf(),
        };
        tracing::info!(
            key = %self.key,
            path = %location.display(),
            bytes = frame.len(),
            saved,
            "frame saved"
        );
        self.listeners.notify_frame_saved(&location);
        Ok(())
    }

    async fn truncate_file(&self, path: &Path, size: u64) -> VfsResult<()> {
        {
            let mut pending = self.pending.lock();
            if let Some(frame) = pending.get_mut(path) {
                return buffer::resize(frame, size);
            }
        }
        self.backing.truncate(path, size).await
    }

    async fn write_file(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        {
            let mut pending = self.pending.lock();
            if let Some(frame) = pending.get_mut(path) {
                return buffer::write_at(frame, offset, data);
            }
        }
        self.backing.write(path, offset, data).await
    }

    async fn get_file_info(&self, path: &Path) -> VfsResult<FileAttr> {
        let buffered = self.pending.lock().get(path).map(|frame| frame.len() as u64);
        match buffered {
            Some(size) => Ok(FileAttr::file(size, 0o644)),
            None => self.backing.getattr(path).await,
        }
    }

    /// Declare the sequence complete and leave the registry.
    ///
    /// Unclosed frames are discarded. The next frame with this key gets a
    /// fresh handler.
    fn finish(&self) -> bool {
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            tracing::warn!(key = %self.key, dropped, "sequence finished with unclosed frames");
        }
        self.registry.release(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::listeners::SequenceListener;
    use crate::sequence::registry::HandlerRegistry;
    use crate::vfs::{LocalBackend, MemoryBackend, VfsError};

    #[derive(Default)]
    struct Events {
        log: Mutex<Vec<String>>,
    }

    impl SequenceListener for Events {
        fn on_frame_processed(&self, name: &str) -> anyhow::Result<()> {
            self.log.lock().push(format!("processed {name}"));
            Ok(())
        }

        fn on_frame_saved(&self, path: &Path) -> anyhow::Result<()> {
            self.log.lock().push(format!("saved {}", path.display()));
            Ok(())
        }
    }

    fn detached(backing: Arc<dyn VfsOps>, listeners: Arc<ListenerSet>) -> CaptureHandler {
        CaptureHandler::new(HandlerContext {
            id: HandlerId::new(),
            key: GroupKey::from("clip"),
            backing,
            params: HandlerParams::default(),
            listeners,
            registry: RegistryHandle::detached(),
        })
    }

    #[tokio::test]
    async fn test_frame_is_buffered_until_close() {
        let backing = Arc::new(MemoryBackend::new());
        let events = Arc::new(Events::default());
        let listeners = Arc::new(ListenerSet::new());
        listeners.add(events.clone());
        let handler = detached(backing.clone(), listeners);
        let frame = Path::new("clip0001.tga");

        handler.create_file(frame).await.unwrap();
        handler.write_file(frame, 0, b"TGA").await.unwrap();
        handler.write_file(frame, 3, b"-data").await.unwrap();

        assert!(!backing.exists(frame).await);
        assert_eq!(handler.get_file_info(frame).await.unwrap().size, 8);
        assert_eq!(handler.frames_pending(), 1);

        handler.close_file(frame).await.unwrap();

        assert_eq!(backing.read_all(frame).await.unwrap(), b"TGA-data");
        assert_eq!(handler.frames_saved(), 1);
        assert_eq!(handler.frames_pending(), 0);
        assert_eq!(
            *events.log.lock(),
            vec![
                "processed clip0001.tga".to_string(),
                "saved clip0001.tga".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_truncate_pending_frame() {
        let backing = Arc::new(MemoryBackend::new());
        let handler = detached(backing.clone(), Arc::new(ListenerSet::new()));
        let frame = Path::new("clip0002.tga");

        handler.create_file(frame).await.unwrap();
        handler.write_file(frame, 0, b"0123456789").await.unwrap();
        handler.truncate_file(frame, 4).await.unwrap();
        handler.close_file(frame).await.unwrap();

        assert_eq!(backing.read_all(frame).await.unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_unbuffered_frame_goes_to_backing() {
        let backing = Arc::new(MemoryBackend::new());
        backing.write_all(Path::new("clip0003.tga"), b"old").await.unwrap();
        let events = Arc::new(Events::default());
        let listeners = Arc::new(ListenerSet::new());
        listeners.add(events.clone());
        let handler = detached(backing.clone(), listeners);
        let frame = Path::new("clip0003.tga");

        handler.write_file(frame, 0, b"new").await.unwrap();
        assert_eq!(handler.get_file_info(frame).await.unwrap().size, 3);
        handler.close_file(frame).await.unwrap();

        assert_eq!(backing.read_all(frame).await.unwrap(), b"new");
        assert_eq!(handler.frames_saved(), 0);
        assert!(events.log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_unbuffered_frame_is_not_found() {
        let handler = detached(Arc::new(MemoryBackend::new()), Arc::new(ListenerSet::new()));
        let err = handler
            .get_file_info(Path::new("clip0009.tga"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_saved_event_reports_real_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let backing = Arc::new(LocalBackend::new(dir.path()));
        let events = Arc::new(Events::default());
        let listeners = Arc::new(ListenerSet::new());
        listeners.add(events.clone());
        let handler = detached(backing.clone(), listeners);
        let frame = Path::new("clip0001.tga");

        handler.create_file(frame).await.unwrap();
        handler.write_file(frame, 0, b"pixels").await.unwrap();
        handler.close_file(frame).await.unwrap();

        let expected = backing.root().join("clip0001.tga");
        assert_eq!(std::fs::read(&expected).unwrap(), b"pixels");
        assert_eq!(
            events.log.lock().last().cloned(),
            Some(format!("saved {}", expected.display()))
        );
    }

    #[tokio::test]
    async fn test_out_of_range_write_is_an_error() {
        let handler = detached(Arc::new(MemoryBackend::new()), Arc::new(ListenerSet::new()));
        let frame = Path::new("clip0001.tga");

        handler.create_file(frame).await.unwrap();
        handler.write_file(frame, 0, b"TGA").await.unwrap();

        assert!(handler.write_file(frame, u64::MAX - 1, b"abcd").await.is_err());
        assert!(handler.truncate_file(frame, u64::MAX).await.is_err());
        assert_eq!(handler.get_file_info(frame).await.unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_frame_pending() {
        let dir = tempfile::TempDir::new().unwrap();
        let backing = Arc::new(LocalBackend::read_only(dir.path()));
        let events = Arc::new(Events::default());
        let listeners = Arc::new(ListenerSet::new());
        listeners.add(events.clone());
        let handler = detached(backing, listeners);
        let frame = Path::new("clip0001.tga");

        handler.create_file(frame).await.unwrap();
        handler.write_file(frame, 0, b"pixels").await.unwrap();

        let err = handler.close_file(frame).await.unwrap_err();
        assert!(matches!(err, VfsError::ReadOnly), "{err}");
        assert_eq!(handler.frames_pending(), 1);
        assert_eq!(handler.get_file_info(frame).await.unwrap().size, 6);
        assert!(events.log.lock().is_empty());

        // Still ours, so a second close fails the same way instead of
        // quietly succeeding.
        assert!(handler.close_file(frame).await.is_err());
        assert_eq!(handler.frames_saved(), 0);
        assert!(!dir.path().join("clip0001.tga").exists());
    }

    #[tokio::test]
    async fn test_close_can_be_retried_after_flush_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        // A file where the frame's directory should be.
        std::fs::write(dir.path().join("shots"), "").unwrap();
        let backing = Arc::new(LocalBackend::new(dir.path()));
        let events = Arc::new(Events::default());
        let listeners = Arc::new(ListenerSet::new());
        listeners.add(events.clone());
        let handler = detached(backing, listeners);
        let frame = Path::new("shots/clip0001.tga");

        handler.create_file(frame).await.unwrap();
        handler.write_file(frame, 0, b"pixels").await.unwrap();
        assert!(handler.close_file(frame).await.is_err());
        assert_eq!(handler.frames_pending(), 1);

        std::fs::remove_file(dir.path().join("shots")).unwrap();
        handler.close_file(frame).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("shots/clip0001.tga")).unwrap(), b"pixels");
        assert_eq!(handler.frames_pending(), 0);
        assert_eq!(handler.frames_saved(), 1);
        assert_eq!(events.log.lock().first().map(String::as_str), Some("processed clip0001.tga"));
        assert_eq!(events.log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_finish_releases_from_registry() {
        let registry = HandlerRegistry::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(CaptureFactory),
            HandlerParams::default(),
            Arc::new(ListenerSet::new()),
        );
        let key = GroupKey::from("clip");

        let handler = registry.resolve(&key).unwrap();
        handler.create_file(Path::new("clip0001.tga")).await.unwrap();

        assert!(handler.finish());
        assert!(registry.is_empty());
        assert!(!handler.finish());

        let replacement = registry.resolve(&key).unwrap();
        assert_ne!(replacement.id(), handler.id());
    }

    #[tokio::test]
    async fn test_finish_without_registry() {
        let handler = detached(Arc::new(MemoryBackend::new()), Arc::new(ListenerSet::new()));
        handler.create_file(Path::new("clip0001.tga")).await.unwrap();
        assert!(!handler.finish());
        assert_eq!(handler.frames_pending(), 0);
    }

    #[test]
    fn test_factory_passes_params_through() {
        let handler = CaptureHandler::new(HandlerContext {
            id: HandlerId::new(),
            key: GroupKey::from("clip"),
            backing: Arc::new(MemoryBackend::new()),
            params: HandlerParams {
                blend_rate: 3,
                shutter_angle: 90,
            },
            listeners: Arc::new(ListenerSet::new()),
            registry: RegistryHandle::detached(),
        });
        assert_eq!(handler.params().blend_rate, 3);
        assert_eq!(handler.params().shutter_angle, 90);
        assert_eq!(handler.key().as_str(), "clip");
    }
}
