//! Frame lifecycle observers.
//!
//! Handlers report two events: a frame was processed (by name) and a frame
//! was persisted (by location). Delivery is synchronous on the caller's
//! thread. A listener that errors or panics is logged and skipped; it never
//! stops delivery to the others or fails the filesystem call that triggered
//! the event.

use parking_lot::RwLock;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

/// Receives frame lifecycle events.
pub trait SequenceListener: Send + Sync {
    /// A frame has been taken in by its handler.
    fn on_frame_processed(&self, name: &str) -> anyhow::Result<()>;

    /// A frame has been written to backing storage at `path`.
    fn on_frame_saved(&self, path: &Path) -> anyhow::Result<()>;
}

/// An identity-keyed set of listeners.
///
/// Membership is by `Arc` address: adding the same `Arc` twice is a no-op,
/// adding a clone of the pointee is not the same listener.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn SequenceListener>>>,
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn SequenceListener>, b: &Arc<dyn SequenceListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns `false` if it was already present.
    pub fn add(&self, listener: Arc<dyn SequenceListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns `false` if it was not present.
    pub fn remove(&self, listener: &Arc<dyn SequenceListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Tell every listener a frame was processed.
    pub fn notify_frame_processed(&self, name: &str) {
        self.deliver("frame_processed", |l| l.on_frame_processed(name));
    }

    /// Tell every listener a frame was saved.
    pub fn notify_frame_saved(&self, path: &Path) {
        self.deliver("frame_saved", |l| l.on_frame_saved(path));
    }

    fn deliver(&self, event: &'static str, call: impl Fn(&dyn SequenceListener) -> anyhow::Result<()>) {
        // Snapshot so listeners can add/remove listeners from inside a callback.
        let snapshot: Vec<_> = self.listeners.read().clone();

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event, error = %e, "listener failed");
                }
                Err(_) => {
                    tracing::warn!(event, "listener panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        processed: Mutex<Vec<String>>,
        saved: Mutex<Vec<PathBuf>>,
    }

    impl SequenceListener for Recorder {
        fn on_frame_processed(&self, name: &str) -> anyhow::Result<()> {
            self.processed.lock().push(name.to_string());
            Ok(())
        }

        fn on_frame_saved(&self, path: &Path) -> anyhow::Result<()> {
            self.saved.lock().push(path.to_path_buf());
            Ok(())
        }
    }

    struct Failing;

    impl SequenceListener for Failing {
        fn on_frame_processed(&self, _name: &str) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn on_frame_saved(&self, _path: &Path) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    struct Panicking;

    impl SequenceListener for Panicking {
        fn on_frame_processed(&self, _name: &str) -> anyhow::Result<()> {
            panic!("listener bug")
        }

        fn on_frame_saved(&self, _path: &Path) -> anyhow::Result<()> {
            panic!("listener bug")
        }
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let set = ListenerSet::new();
        let recorder = Arc::new(Recorder::default());
        set.add(Arc::new(Failing));
        set.add(recorder.clone());

        set.notify_frame_processed("x");

        assert_eq!(*recorder.processed.lock(), vec!["x".to_string()]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let set = ListenerSet::new();
        let recorder = Arc::new(Recorder::default());
        set.add(Arc::new(Panicking));
        set.add(recorder.clone());

        set.notify_frame_saved(Path::new("/out/clip0001.tga"));

        assert_eq!(*recorder.saved.lock(), vec![PathBuf::from("/out/clip0001.tga")]);
    }

    #[test]
    fn test_add_is_identity_based() {
        let set = ListenerSet::new();
        let recorder: Arc<dyn SequenceListener> = Arc::new(Recorder::default());

        assert!(set.add(Arc::clone(&recorder)));
        assert!(!set.add(Arc::clone(&recorder)));
        assert!(set.add(Arc::new(Recorder::default())));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove() {
        let set = ListenerSet::new();
        let recorder = Arc::new(Recorder::default());
        let as_dyn: Arc<dyn SequenceListener> = recorder.clone();
        set.add(Arc::clone(&as_dyn));

        assert!(set.remove(&as_dyn));
        assert!(!set.remove(&as_dyn));
        assert!(set.is_empty());

        set.notify_frame_processed("ignored");
        assert!(recorder.processed.lock().is_empty());
    }

    struct SelfRemoving {
        set: Arc<ListenerSet>,
        me: Mutex<Option<Arc<dyn SequenceListener>>>,
        calls: Mutex<usize>,
    }

    impl SequenceListener for SelfRemoving {
        fn on_frame_processed(&self, _name: &str) -> anyhow::Result<()> {
            *self.calls.lock() += 1;
            if let Some(me) = self.me.lock().take() {
                self.set.remove(&me);
            }
            Ok(())
        }

        fn on_frame_saved(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_listener_may_remove_itself_during_delivery() {
        let set = Arc::new(ListenerSet::new());
        let recorder = Arc::new(Recorder::default());
        let remover = Arc::new(SelfRemoving {
            set: Arc::clone(&set),
            me: Mutex::new(None),
            calls: Mutex::new(0),
        });
        let remover_dyn: Arc<dyn SequenceListener> = remover.clone();
        *remover.me.lock() = Some(Arc::clone(&remover_dyn));

        set.add(remover_dyn);
        set.add(recorder.clone());

        set.notify_frame_processed("a");
        set.notify_frame_processed("b");

        assert_eq!(*remover.calls.lock(), 1);
        assert_eq!(*recorder.processed.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_mutation_and_delivery() {
        let set = Arc::new(ListenerSet::new());
        let recorder = Arc::new(Recorder::default());
        set.add(recorder.clone());

        let mut threads = Vec::new();
        for i in 0..4 {
            let set = Arc::clone(&set);
            threads.push(std::thread::spawn(move || {
                for j in 0..100 {
                    if i % 2 == 0 {
                        let extra: Arc<dyn SequenceListener> = Arc::new(Recorder::default());
                        set.add(Arc::clone(&extra));
                        set.remove(&extra);
                    } else {
                        set.notify_frame_processed(&format!("{i}-{j}"));
                    }
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(recorder.processed.lock().len(), 200);
        assert_eq!(set.len(), 1);
    }
}
