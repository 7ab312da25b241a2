//! Numbered-sequence interception.
//!
//! Frame paths (`<prefix><digits>.<ext>`) are grouped by prefix and every
//! group gets one live handler:
//!
//! - [`SequenceClassifier`] - path → [`GroupKey`], or "not a frame"
//! - [`HandlerRegistry`] - at most one [`GroupHandler`] per key, built on demand
//! - [`ListenerSet`] - fan-out of frame processed/saved events
//! - [`SequenceRouter`] - a [`VfsOps`](crate::vfs::VfsOps) that sends frame
//!   operations to handlers and everything else to a passthrough
//! - [`CaptureHandler`] - stores frames verbatim on close

pub mod capture;
pub mod classify;
pub mod handler;
pub mod listeners;
pub mod registry;
pub mod router;

pub use capture::{CaptureFactory, CaptureHandler};
pub use classify::{DEFAULT_EXTENSION, GroupKey, SequenceClassifier};
pub use handler::{GroupHandler, HandlerContext, HandlerFactory, HandlerId, HandlerParams};
pub use listeners::{ListenerSet, SequenceListener};
pub use registry::{HandlerRegistry, RegistryHandle};
pub use router::SequenceRouter;
