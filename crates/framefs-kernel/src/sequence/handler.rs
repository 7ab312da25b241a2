//! The per-sequence handler contract.
//!
//! A [`GroupHandler`] owns everything about one numbered sequence. The
//! router creates it through a [`HandlerFactory`] the first time a frame of
//! the sequence is touched and forwards every intercepted operation to it.
//! The handler decides when the sequence is over and asks to be dropped via
//! [`RegistryHandle::release`](super::RegistryHandle::release).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::classify::GroupKey;
use super::listeners::ListenerSet;
use super::registry::RegistryHandle;
use crate::vfs::{FileAttr, VfsOps, VfsResult};

/// Unique identity of one handler instance (UUIDv7).
///
/// Two handlers for the same key at different times have different ids,
/// which is what lets removal tell a stale handler from its replacement.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(uuid::Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for logs.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({})", self.short())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Tuning passed through to every new handler.
///
/// The router never looks inside; only handlers give these meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerParams {
    /// Input frames folded into one output frame.
    pub blend_rate: u32,
    /// Portion of each blend window that contributes, in degrees.
    pub shutter_angle: u32,
}

impl Default for HandlerParams {
    fn default() -> Self {
        Self {
            blend_rate: 1,
            shutter_angle: 180,
        }
    }
}

/// Operations the router forwards for paths inside a sequence.
///
/// Paths are passed exactly as the router received them. A handler is
/// solely responsible for the backing file of every frame routed to it:
/// the router does not fall back to the passthrough after a handler call.
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// The id this handler was constructed with.
    fn id(&self) -> HandlerId;

    /// A frame is being created (or re-created).
    async fn create_file(&self, path: &Path) -> VfsResult<()>;

    /// The driver closed its handle on a frame.
    async fn close_file(&self, path: &Path) -> VfsResult<()>;

    /// Resize a frame.
    async fn truncate_file(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Write into a frame, returning bytes written.
    async fn write_file(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32>;

    /// Metadata for a frame, synthesized or delegated.
    async fn get_file_info(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Hint from the host that no more frames are coming.
    ///
    /// Handlers that track completion on their own may ignore it. Returns
    /// `true` if the handler released itself from the registry.
    fn finish(&self) -> bool {
        false
    }
}

/// Everything a new handler is bound to.
#[derive(Clone)]
pub struct HandlerContext {
    /// Identity to report from [`GroupHandler::id`].
    pub id: HandlerId,
    /// The sequence this handler serves.
    pub key: GroupKey,
    /// The passthrough filesystem the router sits in front of.
    pub backing: Arc<dyn VfsOps>,
    pub params: HandlerParams,
    /// Observers to notify about processed and saved frames.
    pub listeners: Arc<ListenerSet>,
    /// Back-reference used to request removal.
    pub registry: RegistryHandle,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Builds handlers on first touch of a sequence.
///
/// Called while the registry holds the lock for the key being resolved, so
/// it must be quick and must not call back into the registry (including
/// [`RegistryHandle::release`](super::RegistryHandle::release)).
pub trait HandlerFactory: Send + Sync {
    fn create(&self, ctx: HandlerContext) -> VfsResult<Arc<dyn GroupHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn(HandlerContext) -> VfsResult<Arc<dyn GroupHandler>> + Send + Sync,
{
    fn create(&self, ctx: HandlerContext) -> VfsResult<Arc<dyn GroupHandler>> {
        self(ctx)
    }
}
