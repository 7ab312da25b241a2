//! # framefs-kernel
//!
//! A loopback filesystem overlay that intercepts numbered frame sequences.
//!
//! Writes to `render0001.tga`, `render0002.tga`, ... are handed to one
//! handler per sequence (`render`) instead of landing on disk directly.
//! Every other path passes through to the backing directory untouched.
//!
//! ```no_run
//! use framefs_kernel::{FsConfig, VfsOps};
//! use std::path::Path;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let router = FsConfig::load("~/.config/framefs.toml")?.build_router()?;
//! router.create(Path::new("render0001.tga"), 0o644).await?;
//! router.write(Path::new("render0001.tga"), 0, b"...").await?;
//! router.close(Path::new("render0001.tga")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The filesystem driver that mounts the router is out of scope; anything
//! that can translate its callbacks into [`VfsOps`] calls can host it.

pub mod config;
pub mod sequence;
pub mod vfs;

pub use config::{ConfigError, FsConfig};
pub use sequence::{
    CaptureFactory, CaptureHandler, GroupHandler, GroupKey, HandlerContext, HandlerFactory,
    HandlerId, HandlerParams, HandlerRegistry, ListenerSet, RegistryHandle, SequenceClassifier,
    SequenceListener, SequenceRouter,
};
pub use vfs::{
    DirEntry, Disposition, FileAttr, FileType, LocalBackend, MemoryBackend, StatFs, VfsError,
    VfsOps, VfsResult,
};
