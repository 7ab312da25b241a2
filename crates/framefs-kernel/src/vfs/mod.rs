//! Virtual filesystem abstraction.
//!
//! Key components:
//!
//! - [`VfsOps`] - Core trait for filesystem operations
//! - [`LocalBackend`] - Loopback access to a real directory (with path security)
//! - [`MemoryBackend`] - In-memory filesystem (for testing)
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   Driver layers handle inode/handle ↔ path mapping themselves.
//! - **Explicit offset/size**: Read/write take offset and size, so no
//!   per-handle cursor state lives here.
//! - **Dispositions, not flags**: `open` takes a [`Disposition`] so the
//!   "does this create something?" question has one answer everywhere.

pub mod backends;
pub(crate) mod buffer;
mod error;
mod ops;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{DirEntry, Disposition, FileAttr, FileType, SetAttr, StatFs};
