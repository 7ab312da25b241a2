//! Passthrough backends.
//!
//! Backends implement [`VfsOps`](crate::vfs::VfsOps) against some concrete
//! storage. The sequence router falls back to one of these for every path
//! that is not part of a numbered sequence.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
