//! In-memory file contents.
//!
//! Offsets and sizes come straight from the driver as `u64`. Anything that
//! does not fit in memory is an error here, never an overflow or an
//! allocation abort.

use std::io;

use super::error::{VfsError, VfsResult};

fn too_large(what: &str, value: u64) -> VfsError {
    VfsError::Io(io::Error::new(
        io::ErrorKind::FileTooLarge,
        format!("{what} {value} exceeds the in-memory file limit"),
    ))
}

/// Resize `buf` to `len` bytes, zero-filling any growth.
pub(crate) fn resize(buf: &mut Vec<u8>, len: u64) -> VfsResult<()> {
    let len = usize::try_from(len).map_err(|_| too_large("size", len))?;
    if len > buf.len() {
        buf.try_reserve(len - buf.len())
            .map_err(|_| too_large("size", len as u64))?;
    }
    buf.resize(len, 0);
    Ok(())
}

/// Write `data` into `buf` at `offset`, growing it as needed.
pub(crate) fn write_at(buf: &mut Vec<u8>, offset: u64, data: &[u8]) -> VfsResult<u32> {
    let written = u32::try_from(data.len()).map_err(|_| too_large("write of", data.len() as u64))?;
    let start = usize::try_from(offset).map_err(|_| too_large("offset", offset))?;
    let end = start
        .checked_add(data.len())
        .ok_or_else(|| too_large("offset", offset))?;
    if end > buf.len() {
        resize(buf, end as u64)?;
    }
    buf[start..end].copy_from_slice(data);
    Ok(written)
}

/// The bytes of `buf` in `offset..offset + size`, clamped to its length.
pub(crate) fn read_at(buf: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buf.len());
    let end = start.saturating_add(size as usize).min(buf.len());
    buf[start..end].to_vec()
}
