// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, IoSlice, IoSliceMut, SeekFrom};

use async_trait::async_trait;

use crate::stat::FileStat;

/// The uniform async file contract.
///
/// Every adapter and decorator in this crate exports this trait, so the
/// pieces stack freely: a [`ThrottledFile`](crate::ThrottledFile) can wrap a
/// [`ThreadFile`](crate::ThreadFile), which wraps a blocking implementation,
/// and callers see one API throughout. Awaiting an operation suspends only
/// the calling task, never an executor worker.
///
/// Streaming operations (`read`, `write`, `seek`, vectored forms, `close`)
/// take `&mut self` — the cursor is shared mutable state, so only one can be
/// in flight. Positional operations take `&self` and may be issued
/// concurrently from any number of tasks holding the same handle.
///
/// Extended attributes are an optional capability: [`supports_xattr`]
/// (probed from the wrapped object at construction) reports whether the four
/// xattr operations work or fail with [`io::ErrorKind::Unsupported`].
///
/// [`supports_xattr`]: File::supports_xattr
#[async_trait]
pub trait File: Send + Sync + 'static {
    /// Reads at the cursor, advancing it.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Scatter read at the cursor.
    async fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// Writes at the cursor, advancing it.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Gather write at the cursor.
    async fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Reads at an absolute offset without touching the cursor.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes at an absolute offset without touching the cursor.
    async fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Scatter read at an absolute offset.
    async fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// Gather write at an absolute offset.
    async fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Moves the cursor.
    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// File attributes.
    async fn metadata(&self) -> io::Result<FileStat>;

    /// Flushes data and metadata to the storage medium.
    async fn sync_all(&self) -> io::Result<()>;

    /// Flushes data (not necessarily metadata).
    async fn sync_data(&self) -> io::Result<()>;

    /// Flushes a byte range.
    async fn sync_range(&self, offset: u64, len: u64) -> io::Result<()>;

    /// Changes permission bits.
    async fn set_permissions(&self, mode: u32) -> io::Result<()>;

    /// Changes ownership.
    async fn set_owner(&self, uid: u32, gid: u32) -> io::Result<()>;

    /// Truncates or extends to `len` bytes.
    async fn set_len(&self, len: u64) -> io::Result<()>;

    /// Manipulates allocated space (`fallocate`-style).
    async fn allocate(&self, mode: u32, offset: u64, len: u64) -> io::Result<()>;

    /// Closes the file, surfacing any error the underlying object reports.
    async fn close(&mut self) -> io::Result<()>;

    /// Whether the extended-attribute operations below are functional.
    fn supports_xattr(&self) -> bool {
        false
    }

    /// Reads the value of the named attribute into `value`, returning its length.
    async fn get_xattr(&self, _name: &str, _value: &mut [u8]) -> io::Result<usize> {
        Err(crate::xattr_unsupported())
    }

    /// Writes the NUL-separated attribute name list into `list`, returning its length.
    async fn list_xattr(&self, _list: &mut [u8]) -> io::Result<usize> {
        Err(crate::xattr_unsupported())
    }

    /// Sets the named attribute.
    async fn set_xattr(&self, _name: &str, _value: &[u8], _flags: u32) -> io::Result<()> {
        Err(crate::xattr_unsupported())
    }

    /// Removes the named attribute.
    async fn remove_xattr(&self, _name: &str) -> io::Result<()> {
        Err(crate::xattr_unsupported())
    }
}
