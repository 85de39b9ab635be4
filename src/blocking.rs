// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The blocking underlay contract.
//!
//! These traits describe filesystem objects whose operations block the calling
//! OS thread: a thin wrapper over `pread`-style system calls, a FUSE client, a
//! userspace block driver, and so on. Objects implementing them must never be
//! called from an async executor's worker directly; wrap them in a
//! [`ThreadFile`](crate::ThreadFile) / [`ThreadFilesystem`](crate::ThreadFilesystem)
//! adapter, which ships every call to a worker-thread pool.
//!
//! Streaming operations and `close` take `&mut self` because they move a
//! cursor or consume the handle; positional and attribute operations take
//! `&self` and must tolerate concurrent callers (as `pread`/`pwrite` do).

use std::io::{self, IoSlice, IoSliceMut, SeekFrom};
use std::path::{Path, PathBuf};

use crate::open_options::OpenOptions;
use crate::stat::{DirEntry, FileStat, FsStat};

/// A file whose operations block the calling OS thread.
pub trait BlockingFile: Send + Sync + 'static {
    /// Reads at the cursor, advancing it.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Scatter read at the cursor.
    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// Writes at the cursor, advancing it.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Gather write at the cursor.
    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Reads at an absolute offset without touching the cursor.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes at an absolute offset without touching the cursor.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Scatter read at an absolute offset.
    fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// Gather write at an absolute offset.
    fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Moves the cursor.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// File attributes.
    fn metadata(&self) -> io::Result<FileStat>;

    /// Flushes data and metadata to the storage medium.
    fn sync_all(&self) -> io::Result<()>;

    /// Flushes data (not necessarily metadata).
    fn sync_data(&self) -> io::Result<()>;

    /// Flushes a byte range.
    fn sync_range(&self, offset: u64, len: u64) -> io::Result<()>;

    /// Changes permission bits.
    fn set_permissions(&self, mode: u32) -> io::Result<()>;

    /// Changes ownership.
    fn set_owner(&self, uid: u32, gid: u32) -> io::Result<()>;

    /// Truncates or extends to `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Manipulates allocated space (`fallocate`-style; `mode` uses the
    /// platform's flag values).
    fn allocate(&self, mode: u32, offset: u64, len: u64) -> io::Result<()>;

    /// Closes the file. Dropping the object must also release it; `close`
    /// exists so errors can be observed.
    fn close(&mut self) -> io::Result<()>;

    /// Extended-attribute view, if this implementation has one.
    ///
    /// Adapters probe this once at construction to decide whether to
    /// advertise the xattr capability.
    fn as_xattr(&self) -> Option<&dyn BlockingFileXattr> {
        None
    }
}

/// Extended-attribute operations on an open blocking file.
pub trait BlockingFileXattr {
    /// Reads the value of the named attribute into `value`, returning its length.
    fn get_xattr(&self, name: &str, value: &mut [u8]) -> io::Result<usize>;

    /// Writes the NUL-separated attribute name list into `list`, returning its length.
    fn list_xattr(&self, list: &mut [u8]) -> io::Result<usize>;

    /// Sets the named attribute.
    fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> io::Result<()>;

    /// Removes the named attribute.
    fn remove_xattr(&self, name: &str) -> io::Result<()>;
}

/// An open directory iterator whose operations block the calling OS thread.
///
/// Iteration state lives in the implementation; the adapter layer adds none.
pub trait BlockingDirectory: Send + Sync + 'static {
    /// The entry under the iterator, or `None` past the end.
    fn entry(&self) -> Option<DirEntry>;

    /// Advances to the next entry; `false` once the end is reached.
    fn advance(&mut self) -> bool;

    /// Resets the iterator to the first entry.
    fn rewind(&mut self);

    /// Moves the iterator to a position previously returned by [`tell`](Self::tell).
    fn seek_to(&mut self, pos: u64);

    /// The current iterator position.
    fn tell(&self) -> u64;

    /// Closes the directory stream.
    fn close(&mut self) -> io::Result<()>;
}

/// A filesystem whose operations block the calling OS thread.
pub trait BlockingFilesystem: Send + Sync + 'static {
    /// Concrete file type produced by `open` / `create`.
    type File: BlockingFile;
    /// Concrete directory type produced by `open_dir`.
    type Dir: BlockingDirectory;

    /// Opens an existing file (or creates one, per `opts`).
    fn open(&self, path: &Path, opts: OpenOptions) -> io::Result<Self::File>;

    /// Opens a file, supplying permission bits used if it is created.
    fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32) -> io::Result<Self::File>;

    /// Creates (or truncates) a file for writing with the given permission bits.
    fn create(&self, path: &Path, mode: u32) -> io::Result<Self::File>;

    /// Creates a directory.
    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Creates a symbolic link at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Reads the target of a symbolic link.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Creates a hard link.
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;

    /// Atomically renames `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Removes a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Changes permission bits by path.
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Changes ownership by path, following symlinks.
    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Changes ownership of a symlink itself.
    fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Opens a directory for iteration.
    fn open_dir(&self, path: &Path) -> io::Result<Self::Dir>;

    /// Attributes of the object at `path`, following symlinks.
    fn metadata(&self, path: &Path) -> io::Result<FileStat>;

    /// Attributes of the object at `path`, not following symlinks.
    fn symlink_metadata(&self, path: &Path) -> io::Result<FileStat>;

    /// Checks accessibility of `path` for the given access mask.
    fn access(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Truncates the file at `path`.
    fn truncate(&self, path: &Path, len: u64) -> io::Result<()>;

    /// Flushes the whole filesystem.
    fn sync(&self) -> io::Result<()>;

    /// Filesystem statistics (`statfs`).
    fn statfs(&self, path: &Path) -> io::Result<FsStat>;

    /// Filesystem statistics (`statvfs`).
    fn statvfs(&self, path: &Path) -> io::Result<FsStat>;

    /// Extended-attribute view, if this implementation has one.
    fn as_xattr(&self) -> Option<&dyn BlockingFsXattr> {
        None
    }
}

/// Path-level extended-attribute operations; the `l`-prefixed variants do not
/// follow a final symlink.
pub trait BlockingFsXattr {
    /// Reads an attribute value by path.
    fn get_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize>;

    /// Reads an attribute value by path, without following a final symlink.
    fn lget_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize>;

    /// Lists attribute names by path.
    fn list_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize>;

    /// Lists attribute names by path, without following a final symlink.
    fn llist_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize>;

    /// Sets an attribute by path.
    fn set_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()>;

    /// Sets an attribute by path, without following a final symlink.
    fn lset_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()>;

    /// Removes an attribute by path.
    fn remove_xattr(&self, path: &Path, name: &str) -> io::Result<()>;

    /// Removes an attribute by path, without following a final symlink.
    fn lremove_xattr(&self, path: &Path, name: &str) -> io::Result<()>;
}
