// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The completion-callback underlay contract.
//!
//! These traits describe filesystem objects that deliver results through a
//! completion callback instead of a return value: io_uring-style backends,
//! RPC-backed filesystems, or objects living on another executor. Each
//! operation takes its arguments plus a [`Complete`] callback and returns
//! immediately; the callback fires exactly once, from whatever context the
//! implementation completes on.
//!
//! Data-carrying operations use owned buffers. A caller that gives up on an
//! operation (the [`CallbackFile`](crate::CallbackFile) adapter enforces a
//! timeout) has no way to revoke the callback, so the contract must not let a
//! late completion touch borrowed caller memory; the adapters copy at this
//! boundary instead.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use crate::open_options::OpenOptions;
use crate::stat::{DirEntry, FileStat, FsStat};

/// A one-shot completion callback carrying the operation's result.
pub type Complete<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// A file with completion-callback operations.
pub trait CompletionFile: Send + Sync + 'static {
    /// Reads up to `len` bytes at the cursor; completes with the bytes read.
    fn read(&self, len: usize, done: Complete<io::Result<Vec<u8>>>);

    /// Writes at the cursor; completes with the byte count written.
    fn write(&self, data: Vec<u8>, done: Complete<io::Result<usize>>);

    /// Reads up to `len` bytes at an absolute offset.
    fn read_at(&self, offset: u64, len: usize, done: Complete<io::Result<Vec<u8>>>);

    /// Writes at an absolute offset.
    fn write_at(&self, offset: u64, data: Vec<u8>, done: Complete<io::Result<usize>>);

    /// Moves the cursor.
    fn seek(&self, pos: SeekFrom, done: Complete<io::Result<u64>>);

    /// File attributes.
    fn metadata(&self, done: Complete<io::Result<FileStat>>);

    /// Flushes data and metadata.
    fn sync_all(&self, done: Complete<io::Result<()>>);

    /// Flushes data.
    fn sync_data(&self, done: Complete<io::Result<()>>);

    /// Flushes a byte range.
    fn sync_range(&self, offset: u64, len: u64, done: Complete<io::Result<()>>);

    /// Changes permission bits.
    fn set_permissions(&self, mode: u32, done: Complete<io::Result<()>>);

    /// Changes ownership.
    fn set_owner(&self, uid: u32, gid: u32, done: Complete<io::Result<()>>);

    /// Truncates or extends to `len` bytes.
    fn set_len(&self, len: u64, done: Complete<io::Result<()>>);

    /// Manipulates allocated space.
    fn allocate(&self, mode: u32, offset: u64, len: u64, done: Complete<io::Result<()>>);

    /// Closes the file.
    fn close(&self, done: Complete<io::Result<()>>);

    /// Extended-attribute view, if this implementation has one.
    fn as_xattr(&self) -> Option<&dyn CompletionFileXattr> {
        None
    }
}

/// Extended-attribute operations on a completion-callback file.
pub trait CompletionFileXattr: Send + Sync {
    /// Reads the named attribute; completes with its value.
    fn get_xattr(&self, name: &str, done: Complete<io::Result<Vec<u8>>>);

    /// Lists attribute names; completes with the NUL-separated list.
    fn list_xattr(&self, done: Complete<io::Result<Vec<u8>>>);

    /// Sets the named attribute.
    fn set_xattr(&self, name: &str, value: Vec<u8>, flags: u32, done: Complete<io::Result<()>>);

    /// Removes the named attribute.
    fn remove_xattr(&self, name: &str, done: Complete<io::Result<()>>);
}

/// A directory iterator with completion-callback operations.
pub trait CompletionDirectory: Send + Sync + 'static {
    /// The entry under the iterator, or `None` past the end.
    fn entry(&self, done: Complete<Option<DirEntry>>);

    /// Advances to the next entry; completes with `false` at the end.
    fn advance(&self, done: Complete<bool>);

    /// Resets the iterator.
    fn rewind(&self, done: Complete<()>);

    /// Moves the iterator to a saved position.
    fn seek_to(&self, pos: u64, done: Complete<()>);

    /// The current iterator position.
    fn tell(&self, done: Complete<u64>);

    /// Closes the directory stream.
    fn close(&self, done: Complete<io::Result<()>>);
}

/// A filesystem with completion-callback operations.
pub trait CompletionFilesystem: Send + Sync + 'static {
    /// Concrete file type produced by `open` / `create`.
    type File: CompletionFile;
    /// Concrete directory type produced by `open_dir`.
    type Dir: CompletionDirectory;

    /// Opens an existing file (or creates one, per `opts`).
    fn open(&self, path: &Path, opts: OpenOptions, done: Complete<io::Result<Self::File>>);

    /// Opens a file, supplying permission bits used if it is created.
    fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32, done: Complete<io::Result<Self::File>>);

    /// Creates (or truncates) a file for writing.
    fn create(&self, path: &Path, mode: u32, done: Complete<io::Result<Self::File>>);

    /// Creates a directory.
    fn create_dir(&self, path: &Path, mode: u32, done: Complete<io::Result<()>>);

    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path, done: Complete<io::Result<()>>);

    /// Creates a symbolic link.
    fn symlink(&self, target: &Path, link: &Path, done: Complete<io::Result<()>>);

    /// Reads the target of a symbolic link.
    fn read_link(&self, path: &Path, done: Complete<io::Result<PathBuf>>);

    /// Creates a hard link.
    fn hard_link(&self, original: &Path, link: &Path, done: Complete<io::Result<()>>);

    /// Atomically renames `from` to `to`.
    fn rename(&self, from: &Path, to: &Path, done: Complete<io::Result<()>>);

    /// Removes a file.
    fn remove_file(&self, path: &Path, done: Complete<io::Result<()>>);

    /// Changes permission bits by path.
    fn set_permissions(&self, path: &Path, mode: u32, done: Complete<io::Result<()>>);

    /// Changes ownership by path, following symlinks.
    fn set_owner(&self, path: &Path, uid: u32, gid: u32, done: Complete<io::Result<()>>);

    /// Changes ownership of a symlink itself.
    fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32, done: Complete<io::Result<()>>);

    /// Opens a directory for iteration.
    fn open_dir(&self, path: &Path, done: Complete<io::Result<Self::Dir>>);

    /// Attributes of the object at `path`, following symlinks.
    fn metadata(&self, path: &Path, done: Complete<io::Result<FileStat>>);

    /// Attributes of the object at `path`, not following symlinks.
    fn symlink_metadata(&self, path: &Path, done: Complete<io::Result<FileStat>>);

    /// Checks accessibility of `path`.
    fn access(&self, path: &Path, mode: u32, done: Complete<io::Result<()>>);

    /// Truncates the file at `path`.
    fn truncate(&self, path: &Path, len: u64, done: Complete<io::Result<()>>);

    /// Flushes the whole filesystem.
    fn sync(&self, done: Complete<io::Result<()>>);

    /// Filesystem statistics (`statfs`).
    fn statfs(&self, path: &Path, done: Complete<io::Result<FsStat>>);

    /// Filesystem statistics (`statvfs`).
    fn statvfs(&self, path: &Path, done: Complete<io::Result<FsStat>>);

    /// Extended-attribute view, if this implementation has one.
    fn as_xattr(&self) -> Option<&dyn CompletionFsXattr> {
        None
    }
}

/// Path-level extended-attribute operations with completion callbacks.
pub trait CompletionFsXattr: Send + Sync {
    /// Reads an attribute value by path.
    fn get_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<Vec<u8>>>);

    /// Reads an attribute value by path, without following a final symlink.
    fn lget_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<Vec<u8>>>);

    /// Lists attribute names by path.
    fn list_xattr(&self, path: &Path, done: Complete<io::Result<Vec<u8>>>);

    /// Lists attribute names by path, without following a final symlink.
    fn llist_xattr(&self, path: &Path, done: Complete<io::Result<Vec<u8>>>);

    /// Sets an attribute by path.
    fn set_xattr(&self, path: &Path, name: &str, value: Vec<u8>, flags: u32, done: Complete<io::Result<()>>);

    /// Sets an attribute by path, without following a final symlink.
    fn lset_xattr(&self, path: &Path, name: &str, value: Vec<u8>, flags: u32, done: Complete<io::Result<()>>);

    /// Removes an attribute by path.
    fn remove_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<()>>);

    /// Removes an attribute by path, without following a final symlink.
    fn lremove_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<()>>);
}
