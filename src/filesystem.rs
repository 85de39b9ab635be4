// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::directory::Directory;
use crate::file::File;
use crate::open_options::OpenOptions;
use crate::stat::{FileStat, FsStat};

/// The uniform async filesystem contract.
///
/// Handles returned by `open` / `create` / `open_dir` are already wrapped:
/// they implement [`File`] / [`Directory`] and ride the same bridge (thread
/// pool, completion timeout, or export waiter) as the filesystem that
/// produced them.
///
/// Path-level extended attributes are an optional capability, advertised via
/// [`supports_xattr`](Filesystem::supports_xattr) exactly as on [`File`].
#[async_trait]
pub trait Filesystem: Send + Sync + 'static {
    /// File handles this filesystem produces.
    type File: File;
    /// Directory handles this filesystem produces.
    type Dir: Directory;

    /// Opens an existing file (or creates one, per `opts`).
    async fn open(&self, path: &Path, opts: OpenOptions) -> io::Result<Self::File>;

    /// Opens a file, supplying permission bits used if it is created.
    async fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32) -> io::Result<Self::File>;

    /// Creates (or truncates) a file for writing with the given permission bits.
    async fn create(&self, path: &Path, mode: u32) -> io::Result<Self::File>;

    /// Creates a directory.
    async fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Removes an empty directory.
    async fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Creates a symbolic link at `link` pointing to `target`.
    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Reads the target of a symbolic link.
    async fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Creates a hard link.
    async fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;

    /// Atomically renames `from` to `to`.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Removes a file.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Changes permission bits by path.
    async fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Changes ownership by path, following symlinks.
    async fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Changes ownership of a symlink itself.
    async fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Opens a directory for iteration.
    async fn open_dir(&self, path: &Path) -> io::Result<Self::Dir>;

    /// Attributes of the object at `path`, following symlinks.
    async fn metadata(&self, path: &Path) -> io::Result<FileStat>;

    /// Attributes of the object at `path`, not following symlinks.
    async fn symlink_metadata(&self, path: &Path) -> io::Result<FileStat>;

    /// Checks accessibility of `path` for the given access mask.
    async fn access(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Truncates the file at `path`.
    async fn truncate(&self, path: &Path, len: u64) -> io::Result<()>;

    /// Flushes the whole filesystem.
    async fn sync(&self) -> io::Result<()>;

    /// Filesystem statistics (`statfs`).
    async fn statfs(&self, path: &Path) -> io::Result<FsStat>;

    /// Filesystem statistics (`statvfs`).
    async fn statvfs(&self, path: &Path) -> io::Result<FsStat>;

    /// Whether the extended-attribute operations below are functional.
    fn supports_xattr(&self) -> bool {
        false
    }

    /// Reads an attribute value by path.
    async fn get_xattr(&self, _path: &Path, _name: &str, _value: &mut [u8]) -> io::Result<usize> {
        Err(crate::xattr_unsupported())
    }

    /// Reads an attribute value by path, without following a final symlink.
    async fn lget_xattr(&self, _path: &Path, _name: &str, _value: &mut [u8]) -> io::Result<usize> {
        Err(crate::xattr_unsupported())
    }

    /// Lists attribute names by path.
    async fn list_xattr(&self, _path: &Path, _list: &mut [u8]) -> io::Result<usize> {
        Err(crate::xattr_unsupported())
    }

    /// Lists attribute names by path, without following a final symlink.
    async fn llist_xattr(&self, _path: &Path, _list: &mut [u8]) -> io::Result<usize> {
        Err(crate::xattr_unsupported())
    }

    /// Sets an attribute by path.
    async fn set_xattr(&self, _path: &Path, _name: &str, _value: &[u8], _flags: u32) -> io::Result<()> {
        Err(crate::xattr_unsupported())
    }

    /// Sets an attribute by path, without following a final symlink.
    async fn lset_xattr(&self, _path: &Path, _name: &str, _value: &[u8], _flags: u32) -> io::Result<()> {
        Err(crate::xattr_unsupported())
    }

    /// Removes an attribute by path.
    async fn remove_xattr(&self, _path: &Path, _name: &str) -> io::Result<()> {
        Err(crate::xattr_unsupported())
    }

    /// Removes an attribute by path, without following a final symlink.
    async fn lremove_xattr(&self, _path: &Path, _name: &str) -> io::Result<()> {
        Err(crate::xattr_unsupported())
    }
}
