// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;

/// What kind of object a directory entry or stat result refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else (device node, socket, fifo, ...).
    Other,
}

/// File attributes, as reported by `metadata` on files and filesystems.
///
/// A deliberately small, constructible subset of a full `stat` record: the
/// fields the adapters and the throttling layer actually consume. Underlying
/// implementations that track more can expose it through their own types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// Logical size in bytes.
    pub size: u64,
    /// Bytes actually allocated on the storage medium (block count times
    /// block size; may be smaller than `size` for sparse files).
    pub allocated: u64,
    /// Permission bits.
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Object kind.
    pub kind: FileKind,
}

impl FileStat {
    /// A stat record for a regular file of the given size, fully allocated,
    /// with conventional ownership and permissions.
    #[must_use]
    pub const fn regular(size: u64) -> Self {
        Self {
            size,
            allocated: size,
            mode: 0o644,
            uid: 0,
            gid: 0,
            kind: FileKind::File,
        }
    }
}

/// Filesystem-level attributes, as reported by `statfs` / `statvfs`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsStat {
    /// Preferred IO block size.
    pub block_size: u64,
    /// Total data blocks.
    pub blocks: u64,
    /// Free blocks.
    pub blocks_free: u64,
    /// Free blocks available to unprivileged callers.
    pub blocks_available: u64,
    /// Total file nodes.
    pub files: u64,
    /// Free file nodes.
    pub files_free: u64,
    /// Maximum file name length.
    pub name_max: u64,
}

/// A single directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Name of the entry within its directory (not a full path).
    pub name: OsString,
    /// Kind of the entry.
    pub kind: FileKind,
}

impl DirEntry {
    /// Creates an entry from a name and kind.
    pub fn new(name: impl Into<OsString>, kind: FileKind) -> Self {
        Self { name: name.into(), kind }
    }
}
