// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapters over blocking underlays.
//!
//! Each adapter owns its underlay exclusively inside an `Arc<RwLock<_>>` and
//! ships every operation to a [`WorkPool`]: cursor-moving operations behind
//! the write lock, positional and attribute operations behind the read lock,
//! so independent positional IOs on one file proceed concurrently while
//! cursor IOs serialize. Handles produced by a wrapped filesystem share the
//! filesystem's pool.
//!
//! Operations that borrow caller buffers cross the thread boundary as raw
//! pointer/length pairs and are re-materialized on the worker; the
//! block-on-drop behavior of [`WorkPool::run_scoped`] is what makes that
//! sound even when the awaiting task is cancelled.

use std::fmt;
use std::io::{self, Error, IoSlice, IoSliceMut, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::blocking::{BlockingDirectory, BlockingFile, BlockingFilesystem};
use crate::directory::Directory;
use crate::file::File;
use crate::filesystem::Filesystem;
use crate::open_options::OpenOptions;
use crate::stat::{DirEntry, FileStat, FsStat};
use crate::work_pool::WorkPool;

/// Wraps a [`BlockingFile`] into the async [`File`] contract.
pub struct ThreadFile<U> {
    uif: Arc<RwLock<U>>,
    pool: WorkPool,
    has_xattr: bool,
}

impl<U: BlockingFile> ThreadFile<U> {
    /// Wraps `uif`, giving it a private worker pool.
    ///
    /// The extended-attribute capability is probed here, once; the adapter
    /// advertises exactly what the underlay declared at this moment.
    pub fn new(uif: U) -> Self {
        Self::with_pool(uif, WorkPool::new())
    }

    pub(crate) fn with_pool(uif: U, pool: WorkPool) -> Self {
        let has_xattr = uif.as_xattr().is_some();
        Self {
            uif: Arc::new(RwLock::new(uif)),
            pool,
            has_xattr,
        }
    }

    /// The wrapped underlay object.
    #[must_use]
    pub fn underlay(&self) -> Arc<RwLock<U>> {
        Arc::clone(&self.uif)
    }
}

impl<U> fmt::Debug for ThreadFile<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadFile").field("has_xattr", &self.has_xattr).finish_non_exhaustive()
    }
}

#[async_trait]
impl<U: BlockingFile> File for ThreadFile<U> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendSliceMut::new(buf);
        self.pool
            .run_scoped(move || {
                // SAFETY: ScopedWorkFuture blocks on drop, so `buf` outlives
                // the closure's execution.
                let buf = unsafe { raw.into_mut_slice() };
                write_guard(&uif)?.read(buf)
            })
            .await
    }

    async fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendIovecMut::new(bufs);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`; the caller's buffers outlive the closure.
                let mut bufs = unsafe { raw.into_slices() };
                write_guard(&uif)?.read_vectored(&mut bufs)
            })
            .await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendSlice::new(buf);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let buf = unsafe { raw.into_slice() };
                write_guard(&uif)?.write(buf)
            })
            .await
    }

    async fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendIovec::new(bufs);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let bufs = unsafe { raw.into_slices() };
                write_guard(&uif)?.write_vectored(&bufs)
            })
            .await
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendSliceMut::new(buf);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let buf = unsafe { raw.into_mut_slice() };
                read_guard(&uif)?.read_at(offset, buf)
            })
            .await
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendSlice::new(buf);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let buf = unsafe { raw.into_slice() };
                read_guard(&uif)?.write_at(offset, buf)
            })
            .await
    }

    async fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendIovecMut::new(bufs);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let mut bufs = unsafe { raw.into_slices() };
                read_guard(&uif)?.read_vectored_at(offset, &mut bufs)
            })
            .await
    }

    async fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let uif = Arc::clone(&self.uif);
        let raw = SendIovec::new(bufs);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let bufs = unsafe { raw.into_slices() };
                read_guard(&uif)?.write_vectored_at(offset, &bufs)
            })
            .await
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || write_guard(&uif)?.seek(pos)).await
    }

    async fn metadata(&self) -> io::Result<FileStat> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.metadata()).await
    }

    async fn sync_all(&self) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.sync_all()).await
    }

    async fn sync_data(&self) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.sync_data()).await
    }

    async fn sync_range(&self, offset: u64, len: u64) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.sync_range(offset, len)).await
    }

    async fn set_permissions(&self, mode: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.set_permissions(mode)).await
    }

    async fn set_owner(&self, uid: u32, gid: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.set_owner(uid, gid)).await
    }

    async fn set_len(&self, len: u64) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.set_len(len)).await
    }

    async fn allocate(&self, mode: u32, offset: u64, len: u64) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.allocate(mode, offset, len)).await
    }

    async fn close(&mut self) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || write_guard(&uif)?.close()).await
    }

    fn supports_xattr(&self) -> bool {
        self.has_xattr
    }

    async fn get_xattr(&self, name: &str, value: &mut [u8]) -> io::Result<usize> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let name = name.to_owned();
        let raw = SendSliceMut::new(value);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let value = unsafe { raw.into_mut_slice() };
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                xattr.get_xattr(&name, value)
            })
            .await
    }

    async fn list_xattr(&self, list: &mut [u8]) -> io::Result<usize> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let raw = SendSliceMut::new(list);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `read`.
                let list = unsafe { raw.into_mut_slice() };
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                xattr.list_xattr(list)
            })
            .await
    }

    async fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let name = name.to_owned();
        let value = value.to_vec();
        self.pool
            .run(move || {
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                xattr.set_xattr(&name, &value, flags)
            })
            .await
    }

    async fn remove_xattr(&self, name: &str) -> io::Result<()> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let name = name.to_owned();
        self.pool
            .run(move || {
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                xattr.remove_xattr(&name)
            })
            .await
    }
}

/// Wraps a [`BlockingDirectory`] into the async [`Directory`] contract.
pub struct ThreadDirectory<U> {
    uif: Arc<RwLock<U>>,
    pool: WorkPool,
}

impl<U: BlockingDirectory> ThreadDirectory<U> {
    /// Wraps `uif`, giving it a private worker pool.
    pub fn new(uif: U) -> Self {
        Self::with_pool(uif, WorkPool::new())
    }

    pub(crate) fn with_pool(uif: U, pool: WorkPool) -> Self {
        Self {
            uif: Arc::new(RwLock::new(uif)),
            pool,
        }
    }

    /// The wrapped underlay object.
    #[must_use]
    pub fn underlay(&self) -> Arc<RwLock<U>> {
        Arc::clone(&self.uif)
    }
}

#[async_trait]
impl<U: BlockingDirectory> Directory for ThreadDirectory<U> {
    async fn entry(&self) -> Option<DirEntry> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif).ok()?.entry()).await
    }

    async fn advance(&mut self) -> bool {
        let uif = Arc::clone(&self.uif);
        self.pool
            .run(move || write_guard(&uif).map(|mut dir| dir.advance()).unwrap_or(false))
            .await
    }

    async fn rewind(&mut self) {
        let uif = Arc::clone(&self.uif);
        self.pool
            .run(move || {
                if let Ok(mut dir) = write_guard(&uif) {
                    dir.rewind();
                }
            })
            .await;
    }

    async fn seek_to(&mut self, pos: u64) {
        let uif = Arc::clone(&self.uif);
        self.pool
            .run(move || {
                if let Ok(mut dir) = write_guard(&uif) {
                    dir.seek_to(pos);
                }
            })
            .await;
    }

    async fn tell(&self) -> u64 {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif).map(|dir| dir.tell()).unwrap_or(0)).await
    }

    async fn close(&mut self) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || write_guard(&uif)?.close()).await
    }
}

/// Wraps a [`BlockingFilesystem`] into the async [`Filesystem`] contract.
pub struct ThreadFilesystem<U> {
    uif: Arc<RwLock<U>>,
    pool: WorkPool,
    has_xattr: bool,
}

impl<U: BlockingFilesystem> ThreadFilesystem<U> {
    /// Wraps `uif`. Every handle the filesystem produces shares one pool.
    pub fn new(uif: U) -> Self {
        let has_xattr = uif.as_xattr().is_some();
        Self {
            uif: Arc::new(RwLock::new(uif)),
            pool: WorkPool::new(),
            has_xattr,
        }
    }

    /// The wrapped underlay object.
    #[must_use]
    pub fn underlay(&self) -> Arc<RwLock<U>> {
        Arc::clone(&self.uif)
    }
}

#[async_trait]
impl<U: BlockingFilesystem> Filesystem for ThreadFilesystem<U> {
    type File = ThreadFile<U::File>;
    type Dir = ThreadDirectory<U::Dir>;

    async fn open(&self, path: &Path, opts: OpenOptions) -> io::Result<Self::File> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let file = self.pool.run(move || read_guard(&uif)?.open(&path, opts)).await?;
        Ok(ThreadFile::with_pool(file, self.pool.clone()))
    }

    async fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32) -> io::Result<Self::File> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let file = self.pool.run(move || read_guard(&uif)?.open_with_mode(&path, opts, mode)).await?;
        Ok(ThreadFile::with_pool(file, self.pool.clone()))
    }

    async fn create(&self, path: &Path, mode: u32) -> io::Result<Self::File> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let file = self.pool.run(move || read_guard(&uif)?.create(&path, mode)).await?;
        Ok(ThreadFile::with_pool(file, self.pool.clone()))
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.create_dir(&path, mode)).await
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.remove_dir(&path)).await
    }

    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let target = target.to_owned();
        let link = link.to_owned();
        self.pool.run(move || read_guard(&uif)?.symlink(&target, &link)).await
    }

    async fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.read_link(&path)).await
    }

    async fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let original = original.to_owned();
        let link = link.to_owned();
        self.pool.run(move || read_guard(&uif)?.hard_link(&original, &link)).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let from = from.to_owned();
        let to = to.to_owned();
        self.pool.run(move || read_guard(&uif)?.rename(&from, &to)).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.remove_file(&path)).await
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.set_permissions(&path, mode)).await
    }

    async fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.set_owner(&path, uid, gid)).await
    }

    async fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.set_symlink_owner(&path, uid, gid)).await
    }

    async fn open_dir(&self, path: &Path) -> io::Result<Self::Dir> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let dir = self.pool.run(move || read_guard(&uif)?.open_dir(&path)).await?;
        Ok(ThreadDirectory::with_pool(dir, self.pool.clone()))
    }

    async fn metadata(&self, path: &Path) -> io::Result<FileStat> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.metadata(&path)).await
    }

    async fn symlink_metadata(&self, path: &Path) -> io::Result<FileStat> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.symlink_metadata(&path)).await
    }

    async fn access(&self, path: &Path, mode: u32) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.access(&path, mode)).await
    }

    async fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.truncate(&path, len)).await
    }

    async fn sync(&self) -> io::Result<()> {
        let uif = Arc::clone(&self.uif);
        self.pool.run(move || read_guard(&uif)?.sync()).await
    }

    async fn statfs(&self, path: &Path) -> io::Result<FsStat> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.statfs(&path)).await
    }

    async fn statvfs(&self, path: &Path) -> io::Result<FsStat> {
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        self.pool.run(move || read_guard(&uif)?.statvfs(&path)).await
    }

    fn supports_xattr(&self) -> bool {
        self.has_xattr
    }

    async fn get_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        self.fs_xattr_read(path, name, value, false).await
    }

    async fn lget_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        self.fs_xattr_read(path, name, value, true).await
    }

    async fn list_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        self.fs_xattr_list(path, list, false).await
    }

    async fn llist_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        self.fs_xattr_list(path, list, true).await
    }

    async fn set_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        self.fs_xattr_set(path, name, value, flags, false).await
    }

    async fn lset_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        self.fs_xattr_set(path, name, value, flags, true).await
    }

    async fn remove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        self.fs_xattr_remove(path, name, false).await
    }

    async fn lremove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        self.fs_xattr_remove(path, name, true).await
    }
}

impl<U: BlockingFilesystem> ThreadFilesystem<U> {
    async fn fs_xattr_read(&self, path: &Path, name: &str, value: &mut [u8], nofollow: bool) -> io::Result<usize> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let name = name.to_owned();
        let raw = SendSliceMut::new(value);
        self.pool
            .run_scoped(move || {
                // SAFETY: ScopedWorkFuture blocks on drop; `value` outlives the closure.
                let value = unsafe { raw.into_mut_slice() };
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                if nofollow {
                    xattr.lget_xattr(&path, &name, value)
                } else {
                    xattr.get_xattr(&path, &name, value)
                }
            })
            .await
    }

    async fn fs_xattr_list(&self, path: &Path, list: &mut [u8], nofollow: bool) -> io::Result<usize> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let raw = SendSliceMut::new(list);
        self.pool
            .run_scoped(move || {
                // SAFETY: as in `fs_xattr_read`.
                let list = unsafe { raw.into_mut_slice() };
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                if nofollow {
                    xattr.llist_xattr(&path, list)
                } else {
                    xattr.list_xattr(&path, list)
                }
            })
            .await
    }

    async fn fs_xattr_set(&self, path: &Path, name: &str, value: &[u8], flags: u32, nofollow: bool) -> io::Result<()> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let name = name.to_owned();
        let value = value.to_vec();
        self.pool
            .run(move || {
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                if nofollow {
                    xattr.lset_xattr(&path, &name, &value, flags)
                } else {
                    xattr.set_xattr(&path, &name, &value, flags)
                }
            })
            .await
    }

    async fn fs_xattr_remove(&self, path: &Path, name: &str, nofollow: bool) -> io::Result<()> {
        if !self.has_xattr {
            return Err(crate::xattr_unsupported());
        }
        let uif = Arc::clone(&self.uif);
        let path = path.to_owned();
        let name = name.to_owned();
        self.pool
            .run(move || {
                let guard = read_guard(&uif)?;
                let xattr = guard.as_xattr().ok_or_else(crate::xattr_unsupported)?;
                if nofollow {
                    xattr.lremove_xattr(&path, &name)
                } else {
                    xattr.remove_xattr(&path, &name)
                }
            })
            .await
    }
}

fn read_guard<U>(lock: &RwLock<U>) -> io::Result<RwLockReadGuard<'_, U>> {
    lock.read().map_err(|e| Error::other(format!("underlay lock poisoned: {e}")))
}

fn write_guard<U>(lock: &RwLock<U>) -> io::Result<RwLockWriteGuard<'_, U>> {
    lock.write().map_err(|e| Error::other(format!("underlay lock poisoned: {e}")))
}

/// An immutable raw-pointer slice that is [`Send`].
///
/// # Safety
///
/// The pointed-to data must stay alive and un-mutated for the duration of any
/// cross-thread access. In this crate, [`ScopedWorkFuture`] blocking on drop
/// provides that guarantee.
///
/// [`ScopedWorkFuture`]: crate::ScopedWorkFuture
#[derive(Clone, Copy)]
struct SendSlice {
    ptr: *const u8,
    len: usize,
}

impl SendSlice {
    fn new(slice: &[u8]) -> Self {
        Self {
            ptr: slice.as_ptr(),
            len: slice.len(),
        }
    }

    /// Reconstructs the original `&[u8]`.
    ///
    /// # Safety
    ///
    /// The original slice must still be alive and not mutably aliased.
    unsafe fn into_slice(self) -> &'static [u8] {
        // SAFETY: caller guarantees liveness and absence of mutable aliases.
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }
}

// SAFETY: the contract on `new`/`into_slice` plus the block-on-drop scoped
// future keep the data alive and unaliased during cross-thread access.
unsafe impl Send for SendSlice {}

/// A mutable raw-pointer slice that is [`Send`]; same contract as
/// [`SendSlice`], for exclusive access.
#[derive(Clone, Copy)]
struct SendSliceMut {
    ptr: *mut u8,
    len: usize,
}

impl SendSliceMut {
    fn new(slice: &mut [u8]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// Reconstructs the original `&mut [u8]`.
    ///
    /// # Safety
    ///
    /// The original slice must still be alive and exclusively borrowed by the
    /// suspended caller.
    unsafe fn into_mut_slice(self) -> &'static mut [u8] {
        // SAFETY: caller guarantees liveness and exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

// SAFETY: as for SendSlice.
unsafe impl Send for SendSliceMut {}

/// A captured scatter list of immutable segments that is [`Send`]; same
/// contract as [`SendSlice`], element-wise.
struct SendIovec {
    segments: Vec<(*const u8, usize)>,
}

impl SendIovec {
    fn new(bufs: &[IoSlice<'_>]) -> Self {
        Self {
            segments: bufs.iter().map(|b| (b.as_ptr(), b.len())).collect(),
        }
    }

    /// Reconstructs the scatter list.
    ///
    /// # Safety
    ///
    /// Every original segment must still be alive and not mutably aliased.
    unsafe fn into_slices(self) -> Vec<IoSlice<'static>> {
        self.segments
            .into_iter()
            // SAFETY: caller guarantees liveness and absence of mutable aliases.
            .map(|(ptr, len)| IoSlice::new(unsafe { core::slice::from_raw_parts(ptr, len) }))
            .collect()
    }
}

// SAFETY: as for SendSlice.
unsafe impl Send for SendIovec {}

/// A captured scatter list of mutable segments that is [`Send`]; same
/// contract as [`SendSliceMut`], element-wise.
struct SendIovecMut {
    segments: Vec<(*mut u8, usize)>,
}

impl SendIovecMut {
    fn new(bufs: &mut [IoSliceMut<'_>]) -> Self {
        Self {
            segments: bufs.iter_mut().map(|b| (b.as_mut_ptr(), b.len())).collect(),
        }
    }

    /// Reconstructs the scatter list.
    ///
    /// # Safety
    ///
    /// Every original segment must still be alive and exclusively borrowed by
    /// the suspended caller.
    unsafe fn into_slices(self) -> Vec<IoSliceMut<'static>> {
        self.segments
            .into_iter()
            // SAFETY: caller guarantees liveness and exclusivity.
            .map(|(ptr, len)| IoSliceMut::new(unsafe { core::slice::from_raw_parts_mut(ptr, len) }))
            .collect()
    }
}

// SAFETY: as for SendSliceMut.
unsafe impl Send for SendIovecMut {}
