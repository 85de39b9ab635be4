// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reverse bridge: presenting a runtime-hosted file to plain OS threads.
//!
//! Two composable layers. [`LiftedFile`] (and the directory / filesystem
//! analogues) turns any async-contract object into a completion-callback one
//! by spawning each operation onto a captured runtime handle; the callback
//! fires from the runtime when the operation's task finishes. [`ExportedFile`]
//! then implements the *blocking* contract over any completion-callback
//! object by parking the calling OS thread on a mutex + condvar until the
//! callback delivers the result. The wait has no timeout; the original
//! operation is executing on a live runtime and will complete or fail there.
//!
//! [`export_file`] / [`export_dir`] / [`export_fs`] compose the two layers.
//! The resulting objects must be driven from ordinary threads — calling them
//! from an executor worker would park the very runtime that has to produce
//! the result.

use std::io::{self, IoSlice, IoSliceMut, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use tokio::runtime::Handle;

use crate::blocking::{BlockingDirectory, BlockingFile, BlockingFileXattr, BlockingFilesystem, BlockingFsXattr};
use crate::completion::{
    Complete, CompletionDirectory, CompletionFile, CompletionFileXattr, CompletionFilesystem, CompletionFsXattr,
};
use crate::directory::Directory;
use crate::file::File;
use crate::filesystem::Filesystem;
use crate::open_options::OpenOptions;
use crate::stat::{DirEntry, FileStat, FsStat};

/// Exports an async [`File`] as a [`BlockingFile`] usable from OS threads.
pub fn export_file<F: File>(file: F, handle: Handle) -> ExportedFile<LiftedFile<F>> {
    ExportedFile::new(LiftedFile::new(file, handle))
}

/// Exports an async [`Directory`] as a [`BlockingDirectory`].
pub fn export_dir<D: Directory>(dir: D, handle: Handle) -> ExportedDirectory<LiftedDirectory<D>> {
    ExportedDirectory::new(LiftedDirectory::new(dir, handle))
}

/// Exports an async [`Filesystem`] as a [`BlockingFilesystem`]; file and
/// directory handles it opens come out exported the same way.
pub fn export_fs<S: Filesystem>(fs: S, handle: Handle) -> ExportedFilesystem<LiftedFilesystem<S>> {
    ExportedFilesystem::new(LiftedFilesystem::new(fs, handle))
}

/// Largest attribute value the export bridge will relay.
const XATTR_RELAY_MAX: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Lifting: async contract -> completion contract
// ---------------------------------------------------------------------------

/// A [`CompletionFile`] over any async [`File`], completing via tasks spawned
/// on a runtime handle.
pub struct LiftedFile<F> {
    inner: Arc<tokio::sync::Mutex<F>>,
    handle: Handle,
    has_xattr: bool,
}

impl<F: File> LiftedFile<F> {
    /// Lifts `file`; operations run as tasks on `handle`'s runtime.
    pub fn new(file: F, handle: Handle) -> Self {
        let has_xattr = file.supports_xattr();
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(file)),
            handle,
            has_xattr,
        }
    }

    fn spawn<T, Fut>(&self, op: impl FnOnce(Arc<tokio::sync::Mutex<F>>) -> Fut + Send + 'static, done: Complete<T>)
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = self.handle.spawn(async move {
            done(op(inner).await);
        });
        drop(task);
    }
}

impl<F: File> CompletionFile for LiftedFile<F> {
    fn read(&self, len: usize, done: Complete<io::Result<Vec<u8>>>) {
        self.spawn(
            move |inner| async move {
                let mut buf = vec![0u8; len];
                let n = inner.lock().await.read(&mut buf).await?;
                buf.truncate(n);
                Ok(buf)
            },
            done,
        );
    }

    fn write(&self, data: Vec<u8>, done: Complete<io::Result<usize>>) {
        self.spawn(move |inner| async move { inner.lock().await.write(&data).await }, done);
    }

    fn read_at(&self, offset: u64, len: usize, done: Complete<io::Result<Vec<u8>>>) {
        self.spawn(
            move |inner| async move {
                let mut buf = vec![0u8; len];
                let n = inner.lock().await.read_at(offset, &mut buf).await?;
                buf.truncate(n);
                Ok(buf)
            },
            done,
        );
    }

    fn write_at(&self, offset: u64, data: Vec<u8>, done: Complete<io::Result<usize>>) {
        self.spawn(move |inner| async move { inner.lock().await.write_at(offset, &data).await }, done);
    }

    fn seek(&self, pos: SeekFrom, done: Complete<io::Result<u64>>) {
        self.spawn(move |inner| async move { inner.lock().await.seek(pos).await }, done);
    }

    fn metadata(&self, done: Complete<io::Result<FileStat>>) {
        self.spawn(move |inner| async move { inner.lock().await.metadata().await }, done);
    }

    fn sync_all(&self, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.sync_all().await }, done);
    }

    fn sync_data(&self, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.sync_data().await }, done);
    }

    fn sync_range(&self, offset: u64, len: u64, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.sync_range(offset, len).await }, done);
    }

    fn set_permissions(&self, mode: u32, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.set_permissions(mode).await }, done);
    }

    fn set_owner(&self, uid: u32, gid: u32, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.set_owner(uid, gid).await }, done);
    }

    fn set_len(&self, len: u64, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.set_len(len).await }, done);
    }

    fn allocate(&self, mode: u32, offset: u64, len: u64, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.allocate(mode, offset, len).await }, done);
    }

    fn close(&self, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.close().await }, done);
    }

    fn as_xattr(&self) -> Option<&dyn CompletionFileXattr> {
        if self.has_xattr { Some(self) } else { None }
    }
}

impl<F: File> CompletionFileXattr for LiftedFile<F> {
    fn get_xattr(&self, name: &str, done: Complete<io::Result<Vec<u8>>>) {
        let name = name.to_owned();
        self.spawn(
            move |inner| async move {
                let mut value = vec![0u8; XATTR_RELAY_MAX];
                let n = inner.lock().await.get_xattr(&name, &mut value).await?;
                value.truncate(n);
                Ok(value)
            },
            done,
        );
    }

    fn list_xattr(&self, done: Complete<io::Result<Vec<u8>>>) {
        self.spawn(
            move |inner| async move {
                let mut list = vec![0u8; XATTR_RELAY_MAX];
                let n = inner.lock().await.list_xattr(&mut list).await?;
                list.truncate(n);
                Ok(list)
            },
            done,
        );
    }

    fn set_xattr(&self, name: &str, value: Vec<u8>, flags: u32, done: Complete<io::Result<()>>) {
        let name = name.to_owned();
        self.spawn(move |inner| async move { inner.lock().await.set_xattr(&name, &value, flags).await }, done);
    }

    fn remove_xattr(&self, name: &str, done: Complete<io::Result<()>>) {
        let name = name.to_owned();
        self.spawn(move |inner| async move { inner.lock().await.remove_xattr(&name).await }, done);
    }
}

/// A [`CompletionDirectory`] over any async [`Directory`].
pub struct LiftedDirectory<D> {
    inner: Arc<tokio::sync::Mutex<D>>,
    handle: Handle,
}

impl<D: Directory> LiftedDirectory<D> {
    /// Lifts `dir`; operations run as tasks on `handle`'s runtime.
    pub fn new(dir: D, handle: Handle) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(dir)),
            handle,
        }
    }

    fn spawn<T, Fut>(&self, op: impl FnOnce(Arc<tokio::sync::Mutex<D>>) -> Fut + Send + 'static, done: Complete<T>)
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = self.handle.spawn(async move {
            done(op(inner).await);
        });
        drop(task);
    }
}

impl<D: Directory> CompletionDirectory for LiftedDirectory<D> {
    fn entry(&self, done: Complete<Option<DirEntry>>) {
        self.spawn(move |inner| async move { inner.lock().await.entry().await }, done);
    }

    fn advance(&self, done: Complete<bool>) {
        self.spawn(move |inner| async move { inner.lock().await.advance().await }, done);
    }

    fn rewind(&self, done: Complete<()>) {
        self.spawn(move |inner| async move { inner.lock().await.rewind().await }, done);
    }

    fn seek_to(&self, pos: u64, done: Complete<()>) {
        self.spawn(move |inner| async move { inner.lock().await.seek_to(pos).await }, done);
    }

    fn tell(&self, done: Complete<u64>) {
        self.spawn(move |inner| async move { inner.lock().await.tell().await }, done);
    }

    fn close(&self, done: Complete<io::Result<()>>) {
        self.spawn(move |inner| async move { inner.lock().await.close().await }, done);
    }
}

/// A [`CompletionFilesystem`] over any async [`Filesystem`].
pub struct LiftedFilesystem<S> {
    inner: Arc<S>,
    handle: Handle,
    has_xattr: bool,
}

impl<S: Filesystem> LiftedFilesystem<S> {
    /// Lifts `fs`; operations run as tasks on `handle`'s runtime, and handles
    /// it opens are lifted onto the same runtime.
    pub fn new(fs: S, handle: Handle) -> Self {
        let has_xattr = fs.supports_xattr();
        Self {
            inner: Arc::new(fs),
            handle,
            has_xattr,
        }
    }

    fn spawn<T, Fut>(&self, op: impl FnOnce(Arc<S>, Handle) -> Fut + Send + 'static, done: Complete<T>)
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = self.handle.clone();
        let task = self.handle.spawn(async move {
            done(op(inner, handle).await);
        });
        drop(task);
    }
}

impl<S: Filesystem> CompletionFilesystem for LiftedFilesystem<S> {
    type File = LiftedFile<S::File>;
    type Dir = LiftedDirectory<S::Dir>;

    fn open(&self, path: &Path, opts: OpenOptions, done: Complete<io::Result<Self::File>>) {
        let path = path.to_owned();
        self.spawn(
            move |inner, handle| async move {
                let file = inner.open(&path, opts).await?;
                Ok(LiftedFile::new(file, handle))
            },
            done,
        );
    }

    fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32, done: Complete<io::Result<Self::File>>) {
        let path = path.to_owned();
        self.spawn(
            move |inner, handle| async move {
                let file = inner.open_with_mode(&path, opts, mode).await?;
                Ok(LiftedFile::new(file, handle))
            },
            done,
        );
    }

    fn create(&self, path: &Path, mode: u32, done: Complete<io::Result<Self::File>>) {
        let path = path.to_owned();
        self.spawn(
            move |inner, handle| async move {
                let file = inner.create(&path, mode).await?;
                Ok(LiftedFile::new(file, handle))
            },
            done,
        );
    }

    fn create_dir(&self, path: &Path, mode: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.create_dir(&path, mode).await }, done);
    }

    fn remove_dir(&self, path: &Path, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.remove_dir(&path).await }, done);
    }

    fn symlink(&self, target: &Path, link: &Path, done: Complete<io::Result<()>>) {
        let target = target.to_owned();
        let link = link.to_owned();
        self.spawn(move |inner, _| async move { inner.symlink(&target, &link).await }, done);
    }

    fn read_link(&self, path: &Path, done: Complete<io::Result<PathBuf>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.read_link(&path).await }, done);
    }

    fn hard_link(&self, original: &Path, link: &Path, done: Complete<io::Result<()>>) {
        let original = original.to_owned();
        let link = link.to_owned();
        self.spawn(move |inner, _| async move { inner.hard_link(&original, &link).await }, done);
    }

    fn rename(&self, from: &Path, to: &Path, done: Complete<io::Result<()>>) {
        let from = from.to_owned();
        let to = to.to_owned();
        self.spawn(move |inner, _| async move { inner.rename(&from, &to).await }, done);
    }

    fn remove_file(&self, path: &Path, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.remove_file(&path).await }, done);
    }

    fn set_permissions(&self, path: &Path, mode: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.set_permissions(&path, mode).await }, done);
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.set_owner(&path, uid, gid).await }, done);
    }

    fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.set_symlink_owner(&path, uid, gid).await }, done);
    }

    fn open_dir(&self, path: &Path, done: Complete<io::Result<Self::Dir>>) {
        let path = path.to_owned();
        self.spawn(
            move |inner, handle| async move {
                let dir = inner.open_dir(&path).await?;
                Ok(LiftedDirectory::new(dir, handle))
            },
            done,
        );
    }

    fn metadata(&self, path: &Path, done: Complete<io::Result<FileStat>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.metadata(&path).await }, done);
    }

    fn symlink_metadata(&self, path: &Path, done: Complete<io::Result<FileStat>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.symlink_metadata(&path).await }, done);
    }

    fn access(&self, path: &Path, mode: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.access(&path, mode).await }, done);
    }

    fn truncate(&self, path: &Path, len: u64, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.truncate(&path, len).await }, done);
    }

    fn sync(&self, done: Complete<io::Result<()>>) {
        self.spawn(move |inner, _| async move { inner.sync().await }, done);
    }

    fn statfs(&self, path: &Path, done: Complete<io::Result<FsStat>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.statfs(&path).await }, done);
    }

    fn statvfs(&self, path: &Path, done: Complete<io::Result<FsStat>>) {
        let path = path.to_owned();
        self.spawn(move |inner, _| async move { inner.statvfs(&path).await }, done);
    }

    fn as_xattr(&self) -> Option<&dyn CompletionFsXattr> {
        if self.has_xattr { Some(self) } else { None }
    }
}

impl<S: Filesystem> CompletionFsXattr for LiftedFilesystem<S> {
    fn get_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<Vec<u8>>>) {
        let path = path.to_owned();
        let name = name.to_owned();
        self.spawn(
            move |inner, _| async move {
                let mut value = vec![0u8; XATTR_RELAY_MAX];
                let n = inner.get_xattr(&path, &name, &mut value).await?;
                value.truncate(n);
                Ok(value)
            },
            done,
        );
    }

    fn lget_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<Vec<u8>>>) {
        let path = path.to_owned();
        let name = name.to_owned();
        self.spawn(
            move |inner, _| async move {
                let mut value = vec![0u8; XATTR_RELAY_MAX];
                let n = inner.lget_xattr(&path, &name, &mut value).await?;
                value.truncate(n);
                Ok(value)
            },
            done,
        );
    }

    fn list_xattr(&self, path: &Path, done: Complete<io::Result<Vec<u8>>>) {
        let path = path.to_owned();
        self.spawn(
            move |inner, _| async move {
                let mut list = vec![0u8; XATTR_RELAY_MAX];
                let n = inner.list_xattr(&path, &mut list).await?;
                list.truncate(n);
                Ok(list)
            },
            done,
        );
    }

    fn llist_xattr(&self, path: &Path, done: Complete<io::Result<Vec<u8>>>) {
        let path = path.to_owned();
        self.spawn(
            move |inner, _| async move {
                let mut list = vec![0u8; XATTR_RELAY_MAX];
                let n = inner.llist_xattr(&path, &mut list).await?;
                list.truncate(n);
                Ok(list)
            },
            done,
        );
    }

    fn set_xattr(&self, path: &Path, name: &str, value: Vec<u8>, flags: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        let name = name.to_owned();
        self.spawn(move |inner, _| async move { inner.set_xattr(&path, &name, &value, flags).await }, done);
    }

    fn lset_xattr(&self, path: &Path, name: &str, value: Vec<u8>, flags: u32, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        let name = name.to_owned();
        self.spawn(move |inner, _| async move { inner.lset_xattr(&path, &name, &value, flags).await }, done);
    }

    fn remove_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        let name = name.to_owned();
        self.spawn(move |inner, _| async move { inner.remove_xattr(&path, &name).await }, done);
    }

    fn lremove_xattr(&self, path: &Path, name: &str, done: Complete<io::Result<()>>) {
        let path = path.to_owned();
        let name = name.to_owned();
        self.spawn(move |inner, _| async move { inner.lremove_xattr(&path, &name).await }, done);
    }
}

// ---------------------------------------------------------------------------
// Exporting: completion contract -> blocking contract
// ---------------------------------------------------------------------------

/// Parks an OS thread until a completion callback delivers the result.
struct Waiter<T> {
    shared: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T: Send + 'static> Waiter<T> {
    fn new() -> Self {
        Self {
            shared: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    fn complete(&self) -> Complete<T> {
        let shared = Arc::clone(&self.shared);
        Box::new(move |value| {
            let (slot, signal) = &*shared;
            *slot.lock().expect("export waiter poisoned") = Some(value);
            signal.notify_all();
        })
    }

    fn wait(self) -> T {
        let (slot, signal) = &*self.shared;
        let mut guard = slot.lock().expect("export waiter poisoned");
        loop {
            if let Some(value) = guard.take() {
                return value;
            }
            guard = signal.wait(guard).expect("export waiter poisoned");
        }
    }
}

/// Runs one completion operation to its blocking conclusion.
fn block_on_completion<T: Send + 'static>(invoke: impl FnOnce(Complete<T>)) -> T {
    let waiter = Waiter::new();
    invoke(waiter.complete());
    waiter.wait()
}

/// A [`BlockingFile`] over any [`CompletionFile`], for callers on OS threads.
pub struct ExportedFile<U> {
    uif: U,
    has_xattr: bool,
}

impl<U: CompletionFile> ExportedFile<U> {
    /// Wraps `uif`; every call blocks until its completion fires.
    pub fn new(uif: U) -> Self {
        let has_xattr = uif.as_xattr().is_some();
        Self { uif, has_xattr }
    }
}

impl<U: CompletionFile> BlockingFile for ExportedFile<U> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = block_on_completion(|done| self.uif.read(buf.len(), done))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let data = block_on_completion(|done| self.uif.read(total, done))?;
        Ok(scatter(&data, bufs))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        block_on_completion(|done| self.uif.write(buf.to_vec(), done))
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut data = Vec::with_capacity(bufs.iter().map(|b| b.len()).sum());
        for buf in bufs {
            data.extend_from_slice(buf);
        }
        block_on_completion(|done| self.uif.write(data, done))
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = block_on_completion(|done| self.uif.read_at(offset, buf.len(), done))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        block_on_completion(|done| self.uif.write_at(offset, buf.to_vec(), done))
    }

    fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let data = block_on_completion(|done| self.uif.read_at(offset, total, done))?;
        Ok(scatter(&data, bufs))
    }

    fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut data = Vec::with_capacity(bufs.iter().map(|b| b.len()).sum());
        for buf in bufs {
            data.extend_from_slice(buf);
        }
        block_on_completion(|done| self.uif.write_at(offset, data, done))
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        block_on_completion(|done| self.uif.seek(pos, done))
    }

    fn metadata(&self) -> io::Result<FileStat> {
        block_on_completion(|done| self.uif.metadata(done))
    }

    fn sync_all(&self) -> io::Result<()> {
        block_on_completion(|done| self.uif.sync_all(done))
    }

    fn sync_data(&self) -> io::Result<()> {
        block_on_completion(|done| self.uif.sync_data(done))
    }

    fn sync_range(&self, offset: u64, len: u64) -> io::Result<()> {
        block_on_completion(|done| self.uif.sync_range(offset, len, done))
    }

    fn set_permissions(&self, mode: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.set_permissions(mode, done))
    }

    fn set_owner(&self, uid: u32, gid: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.set_owner(uid, gid, done))
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        block_on_completion(|done| self.uif.set_len(len, done))
    }

    fn allocate(&self, mode: u32, offset: u64, len: u64) -> io::Result<()> {
        block_on_completion(|done| self.uif.allocate(mode, offset, len, done))
    }

    fn close(&mut self) -> io::Result<()> {
        block_on_completion(|done| self.uif.close(done))
    }

    fn as_xattr(&self) -> Option<&dyn BlockingFileXattr> {
        if self.has_xattr { Some(self) } else { None }
    }
}

impl<U: CompletionFile> BlockingFileXattr for ExportedFile<U> {
    fn get_xattr(&self, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let data = block_on_completion(|done| xattr.get_xattr(name, done))?;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn list_xattr(&self, list: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let data = block_on_completion(|done| xattr.list_xattr(done))?;
        let n = data.len().min(list.len());
        list[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        block_on_completion(|done| xattr.set_xattr(name, value.to_vec(), flags, done))
    }

    fn remove_xattr(&self, name: &str) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        block_on_completion(|done| xattr.remove_xattr(name, done))
    }
}

fn scatter(data: &[u8], bufs: &mut [IoSliceMut<'_>]) -> usize {
    let mut copied = 0;
    for buf in bufs {
        if copied == data.len() {
            break;
        }
        let take = buf.len().min(data.len() - copied);
        buf[..take].copy_from_slice(&data[copied..copied + take]);
        copied += take;
    }
    copied
}

/// A [`BlockingDirectory`] over any [`CompletionDirectory`].
pub struct ExportedDirectory<U> {
    uif: U,
}

impl<U: CompletionDirectory> ExportedDirectory<U> {
    /// Wraps `uif`; every call blocks until its completion fires.
    pub fn new(uif: U) -> Self {
        Self { uif }
    }
}

impl<U: CompletionDirectory> BlockingDirectory for ExportedDirectory<U> {
    fn entry(&self) -> Option<DirEntry> {
        block_on_completion(|done| self.uif.entry(done))
    }

    fn advance(&mut self) -> bool {
        block_on_completion(|done| self.uif.advance(done))
    }

    fn rewind(&mut self) {
        block_on_completion(|done| self.uif.rewind(done));
    }

    fn seek_to(&mut self, pos: u64) {
        block_on_completion(|done| self.uif.seek_to(pos, done));
    }

    fn tell(&self) -> u64 {
        block_on_completion(|done| self.uif.tell(done))
    }

    fn close(&mut self) -> io::Result<()> {
        block_on_completion(|done| self.uif.close(done))
    }
}

/// A [`BlockingFilesystem`] over any [`CompletionFilesystem`].
pub struct ExportedFilesystem<U> {
    uif: U,
    has_xattr: bool,
}

impl<U: CompletionFilesystem> ExportedFilesystem<U> {
    /// Wraps `uif`; every call blocks until its completion fires.
    pub fn new(uif: U) -> Self {
        let has_xattr = uif.as_xattr().is_some();
        Self { uif, has_xattr }
    }
}

impl<U: CompletionFilesystem> BlockingFilesystem for ExportedFilesystem<U> {
    type File = ExportedFile<U::File>;
    type Dir = ExportedDirectory<U::Dir>;

    fn open(&self, path: &Path, opts: OpenOptions) -> io::Result<Self::File> {
        let file = block_on_completion(|done| self.uif.open(path, opts, done))?;
        Ok(ExportedFile::new(file))
    }

    fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32) -> io::Result<Self::File> {
        let file = block_on_completion(|done| self.uif.open_with_mode(path, opts, mode, done))?;
        Ok(ExportedFile::new(file))
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<Self::File> {
        let file = block_on_completion(|done| self.uif.create(path, mode, done))?;
        Ok(ExportedFile::new(file))
    }

    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.create_dir(path, mode, done))
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        block_on_completion(|done| self.uif.remove_dir(path, done))
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        block_on_completion(|done| self.uif.symlink(target, link, done))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        block_on_completion(|done| self.uif.read_link(path, done))
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        block_on_completion(|done| self.uif.hard_link(original, link, done))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        block_on_completion(|done| self.uif.rename(from, to, done))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        block_on_completion(|done| self.uif.remove_file(path, done))
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.set_permissions(path, mode, done))
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.set_owner(path, uid, gid, done))
    }

    fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.set_symlink_owner(path, uid, gid, done))
    }

    fn open_dir(&self, path: &Path) -> io::Result<Self::Dir> {
        let dir = block_on_completion(|done| self.uif.open_dir(path, done))?;
        Ok(ExportedDirectory::new(dir))
    }

    fn metadata(&self, path: &Path) -> io::Result<FileStat> {
        block_on_completion(|done| self.uif.metadata(path, done))
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<FileStat> {
        block_on_completion(|done| self.uif.symlink_metadata(path, done))
    }

    fn access(&self, path: &Path, mode: u32) -> io::Result<()> {
        block_on_completion(|done| self.uif.access(path, mode, done))
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        block_on_completion(|done| self.uif.truncate(path, len, done))
    }

    fn sync(&self) -> io::Result<()> {
        block_on_completion(|done| self.uif.sync(done))
    }

    fn statfs(&self, path: &Path) -> io::Result<FsStat> {
        block_on_completion(|done| self.uif.statfs(path, done))
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsStat> {
        block_on_completion(|done| self.uif.statvfs(path, done))
    }

    fn as_xattr(&self) -> Option<&dyn BlockingFsXattr> {
        if self.has_xattr { Some(self) } else { None }
    }
}

impl<U: CompletionFilesystem> BlockingFsXattr for ExportedFilesystem<U> {
    fn get_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let data = block_on_completion(|done| xattr.get_xattr(path, name, done))?;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn lget_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let data = block_on_completion(|done| xattr.lget_xattr(path, name, done))?;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn list_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let data = block_on_completion(|done| xattr.list_xattr(path, done))?;
        let n = data.len().min(list.len());
        list[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn llist_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let data = block_on_completion(|done| xattr.llist_xattr(path, done))?;
        let n = data.len().min(list.len());
        list[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        block_on_completion(|done| xattr.set_xattr(path, name, value.to_vec(), flags, done))
    }

    fn lset_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        block_on_completion(|done| xattr.lset_xattr(path, name, value.to_vec(), flags, done))
    }

    fn remove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        block_on_completion(|done| xattr.remove_xattr(path, name, done))
    }

    fn lremove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        block_on_completion(|done| xattr.lremove_xattr(path, name, done))
    }
}
