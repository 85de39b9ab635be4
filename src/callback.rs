// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapters over completion-callback underlays.
//!
//! Each operation arms a oneshot channel, hands its sender to the underlay as
//! the completion callback, and awaits the receiver under the adapter's
//! configured timeout. On expiry the operation fails with
//! [`io::ErrorKind::TimedOut`]; the eventual completion, if any, lands in a
//! dropped channel and is discarded. Because a late completion can fire
//! arbitrarily long after the caller has moved on, all data crosses this
//! boundary in owned buffers (see [`crate::completion`]); slice-based
//! operations copy at the edge.

use std::io::{self, Error, ErrorKind, IoSlice, IoSliceMut, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::completion::{Complete, CompletionDirectory, CompletionFile, CompletionFilesystem};
use crate::directory::Directory;
use crate::file::File;
use crate::filesystem::Filesystem;
use crate::open_options::OpenOptions;
use crate::stat::{DirEntry, FileStat, FsStat};

/// Wraps a [`CompletionFile`] into the async [`File`] contract.
///
/// `timeout` bounds every operation; `None` waits forever.
pub struct CallbackFile<U> {
    uif: U,
    timeout: Option<Duration>,
    has_xattr: bool,
}

impl<U: CompletionFile> CallbackFile<U> {
    /// Wraps `uif` with a per-operation timeout (`None` = wait forever).
    pub fn new(uif: U, timeout: Option<Duration>) -> Self {
        let has_xattr = uif.as_xattr().is_some();
        Self { uif, timeout, has_xattr }
    }

    /// The wrapped underlay object.
    pub fn underlay(&self) -> &U {
        &self.uif
    }

    async fn finish<T>(&self, rx: oneshot::Receiver<T>) -> io::Result<T> {
        finish(self.timeout, rx).await
    }
}

/// Packages a oneshot sender as a completion callback.
fn armed<T: Send + 'static>() -> (Complete<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Box::new(move |value| {
            let _ = tx.send(value);
        }),
        rx,
    )
}

async fn finish<T>(timeout: Option<Duration>, rx: oneshot::Receiver<T>) -> io::Result<T> {
    let received = match timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(received) => received,
            Err(_) => return Err(Error::from(ErrorKind::TimedOut)),
        },
        None => rx.await,
    };
    received.map_err(|_| Error::other("completion callback dropped without firing"))
}

/// Copies `data` across the scatter list, returning the bytes copied.
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

/// Concatenates a gather list into one owned buffer.
fn gather(bufs: &[IoSlice<'_>]) -> Vec<u8> {
    let mut data = Vec::with_capacity(bufs.iter().map(|b| b.len()).sum());
    for buf in bufs {
        data.extend_from_slice(buf);
    }
    data
}

#[async_trait]
impl<U: CompletionFile> File for CallbackFile<U> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (done, rx) = armed();
        self.uif.read(buf.len(), done);
        let data = self.finish(rx).await??;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let (done, rx) = armed();
        self.uif.read(total, done);
        let data = self.finish(rx).await??;
        Ok(scatter(&data, bufs))
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (done, rx) = armed();
        self.uif.write(buf.to_vec(), done);
        self.finish(rx).await?
    }

    async fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let (done, rx) = armed();
        self.uif.write(gather(bufs), done);
        self.finish(rx).await?
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let (done, rx) = armed();
        self.uif.read_at(offset, buf.len(), done);
        let data = self.finish(rx).await??;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let (done, rx) = armed();
        self.uif.write_at(offset, buf.to_vec(), done);
        self.finish(rx).await?
    }

    async fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let (done, rx) = armed();
        self.uif.read_at(offset, total, done);
        let data = self.finish(rx).await??;
        Ok(scatter(&data, bufs))
    }

    async fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let (done, rx) = armed();
        self.uif.write_at(offset, gather(bufs), done);
        self.finish(rx).await?
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (done, rx) = armed();
        self.uif.seek(pos, done);
        self.finish(rx).await?
    }

    async fn metadata(&self) -> io::Result<FileStat> {
        let (done, rx) = armed();
        self.uif.metadata(done);
        self.finish(rx).await?
    }

    async fn sync_all(&self) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.sync_all(done);
        self.finish(rx).await?
    }

    async fn sync_data(&self) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.sync_data(done);
        self.finish(rx).await?
    }

    async fn sync_range(&self, offset: u64, len: u64) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.sync_range(offset, len, done);
        self.finish(rx).await?
    }

    async fn set_permissions(&self, mode: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.set_permissions(mode, done);
        self.finish(rx).await?
    }

    async fn set_owner(&self, uid: u32, gid: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.set_owner(uid, gid, done);
        self.finish(rx).await?
    }

    async fn set_len(&self, len: u64) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.set_len(len, done);
        self.finish(rx).await?
    }

    async fn allocate(&self, mode: u32, offset: u64, len: u64) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.allocate(mode, offset, len, done);
        self.finish(rx).await?
    }

    async fn close(&mut self) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.close(done);
        self.finish(rx).await?
    }

    fn supports_xattr(&self) -> bool {
        self.has_xattr
    }

    async fn get_xattr(&self, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.get_xattr(name, done);
        let data = self.finish(rx).await??;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn list_xattr(&self, list: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.list_xattr(done);
        let data = self.finish(rx).await??;
        let n = data.len().min(list.len());
        list[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.set_xattr(name, value.to_vec(), flags, done);
        self.finish(rx).await?
    }

    async fn remove_xattr(&self, name: &str) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.remove_xattr(name, done);
        self.finish(rx).await?
    }
}

/// Wraps a [`CompletionDirectory`] into the async [`Directory`] contract.
///
/// Operations whose contract has no error channel degrade on timeout the way
/// a failed `readdir` does: `entry` yields `None`, `advance` yields `false`,
/// positions come back as zero.
pub struct CallbackDirectory<U> {
    uif: U,
    timeout: Option<Duration>,
}

impl<U: CompletionDirectory> CallbackDirectory<U> {
    /// Wraps `uif` with a per-operation timeout (`None` = wait forever).
    pub fn new(uif: U, timeout: Option<Duration>) -> Self {
        Self { uif, timeout }
    }

    /// The wrapped underlay object.
    pub fn underlay(&self) -> &U {
        &self.uif
    }
}

#[async_trait]
impl<U: CompletionDirectory> Directory for CallbackDirectory<U> {
    async fn entry(&self) -> Option<DirEntry> {
        let (done, rx) = armed();
        self.uif.entry(done);
        finish(self.timeout, rx).await.ok().flatten()
    }

    async fn advance(&mut self) -> bool {
        let (done, rx) = armed();
        self.uif.advance(done);
        finish(self.timeout, rx).await.unwrap_or(false)
    }

    async fn rewind(&mut self) {
        let (done, rx) = armed();
        self.uif.rewind(done);
        let _ = finish(self.timeout, rx).await;
    }

    async fn seek_to(&mut self, pos: u64) {
        let (done, rx) = armed();
        self.uif.seek_to(pos, done);
        let _ = finish(self.timeout, rx).await;
    }

    async fn tell(&self) -> u64 {
        let (done, rx) = armed();
        self.uif.tell(done);
        finish(self.timeout, rx).await.unwrap_or(0)
    }

    async fn close(&mut self) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.close(done);
        finish(self.timeout, rx).await?
    }
}

/// Wraps a [`CompletionFilesystem`] into the async [`Filesystem`] contract.
pub struct CallbackFilesystem<U> {
    uif: U,
    timeout: Option<Duration>,
    has_xattr: bool,
}

impl<U: CompletionFilesystem> CallbackFilesystem<U> {
    /// Wraps `uif` with a per-operation timeout (`None` = wait forever).
    ///
    /// Handles the filesystem produces inherit the same timeout.
    pub fn new(uif: U, timeout: Option<Duration>) -> Self {
        let has_xattr = uif.as_xattr().is_some();
        Self { uif, timeout, has_xattr }
    }

    /// The wrapped underlay object.
    pub fn underlay(&self) -> &U {
        &self.uif
    }

    async fn finish<T>(&self, rx: oneshot::Receiver<T>) -> io::Result<T> {
        finish(self.timeout, rx).await
    }
}

#[async_trait]
impl<U: CompletionFilesystem> Filesystem for CallbackFilesystem<U> {
    type File = CallbackFile<U::File>;
    type Dir = CallbackDirectory<U::Dir>;

    async fn open(&self, path: &Path, opts: OpenOptions) -> io::Result<Self::File> {
        let (done, rx) = armed();
        self.uif.open(path, opts, done);
        let file = self.finish(rx).await??;
        Ok(CallbackFile::new(file, self.timeout))
    }

    async fn open_with_mode(&self, path: &Path, opts: OpenOptions, mode: u32) -> io::Result<Self::File> {
        let (done, rx) = armed();
        self.uif.open_with_mode(path, opts, mode, done);
        let file = self.finish(rx).await??;
        Ok(CallbackFile::new(file, self.timeout))
    }

    async fn create(&self, path: &Path, mode: u32) -> io::Result<Self::File> {
        let (done, rx) = armed();
        self.uif.create(path, mode, done);
        let file = self.finish(rx).await??;
        Ok(CallbackFile::new(file, self.timeout))
    }

    async fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.create_dir(path, mode, done);
        self.finish(rx).await?
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.remove_dir(path, done);
        self.finish(rx).await?
    }

    async fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.symlink(target, link, done);
        self.finish(rx).await?
    }

    async fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let (done, rx) = armed();
        self.uif.read_link(path, done);
        self.finish(rx).await?
    }

    async fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.hard_link(original, link, done);
        self.finish(rx).await?
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.rename(from, to, done);
        self.finish(rx).await?
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.remove_file(path, done);
        self.finish(rx).await?
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.set_permissions(path, mode, done);
        self.finish(rx).await?
    }

    async fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.set_owner(path, uid, gid, done);
        self.finish(rx).await?
    }

    async fn set_symlink_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.set_symlink_owner(path, uid, gid, done);
        self.finish(rx).await?
    }

    async fn open_dir(&self, path: &Path) -> io::Result<Self::Dir> {
        let (done, rx) = armed();
        self.uif.open_dir(path, done);
        let dir = self.finish(rx).await??;
        Ok(CallbackDirectory::new(dir, self.timeout))
    }

    async fn metadata(&self, path: &Path) -> io::Result<FileStat> {
        let (done, rx) = armed();
        self.uif.metadata(path, done);
        self.finish(rx).await?
    }

    async fn symlink_metadata(&self, path: &Path) -> io::Result<FileStat> {
        let (done, rx) = armed();
        self.uif.symlink_metadata(path, done);
        self.finish(rx).await?
    }

    async fn access(&self, path: &Path, mode: u32) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.access(path, mode, done);
        self.finish(rx).await?
    }

    async fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.truncate(path, len, done);
        self.finish(rx).await?
    }

    async fn sync(&self) -> io::Result<()> {
        let (done, rx) = armed();
        self.uif.sync(done);
        self.finish(rx).await?
    }

    async fn statfs(&self, path: &Path) -> io::Result<FsStat> {
        let (done, rx) = armed();
        self.uif.statfs(path, done);
        self.finish(rx).await?
    }

    async fn statvfs(&self, path: &Path) -> io::Result<FsStat> {
        let (done, rx) = armed();
        self.uif.statvfs(path, done);
        self.finish(rx).await?
    }

    fn supports_xattr(&self) -> bool {
        self.has_xattr
    }

    async fn get_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.get_xattr(path, name, done);
        let data = self.finish(rx).await??;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn lget_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.lget_xattr(path, name, done);
        let data = self.finish(rx).await??;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn list_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.list_xattr(path, done);
        let data = self.finish(rx).await??;
        let n = data.len().min(list.len());
        list[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn llist_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.llist_xattr(path, done);
        let data = self.finish(rx).await??;
        let n = data.len().min(list.len());
        list[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn set_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.set_xattr(path, name, value.to_vec(), flags, done);
        self.finish(rx).await?
    }

    async fn lset_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.lset_xattr(path, name, value.to_vec(), flags, done);
        self.finish(rx).await?
    }

    async fn remove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.remove_xattr(path, name, done);
        self.finish(rx).await?
    }

    async fn lremove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        let xattr = self.uif.as_xattr().ok_or_else(crate::xattr_unsupported)?;
        let (done, rx) = armed();
        xattr.lremove_xattr(path, name, done);
        self.finish(rx).await?
    }
}
