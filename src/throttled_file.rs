// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, IoSlice, IoSliceMut, SeekFrom};

use async_trait::async_trait;

use crate::file::File;
use crate::split::{IovWindow, IovWindowMut};
use crate::throttle::{Throttle, ThrottleLimits, ThrottleScope};
use crate::stat::FileStat;

/// Enforces per-file rate limits over any [`File`].
///
/// Each data operation holds a presence in three accounting bundles — its
/// direction (read or write), and the combined read+write bundle — covering
/// concurrency, IOPS, and bytes per second, and is split into sub-operations
/// of at most the direction's `block_size`. Reads and writes only interact
/// through the combined bundle. Everything that moves no data (seek, stat,
/// sync, truncate, attributes) passes through untouched.
///
/// The accounting structures belong to this value, so callers sharing one
/// throttled file through `Arc` (positional operations take `&self`) share
/// its quotas; two separately-wrapped files do not interact.
///
/// ```no_run
/// use sluice::{ThrottleLimits, ThrottledFile, UpperLimits};
///
/// # fn limits_for(file: impl sluice::File) {
/// let limits = ThrottleLimits {
///     read: UpperLimits { throughput: 16 << 20, block_size: 1 << 20, ..Default::default() },
///     ..Default::default()
/// };
/// let throttled = ThrottledFile::new(file, limits);
/// # }
/// ```
pub struct ThrottledFile<F> {
    file: F,
    limits: ThrottleLimits,
    combined: Throttle,
    reads: Throttle,
    writes: Throttle,
}

impl<F: File> ThrottledFile<F> {
    /// Decorates `file` with `limits`.
    pub fn new(file: F, limits: ThrottleLimits) -> Self {
        Self {
            combined: Throttle::new(&limits.rw, limits.window_secs),
            reads: Throttle::new(&limits.read, limits.window_secs),
            writes: Throttle::new(&limits.write, limits.window_secs),
            file,
            limits,
        }
    }

    /// The configured limits.
    #[must_use]
    pub fn limits(&self) -> &ThrottleLimits {
        &self.limits
    }

    /// The decorated file.
    pub fn get_ref(&self) -> &F {
        &self.file
    }

    /// Unwraps the decorated file, discarding the accounting state.
    pub fn into_inner(self) -> F {
        self.file
    }
}

fn block_limit(block_size: u64) -> usize {
    usize::try_from(block_size).unwrap_or(usize::MAX)
}

#[async_trait]
impl<F: File> File for ThrottledFile<F> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let this = &mut *self;
        let scope = ThrottleScope::enter(&this.combined, &this.reads, buf.len() as u64).await;
        let file = &mut this.file;
        let block_size = block_limit(this.limits.read.block_size);
        let count = buf.len();
        let result = if block_size == 0 || count <= block_size {
            file.read(buf).await
        } else {
            let mut pos = 0usize;
            let mut transferred = 0usize;
            let mut remaining = count;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                match file.read(&mut buf[pos..pos + len]).await {
                    Ok(n) => {
                        pos += n;
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let this = &mut *self;
        let mut cursor = IovWindowMut::new(bufs);
        let total = cursor.total();
        let scope = ThrottleScope::enter(&this.combined, &this.reads, total as u64).await;
        let file = &mut this.file;
        let block_size = block_limit(this.limits.read.block_size);
        let result = if block_size == 0 || total <= block_size {
            let mut view = cursor.window(total);
            let res = file.read_vectored(&mut view).await;
            drop(view);
            if let Ok(n) = res {
                cursor.advance(n);
            }
            res
        } else {
            let mut transferred = 0usize;
            let mut remaining = total;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                let mut view = cursor.window(len);
                let res = file.read_vectored(&mut view).await;
                drop(view);
                match res {
                    Ok(n) => {
                        cursor.advance(n);
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let this = &mut *self;
        let scope = ThrottleScope::enter(&this.combined, &this.writes, buf.len() as u64).await;
        let file = &mut this.file;
        let block_size = block_limit(this.limits.write.block_size);
        let count = buf.len();
        let result = if block_size == 0 || count <= block_size {
            file.write(buf).await
        } else {
            let mut pos = 0usize;
            let mut transferred = 0usize;
            let mut remaining = count;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                match file.write(&buf[pos..pos + len]).await {
                    Ok(n) => {
                        pos += n;
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let this = &mut *self;
        let mut cursor = IovWindow::new(bufs);
        let total = cursor.total();
        let scope = ThrottleScope::enter(&this.combined, &this.writes, total as u64).await;
        let file = &mut this.file;
        let block_size = block_limit(this.limits.write.block_size);
        let result = if block_size == 0 || total <= block_size {
            let view = cursor.window(total);
            let res = file.write_vectored(&view).await;
            drop(view);
            if let Ok(n) = res {
                cursor.advance(n);
            }
            res
        } else {
            let mut transferred = 0usize;
            let mut remaining = total;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                let view = cursor.window(len);
                let res = file.write_vectored(&view).await;
                drop(view);
                match res {
                    Ok(n) => {
                        cursor.advance(n);
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let scope = ThrottleScope::enter(&self.combined, &self.reads, buf.len() as u64).await;
        let block_size = block_limit(self.limits.read.block_size);
        let count = buf.len();
        let result = if block_size == 0 || count <= block_size {
            self.file.read_at(offset, buf).await
        } else {
            let mut pos = 0usize;
            let mut transferred = 0usize;
            let mut remaining = count;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                match self.file.read_at(offset + pos as u64, &mut buf[pos..pos + len]).await {
                    Ok(n) => {
                        pos += n;
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let scope = ThrottleScope::enter(&self.combined, &self.writes, buf.len() as u64).await;
        let block_size = block_limit(self.limits.write.block_size);
        let count = buf.len();
        let result = if block_size == 0 || count <= block_size {
            self.file.write_at(offset, buf).await
        } else {
            let mut pos = 0usize;
            let mut transferred = 0usize;
            let mut remaining = count;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                match self.file.write_at(offset + pos as u64, &buf[pos..pos + len]).await {
                    Ok(n) => {
                        pos += n;
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let mut cursor = IovWindowMut::new(bufs);
        let total = cursor.total();
        let scope = ThrottleScope::enter(&self.combined, &self.reads, total as u64).await;
        let block_size = block_limit(self.limits.read.block_size);
        let result = if block_size == 0 || total <= block_size {
            let mut view = cursor.window(total);
            let res = self.file.read_vectored_at(offset, &mut view).await;
            drop(view);
            if let Ok(n) = res {
                cursor.advance(n);
            }
            res
        } else {
            let mut pos = 0u64;
            let mut transferred = 0usize;
            let mut remaining = total;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                let mut view = cursor.window(len);
                let res = self.file.read_vectored_at(offset + pos, &mut view).await;
                drop(view);
                match res {
                    Ok(n) => {
                        cursor.advance(n);
                        pos += n as u64;
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut cursor = IovWindow::new(bufs);
        let total = cursor.total();
        let scope = ThrottleScope::enter(&self.combined, &self.writes, total as u64).await;
        let block_size = block_limit(self.limits.write.block_size);
        let result = if block_size == 0 || total <= block_size {
            let view = cursor.window(total);
            let res = self.file.write_vectored_at(offset, &view).await;
            drop(view);
            if let Ok(n) = res {
                cursor.advance(n);
            }
            res
        } else {
            let mut pos = 0u64;
            let mut transferred = 0usize;
            let mut remaining = total;
            loop {
                if remaining == 0 {
                    break Ok(transferred);
                }
                let len = remaining.min(block_size);
                let view = cursor.window(len);
                let res = self.file.write_vectored_at(offset + pos, &view).await;
                drop(view);
                match res {
                    Ok(n) => {
                        cursor.advance(n);
                        pos += n as u64;
                        transferred += n;
                        remaining -= n.min(remaining);
                        if n < len {
                            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
                            break Ok(transferred);
                        }
                    }
                    Err(e) => break Err(e),
                }
            }
        };
        scope.exit().await;
        result
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos).await
    }

    async fn metadata(&self) -> io::Result<FileStat> {
        self.file.metadata().await
    }

    async fn sync_all(&self) -> io::Result<()> {
        self.file.sync_all().await
    }

    async fn sync_data(&self) -> io::Result<()> {
        self.file.sync_data().await
    }

    async fn sync_range(&self, offset: u64, len: u64) -> io::Result<()> {
        self.file.sync_range(offset, len).await
    }

    async fn set_permissions(&self, mode: u32) -> io::Result<()> {
        self.file.set_permissions(mode).await
    }

    async fn set_owner(&self, uid: u32, gid: u32) -> io::Result<()> {
        self.file.set_owner(uid, gid).await
    }

    async fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len).await
    }

    async fn allocate(&self, mode: u32, offset: u64, len: u64) -> io::Result<()> {
        self.file.allocate(mode, offset, len).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.close().await
    }

    fn supports_xattr(&self) -> bool {
        self.file.supports_xattr()
    }

    async fn get_xattr(&self, name: &str, value: &mut [u8]) -> io::Result<usize> {
        self.file.get_xattr(name, value).await
    }

    async fn list_xattr(&self, list: &mut [u8]) -> io::Result<usize> {
        self.file.list_xattr(list).await
    }

    async fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        self.file.set_xattr(name, value, flags).await
    }

    async fn remove_xattr(&self, name: &str) -> io::Result<()> {
        self.file.remove_xattr(name).await
    }
}
