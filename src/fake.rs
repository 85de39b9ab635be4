// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory underlay implementations, instrumented for tests and examples.
//! Not for real IO.

use std::collections::HashMap;
use std::io::{self, IoSlice, IoSliceMut, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::blocking::{
    BlockingDirectory, BlockingFile, BlockingFileXattr, BlockingFilesystem, BlockingFsXattr,
};
use crate::completion::{Complete, CompletionFile, CompletionFileXattr};
use crate::file::File;
use crate::open_options::OpenOptions;
use crate::stat::{DirEntry, FileKind, FileStat, FsStat};

/// One recorded call against a fake blocking file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeCall {
    /// Streaming read of `len` bytes.
    Read {
        /// Requested length.
        len: usize,
    },
    /// Positional read.
    ReadAt {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
    },
    /// Streaming write with the exact bytes received.
    Write {
        /// Bytes received.
        data: Vec<u8>,
    },
    /// Positional write with the exact bytes received.
    WriteAt {
        /// Requested offset.
        offset: u64,
        /// Bytes received.
        data: Vec<u8>,
    },
    /// Any non-data operation, by name.
    Other(&'static str),
}

#[derive(Debug, Default)]
struct XattrStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl XattrStore {
    fn get(&self, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let entries = self.entries.lock();
        let data = entries.get(name).ok_or_else(|| io::Error::from_raw_os_error(61))?;
        let n = data.len().min(value.len());
        value[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn list(&self, list: &mut [u8]) -> io::Result<usize> {
        let mut joined = Vec::new();
        for name in self.entries.lock().keys() {
            joined.extend_from_slice(name.as_bytes());
            joined.push(0);
        }
        let n = joined.len().min(list.len());
        list[..n].copy_from_slice(&joined[..n]);
        Ok(n)
    }

    fn set(&self, name: &str, value: &[u8]) {
        let _ = self.entries.lock().insert(name.to_owned(), value.to_vec());
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.entries
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(61))
    }
}

/// An in-memory [`BlockingFile`] that records every call it receives.
#[derive(Debug, Default)]
pub struct FakeBlockingFile {
    data: Arc<Mutex<Vec<u8>>>,
    cursor: Mutex<usize>,
    calls: Mutex<Vec<FakeCall>>,
    xattrs: Option<XattrStore>,
    fail_code: Option<i32>,
    max_read_size: Option<usize>,
    op_delay: Option<Duration>,
    drops: Option<Arc<AtomicUsize>>,
}

impl FakeBlockingFile {
    /// An empty file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A file pre-populated with `data`.
    #[must_use]
    pub fn with_contents(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data.into())),
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            xattrs: None,
            fail_code: None,
            max_read_size: None,
            op_delay: None,
            drops: None,
        }
    }

    /// A file backed by shared storage (used by [`FakeBlockingFilesystem`]).
    #[must_use]
    pub fn with_shared(data: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            data,
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            xattrs: None,
            fail_code: None,
            max_read_size: None,
            op_delay: None,
            drops: None,
        }
    }

    /// Enables the extended-attribute capability.
    #[must_use]
    pub fn with_xattrs(mut self) -> Self {
        self.xattrs = Some(XattrStore::default());
        self
    }

    /// Makes every operation fail with the given OS error code.
    #[must_use]
    pub fn failing(mut self, code: i32) -> Self {
        self.fail_code = Some(code);
        self
    }

    /// Caps single reads, forcing callers to cope with short transfers.
    #[must_use]
    pub fn with_max_read_size(mut self, max: usize) -> Self {
        self.max_read_size = Some(max);
        self
    }

    /// Makes every data operation block the calling thread for `delay`,
    /// imitating slow storage.
    #[must_use]
    pub fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = Some(delay);
        self
    }

    /// Counts this file's eventual drop in `counter`.
    #[must_use]
    pub fn counting_drops(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.drops = Some(counter);
        self
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    /// The current file contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn check_fail(&self) -> io::Result<()> {
        if let Some(delay) = self.op_delay {
            std::thread::sleep(delay);
        }
        match self.fail_code {
            Some(code) => Err(io::Error::from_raw_os_error(code)),
            None => Ok(()),
        }
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }

    fn read_slice_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        if offset >= data.len() {
            return 0;
        }
        let mut n = buf.len().min(data.len() - offset);
        if let Some(max) = self.max_read_size {
            n = n.min(max);
        }
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write_slice_at(&self, offset: u64, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        buf.len()
    }
}

impl Drop for FakeBlockingFile {
    fn drop(&mut self) {
        if let Some(counter) = &self.drops {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl BlockingFile for FakeBlockingFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_fail()?;
        self.record(FakeCall::Read { len: buf.len() });
        let cursor = *self.cursor.lock();
        let n = self.read_slice_at(cursor as u64, buf);
        *self.cursor.lock() = cursor + n;
        Ok(n)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.check_fail()?;
        let mut total = 0;
        for buf in bufs {
            let cursor = *self.cursor.lock();
            self.record(FakeCall::Read { len: buf.len() });
            let n = self.read_slice_at(cursor as u64, buf);
            *self.cursor.lock() = cursor + n;
            total += n;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_fail()?;
        self.record(FakeCall::Write { data: buf.to_vec() });
        let cursor = *self.cursor.lock();
        let n = self.write_slice_at(cursor as u64, buf);
        *self.cursor.lock() = cursor + n;
        Ok(n)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.check_fail()?;
        let mut total = 0;
        for buf in bufs {
            total += self.write(buf)?;
        }
        Ok(total)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.check_fail()?;
        self.record(FakeCall::ReadAt { offset, len: buf.len() });
        Ok(self.read_slice_at(offset, buf))
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        self.check_fail()?;
        self.record(FakeCall::WriteAt {
            offset,
            data: buf.to_vec(),
        });
        Ok(self.write_slice_at(offset, buf))
    }

    fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        self.check_fail()?;
        let mut total = 0;
        let mut at = offset;
        for buf in bufs {
            self.record(FakeCall::ReadAt { offset: at, len: buf.len() });
            let n = self.read_slice_at(at, buf);
            total += n;
            at += n as u64;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.check_fail()?;
        let mut total = 0;
        let mut at = offset;
        for buf in bufs {
            let n = self.write_at(at, buf)?;
            total += n;
            at += n as u64;
        }
        Ok(total)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_fail()?;
        self.record(FakeCall::Other("seek"));
        let len = self.data.lock().len() as i64;
        let mut cursor = self.cursor.lock();
        let target = match pos {
            SeekFrom::Start(n) => i64::try_from(n).unwrap_or(i64::MAX),
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => *cursor as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::from_raw_os_error(22));
        }
        *cursor = usize::try_from(target).unwrap_or(usize::MAX);
        Ok(*cursor as u64)
    }

    fn metadata(&self) -> io::Result<FileStat> {
        self.check_fail()?;
        self.record(FakeCall::Other("metadata"));
        Ok(FileStat::regular(self.data.lock().len() as u64))
    }

    fn sync_all(&self) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("sync_all"));
        Ok(())
    }

    fn sync_data(&self) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("sync_data"));
        Ok(())
    }

    fn sync_range(&self, _offset: u64, _len: u64) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("sync_range"));
        Ok(())
    }

    fn set_permissions(&self, _mode: u32) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("set_permissions"));
        Ok(())
    }

    fn set_owner(&self, _uid: u32, _gid: u32) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("set_owner"));
        Ok(())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("set_len"));
        self.data.lock().resize(usize::try_from(len).unwrap_or(usize::MAX), 0);
        Ok(())
    }

    fn allocate(&self, _mode: u32, _offset: u64, _len: u64) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("allocate"));
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.check_fail()?;
        self.record(FakeCall::Other("close"));
        Ok(())
    }

    fn as_xattr(&self) -> Option<&dyn BlockingFileXattr> {
        self.xattrs.as_ref().map(|_| self as &dyn BlockingFileXattr)
    }
}

impl BlockingFileXattr for FakeBlockingFile {
    fn get_xattr(&self, name: &str, value: &mut [u8]) -> io::Result<usize> {
        self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?.get(name, value)
    }

    fn list_xattr(&self, list: &mut [u8]) -> io::Result<usize> {
        self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?.list(list)
    }

    fn set_xattr(&self, name: &str, value: &[u8], _flags: u32) -> io::Result<()> {
        self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?.set(name, value);
        Ok(())
    }

    fn remove_xattr(&self, name: &str) -> io::Result<()> {
        self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?.remove(name)
    }
}

/// An in-memory [`BlockingDirectory`] over a fixed entry list.
#[derive(Debug, Default)]
pub struct FakeBlockingDirectory {
    entries: Vec<DirEntry>,
    pos: usize,
}

impl FakeBlockingDirectory {
    /// A directory stream over `entries`.
    #[must_use]
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self { entries, pos: 0 }
    }
}

impl BlockingDirectory for FakeBlockingDirectory {
    fn entry(&self) -> Option<DirEntry> {
        self.entries.get(self.pos).cloned()
    }

    fn advance(&mut self) -> bool {
        if self.pos + 1 < self.entries.len() {
            self.pos += 1;
            true
        } else {
            self.pos = self.entries.len();
            false
        }
    }

    fn rewind(&mut self) {
        self.pos = 0;
    }

    fn seek_to(&mut self, pos: u64) {
        self.pos = usize::try_from(pos).unwrap_or(usize::MAX).min(self.entries.len());
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory [`BlockingFilesystem`] keyed by path.
///
/// Files opened through it share their backing storage with the filesystem,
/// so writes through one handle are visible through later opens.
#[derive(Debug, Default)]
pub struct FakeBlockingFilesystem {
    files: Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>,
    dirs: Mutex<HashMap<PathBuf, Vec<DirEntry>>>,
    xattrs: Option<XattrStore>,
}

impl FakeBlockingFilesystem {
    /// An empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the path-level extended-attribute capability. Attributes are
    /// keyed by `path\u{0}name`.
    #[must_use]
    pub fn with_xattrs(mut self) -> Self {
        self.xattrs = Some(XattrStore::default());
        self
    }

    /// Pre-populates a file.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        let _ = self.files.lock().insert(path.into(), Arc::new(Mutex::new(data.into())));
    }

    /// Pre-populates a directory listing.
    pub fn insert_dir(&self, path: impl Into<PathBuf>, entries: Vec<DirEntry>) {
        let _ = self.dirs.lock().insert(path.into(), entries);
    }

    /// Whether a file exists.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    /// A file's current contents, if it exists.
    #[must_use]
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(path).map(|data| data.lock().clone())
    }

    fn storage(&self, path: &Path) -> io::Result<Arc<Mutex<Vec<u8>>>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(2))
    }

    fn xattr_key(path: &Path, name: &str) -> String {
        format!("{}\u{0}{}", path.display(), name)
    }
}

impl BlockingFilesystem for FakeBlockingFilesystem {
    type File = FakeBlockingFile;
    type Dir = FakeBlockingDirectory;

    fn open(&self, path: &Path, opts: OpenOptions) -> io::Result<Self::File> {
        let existing = self.files.lock().get(path).cloned();
        let storage = match existing {
            Some(storage) => {
                if opts.is_truncate() {
                    storage.lock().clear();
                }
                storage
            }
            None if opts.is_create() || opts.is_create_new() => {
                let storage = Arc::new(Mutex::new(Vec::new()));
                let _ = self.files.lock().insert(path.to_owned(), Arc::clone(&storage));
                storage
            }
            None => return Err(io::Error::from_raw_os_error(2)),
        };
        Ok(FakeBlockingFile::with_shared(storage))
    }

    fn open_with_mode(&self, path: &Path, opts: OpenOptions, _mode: u32) -> io::Result<Self::File> {
        self.open(path, opts)
    }

    fn create(&self, path: &Path, _mode: u32) -> io::Result<Self::File> {
        let storage = Arc::new(Mutex::new(Vec::new()));
        let _ = self.files.lock().insert(path.to_owned(), Arc::clone(&storage));
        Ok(FakeBlockingFile::with_shared(storage))
    }

    fn create_dir(&self, path: &Path, _mode: u32) -> io::Result<()> {
        let _ = self.dirs.lock().insert(path.to_owned(), Vec::new());
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.dirs
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(2))
    }

    fn symlink(&self, _target: &Path, _link: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn read_link(&self, _path: &Path) -> io::Result<PathBuf> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        let storage = self.storage(original)?;
        let _ = self.files.lock().insert(link.to_owned(), storage);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.lock();
        let storage = files.remove(from).ok_or_else(|| io::Error::from_raw_os_error(2))?;
        let _ = files.insert(to.to_owned(), storage);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(2))
    }

    fn set_permissions(&self, path: &Path, _mode: u32) -> io::Result<()> {
        self.storage(path).map(|_| ())
    }

    fn set_owner(&self, path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
        self.storage(path).map(|_| ())
    }

    fn set_symlink_owner(&self, path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
        self.storage(path).map(|_| ())
    }

    fn open_dir(&self, path: &Path) -> io::Result<Self::Dir> {
        let entries = self
            .dirs
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(2))?;
        Ok(FakeBlockingDirectory::new(entries))
    }

    fn metadata(&self, path: &Path) -> io::Result<FileStat> {
        if self.dirs.lock().contains_key(path) {
            let mut stat = FileStat::regular(0);
            stat.kind = FileKind::Directory;
            return Ok(stat);
        }
        let storage = self.storage(path)?;
        let len = storage.lock().len() as u64;
        Ok(FileStat::regular(len))
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<FileStat> {
        self.metadata(path)
    }

    fn access(&self, path: &Path, _mode: u32) -> io::Result<()> {
        if self.files.lock().contains_key(path) || self.dirs.lock().contains_key(path) {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(2))
        }
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        let storage = self.storage(path)?;
        storage.lock().resize(usize::try_from(len).unwrap_or(usize::MAX), 0);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn statfs(&self, _path: &Path) -> io::Result<FsStat> {
        Ok(FsStat {
            block_size: 4096,
            blocks: 1 << 20,
            blocks_free: 1 << 19,
            blocks_available: 1 << 19,
            files: 1 << 16,
            files_free: 1 << 15,
            name_max: 255,
        })
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsStat> {
        self.statfs(path)
    }

    fn as_xattr(&self) -> Option<&dyn BlockingFsXattr> {
        self.xattrs.as_ref().map(|_| self as &dyn BlockingFsXattr)
    }
}

impl BlockingFsXattr for FakeBlockingFilesystem {
    fn get_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        let store = self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?;
        store.get(&Self::xattr_key(path, name), value)
    }

    fn lget_xattr(&self, path: &Path, name: &str, value: &mut [u8]) -> io::Result<usize> {
        self.get_xattr(path, name, value)
    }

    fn list_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        let store = self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?;
        let prefix = format!("{}\u{0}", path.display());
        let mut joined = Vec::new();
        for name in store.entries.lock().keys() {
            if let Some(bare) = name.strip_prefix(&prefix) {
                joined.extend_from_slice(bare.as_bytes());
                joined.push(0);
            }
        }
        let n = joined.len().min(list.len());
        list[..n].copy_from_slice(&joined[..n]);
        Ok(n)
    }

    fn llist_xattr(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        self.list_xattr(path, list)
    }

    fn set_xattr(&self, path: &Path, name: &str, value: &[u8], _flags: u32) -> io::Result<()> {
        let store = self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?;
        store.set(&Self::xattr_key(path, name), value);
        Ok(())
    }

    fn lset_xattr(&self, path: &Path, name: &str, value: &[u8], flags: u32) -> io::Result<()> {
        self.set_xattr(path, name, value, flags)
    }

    fn remove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        let store = self.xattrs.as_ref().ok_or_else(crate::xattr_unsupported)?;
        store.remove(&Self::xattr_key(path, name))
    }

    fn lremove_xattr(&self, path: &Path, name: &str) -> io::Result<()> {
        self.remove_xattr(path, name)
    }
}

/// One recorded data operation against a [`FakeFile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoRecord {
    /// Operation name.
    pub op: &'static str,
    /// Requested offset (zero for streaming operations).
    pub offset: u64,
    /// Requested length in bytes.
    pub len: usize,
}

#[derive(Debug, Default)]
struct FakeFileInner {
    data: Mutex<Vec<u8>>,
    cursor: Mutex<usize>,
    io_log: Mutex<Vec<IoRecord>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    op_delay: Option<Duration>,
}

/// An in-memory async [`File`] with concurrency instrumentation.
///
/// Clones share state, so a test can keep one clone for inspection while a
/// decorator owns the other. An optional per-operation delay (virtual time
/// under a paused clock) widens the window in which concurrent operations
/// overlap, making the in-flight gauge meaningful.
#[derive(Clone, Debug, Default)]
pub struct FakeFile {
    inner: Arc<FakeFileInner>,
}

impl FakeFile {
    /// An empty file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A file pre-populated with `data`.
    #[must_use]
    pub fn with_contents(data: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(FakeFileInner {
                data: Mutex::new(data.into()),
                ..FakeFileInner::default()
            }),
        }
    }

    /// Adds a fixed async delay to every data operation.
    #[must_use]
    pub fn with_op_delay(self, delay: Duration) -> Self {
        let inner = FakeFileInner {
            data: Mutex::new(self.inner.data.lock().clone()),
            op_delay: Some(delay),
            ..FakeFileInner::default()
        };
        Self { inner: Arc::new(inner) }
    }

    /// The current file contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }

    /// Every data operation recorded so far.
    #[must_use]
    pub fn io_log(&self) -> Vec<IoRecord> {
        self.inner.io_log.lock().clone()
    }

    /// The most operations that were ever in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter_op(&self, op: &'static str, offset: u64, len: usize) -> InFlight<'_> {
        self.inner.io_log.lock().push(IoRecord { op, offset, len });
        let current = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.inner.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.inner.op_delay {
            tokio::time::sleep(delay).await;
        }
        InFlight { inner: &self.inner }
    }

    fn read_slice_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let data = self.inner.data.lock();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write_slice_at(&self, offset: u64, buf: &[u8]) -> usize {
        let mut data = self.inner.data.lock();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        buf.len()
    }
}

struct InFlight<'a> {
    inner: &'a FakeFileInner,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl File for FakeFile {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.enter_op("read", 0, buf.len()).await;
        let cursor = *self.inner.cursor.lock();
        let n = self.read_slice_at(cursor as u64, buf);
        *self.inner.cursor.lock() = cursor + n;
        drop(guard);
        Ok(n)
    }

    async fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let guard = self.enter_op("read_vectored", 0, total).await;
        let mut n = 0;
        for buf in bufs {
            let cursor = *self.inner.cursor.lock();
            let got = self.read_slice_at(cursor as u64, buf);
            *self.inner.cursor.lock() = cursor + got;
            n += got;
            if got < buf.len() {
                break;
            }
        }
        drop(guard);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let guard = self.enter_op("write", 0, buf.len()).await;
        let cursor = *self.inner.cursor.lock();
        let n = self.write_slice_at(cursor as u64, buf);
        *self.inner.cursor.lock() = cursor + n;
        drop(guard);
        Ok(n)
    }

    async fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let guard = self.enter_op("write_vectored", 0, total).await;
        let mut n = 0;
        for buf in bufs {
            let cursor = *self.inner.cursor.lock();
            let put = self.write_slice_at(cursor as u64, buf);
            *self.inner.cursor.lock() = cursor + put;
            n += put;
        }
        drop(guard);
        Ok(n)
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.enter_op("read_at", offset, buf.len()).await;
        let n = self.read_slice_at(offset, buf);
        drop(guard);
        Ok(n)
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let guard = self.enter_op("write_at", offset, buf.len()).await;
        let n = self.write_slice_at(offset, buf);
        drop(guard);
        Ok(n)
    }

    async fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let guard = self.enter_op("read_vectored_at", offset, total).await;
        let mut n = 0;
        let mut at = offset;
        for buf in bufs {
            let got = self.read_slice_at(at, buf);
            n += got;
            at += got as u64;
            if got < buf.len() {
                break;
            }
        }
        drop(guard);
        Ok(n)
    }

    async fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let total = bufs.iter().map(|b| b.len()).sum();
        let guard = self.enter_op("write_vectored_at", offset, total).await;
        let mut n = 0;
        let mut at = offset;
        for buf in bufs {
            let put = self.write_slice_at(at, buf);
            n += put;
            at += put as u64;
        }
        drop(guard);
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.inner.data.lock().len() as i64;
        let mut cursor = self.inner.cursor.lock();
        let target = match pos {
            SeekFrom::Start(n) => i64::try_from(n).unwrap_or(i64::MAX),
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => *cursor as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::from_raw_os_error(22));
        }
        *cursor = usize::try_from(target).unwrap_or(usize::MAX);
        Ok(*cursor as u64)
    }

    async fn metadata(&self) -> io::Result<FileStat> {
        Ok(FileStat::regular(self.inner.data.lock().len() as u64))
    }

    async fn sync_all(&self) -> io::Result<()> {
        Ok(())
    }

    async fn sync_data(&self) -> io::Result<()> {
        Ok(())
    }

    async fn sync_range(&self, _offset: u64, _len: u64) -> io::Result<()> {
        Ok(())
    }

    async fn set_permissions(&self, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    async fn set_owner(&self, _uid: u32, _gid: u32) -> io::Result<()> {
        Ok(())
    }

    async fn set_len(&self, len: u64) -> io::Result<()> {
        self.inner.data.lock().resize(usize::try_from(len).unwrap_or(usize::MAX), 0);
        Ok(())
    }

    async fn allocate(&self, _mode: u32, _offset: u64, _len: u64) -> io::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory [`CompletionFile`] that completes immediately, or never.
///
/// The stalled variant stores every completion callback without firing it,
/// for exercising timeout paths; the callbacks stay alive so the operations
/// look perpetually in flight rather than abandoned.
#[derive(Default)]
pub struct FakeCompletionFile {
    data: Mutex<Vec<u8>>,
    cursor: Mutex<usize>,
    stalled: bool,
    parked: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    xattrs: Option<XattrStore>,
}

impl FakeCompletionFile {
    /// A file pre-populated with `data`, completing every operation inline.
    #[must_use]
    pub fn with_contents(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Mutex::new(data.into()),
            ..Self::default()
        }
    }

    /// A file whose operations never complete.
    #[must_use]
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    /// Enables the extended-attribute capability.
    #[must_use]
    pub fn with_xattrs(mut self) -> Self {
        self.xattrs = Some(XattrStore::default());
        self
    }

    fn finish<T: Send + 'static>(&self, value: T, done: Complete<T>) {
        if self.stalled {
            self.parked.lock().push(Box::new(move || done(value)));
        } else {
            done(value);
        }
    }
}

impl CompletionFile for FakeCompletionFile {
    fn read(&self, len: usize, done: Complete<io::Result<Vec<u8>>>) {
        let result = {
            let data = self.data.lock();
            let mut cursor = self.cursor.lock();
            let n = len.min(data.len().saturating_sub(*cursor));
            let out = data[*cursor..*cursor + n].to_vec();
            *cursor += n;
            Ok(out)
        };
        self.finish(result, done);
    }

    fn write(&self, data: Vec<u8>, done: Complete<io::Result<usize>>) {
        let result = {
            let mut stored = self.data.lock();
            let mut cursor = self.cursor.lock();
            let end = *cursor + data.len();
            if stored.len() < end {
                stored.resize(end, 0);
            }
            stored[*cursor..end].copy_from_slice(&data);
            *cursor = end;
            Ok(data.len())
        };
        self.finish(result, done);
    }

    fn read_at(&self, offset: u64, len: usize, done: Complete<io::Result<Vec<u8>>>) {
        let result = {
            let data = self.data.lock();
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            let n = len.min(data.len().saturating_sub(offset));
            Ok(data[offset..offset + n].to_vec())
        };
        self.finish(result, done);
    }

    fn write_at(&self, offset: u64, data: Vec<u8>, done: Complete<io::Result<usize>>) {
        let result = {
            let mut stored = self.data.lock();
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            let end = offset + data.len();
            if stored.len() < end {
                stored.resize(end, 0);
            }
            stored[offset..end].copy_from_slice(&data);
            Ok(data.len())
        };
        self.finish(result, done);
    }

    fn seek(&self, pos: SeekFrom, done: Complete<io::Result<u64>>) {
        let result = {
            let data = self.data.lock();
            let mut cursor = self.cursor.lock();
            let target = match pos {
                SeekFrom::Start(n) => i64::try_from(n).unwrap_or(i64::MAX),
                SeekFrom::End(delta) => data.len() as i64 + delta,
                SeekFrom::Current(delta) => *cursor as i64 + delta,
            };
            if target < 0 {
                Err(io::Error::from_raw_os_error(22))
            } else {
                *cursor = usize::try_from(target).unwrap_or(usize::MAX);
                Ok(*cursor as u64)
            }
        };
        self.finish(result, done);
    }

    fn metadata(&self, done: Complete<io::Result<FileStat>>) {
        let len = self.data.lock().len() as u64;
        self.finish(Ok(FileStat::regular(len)), done);
    }

    fn sync_all(&self, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn sync_data(&self, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn sync_range(&self, _offset: u64, _len: u64, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn set_permissions(&self, _mode: u32, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn set_owner(&self, _uid: u32, _gid: u32, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn set_len(&self, len: u64, done: Complete<io::Result<()>>) {
        self.data.lock().resize(usize::try_from(len).unwrap_or(usize::MAX), 0);
        self.finish(Ok(()), done);
    }

    fn allocate(&self, _mode: u32, _offset: u64, _len: u64, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn close(&self, done: Complete<io::Result<()>>) {
        self.finish(Ok(()), done);
    }

    fn as_xattr(&self) -> Option<&dyn CompletionFileXattr> {
        self.xattrs.as_ref().map(|_| self as &dyn CompletionFileXattr)
    }
}

impl CompletionFileXattr for FakeCompletionFile {
    fn get_xattr(&self, name: &str, done: Complete<io::Result<Vec<u8>>>) {
        let result = match &self.xattrs {
            Some(store) => {
                let mut value = vec![0u8; 4096];
                store.get(name, &mut value).map(|n| {
                    value.truncate(n);
                    value
                })
            }
            None => Err(crate::xattr_unsupported()),
        };
        self.finish(result, done);
    }

    fn list_xattr(&self, done: Complete<io::Result<Vec<u8>>>) {
        let result = match &self.xattrs {
            Some(store) => {
                let mut list = vec![0u8; 4096];
                store.list(&mut list).map(|n| {
                    list.truncate(n);
                    list
                })
            }
            None => Err(crate::xattr_unsupported()),
        };
        self.finish(result, done);
    }

    fn set_xattr(&self, name: &str, value: Vec<u8>, _flags: u32, done: Complete<io::Result<()>>) {
        let result = match &self.xattrs {
            Some(store) => {
                store.set(name, &value);
                Ok(())
            }
            None => Err(crate::xattr_unsupported()),
        };
        self.finish(result, done);
    }

    fn remove_xattr(&self, name: &str, done: Complete<io::Result<()>>) {
        let result = match &self.xattrs {
            Some(store) => store.remove(name),
            None => Err(crate::xattr_unsupported()),
        };
        self.finish(result, done);
    }
}
