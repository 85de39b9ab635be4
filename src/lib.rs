// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]

//! Filesystem adapters that bridge scheduling domains, plus per-file IO
//! throttling.
//!
//! Filesystem implementations come in two shapes: **blocking** (each call
//! occupies an OS thread until it returns) and **completion-based** (each
//! call returns immediately and reports through a callback). Applications on
//! an async runtime want neither — they want a uniform async API whose
//! operations suspend only the calling task. This crate provides that bridge
//! in both directions, and a throttling decorator over the same contract.
//!
//! # The uniform contract
//!
//! [`File`], [`Directory`], and [`Filesystem`] are the async traits every
//! adapter exports and every decorator consumes. Extended attributes are an
//! optional capability, probed from the wrapped object at construction and
//! advertised through `supports_xattr`.
//!
//! # Wrapping a blocking implementation
//!
//! [`ThreadFile`], [`ThreadDirectory`], and [`ThreadFilesystem`] ship each
//! operation to a small self-scaling worker-thread pool ([`WorkPool`]), so a
//! blocking system call never occupies an executor worker:
//!
//! ```
//! use sluice::fake::FakeBlockingFile;
//! use sluice::{File, ThreadFile};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> std::io::Result<()> {
//! let file = ThreadFile::new(FakeBlockingFile::with_contents(*b"hello world"));
//! let mut buf = [0u8; 5];
//! let n = file.read_at(6, &mut buf).await?;
//! assert_eq!(&buf[..n], b"world");
//! # Ok(())
//! # }
//! ```
//!
//! # Wrapping a completion-based implementation
//!
//! [`CallbackFile`], [`CallbackDirectory`], and [`CallbackFilesystem`] turn
//! completion callbacks into awaitable operations, with a per-operation
//! timeout surfaced as [`std::io::ErrorKind::TimedOut`].
//!
//! # The reverse direction
//!
//! [`export_file`] / [`export_dir`] / [`export_fs`] present a runtime-hosted
//! object to plain OS threads through the blocking contract: the operation
//! runs as a task on the runtime while the calling thread parks on a condvar
//! until the completion fires.
//!
//! # Throttling
//!
//! [`ThrottledFile`] enforces concurrency, IOPS, and throughput ceilings per
//! direction (read, write, and combined) over a sliding accounting window,
//! splitting oversized IOs into `block_size` sub-operations. Limits are
//! plain data ([`ThrottleLimits`], [`UpperLimits`]); zero always means
//! unlimited.
//!
//! ```
//! use sluice::fake::FakeFile;
//! use sluice::{File, ThrottleLimits, ThrottledFile, UpperLimits};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> std::io::Result<()> {
//! let limits = ThrottleLimits {
//!     read: UpperLimits { block_size: 4096, ..Default::default() },
//!     ..Default::default()
//! };
//! let throttled = ThrottledFile::new(FakeFile::with_contents(vec![7u8; 16384]), limits);
//! let mut buf = vec![0u8; 16384];
//! // One caller-visible read, four block-sized reads underneath.
//! let n = throttled.read_at(0, &mut buf).await?;
//! assert_eq!(n, 16384);
//! # Ok(())
//! # }
//! ```

pub use crate::blocking::{
    BlockingDirectory, BlockingFile, BlockingFileXattr, BlockingFilesystem, BlockingFsXattr,
};
pub use crate::callback::{CallbackDirectory, CallbackFile, CallbackFilesystem};
pub use crate::completion::{
    Complete, CompletionDirectory, CompletionFile, CompletionFileXattr, CompletionFilesystem, CompletionFsXattr,
};
pub use crate::directory::Directory;
pub use crate::export::{
    ExportedDirectory, ExportedFile, ExportedFilesystem, LiftedDirectory, LiftedFile, LiftedFilesystem, export_dir,
    export_file, export_fs,
};
pub use crate::file::File;
pub use crate::filesystem::Filesystem;
pub use crate::open_options::OpenOptions;
pub use crate::stat::{DirEntry, FileKind, FileStat, FsStat};
pub use crate::throttle::{ThrottleLimits, UpperLimits};
pub use crate::throttled_file::ThrottledFile;
pub use crate::thread::{ThreadDirectory, ThreadFile, ThreadFilesystem};
pub use crate::work_pool::{ScopedWorkFuture, WorkFuture, WorkPool};

mod blocking;
mod callback;
mod completion;
mod directory;
mod export;
pub mod fake;
mod file;
mod filesystem;
mod open_options;
mod split;
mod stat;
mod stats_queue;
mod thread;
mod throttle;
mod throttled_file;
mod work_pool;

/// The error every absent optional capability reports.
pub(crate) fn xattr_unsupported() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Unsupported, "extended attributes not supported by the underlay")
}
