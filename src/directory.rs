// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;

use async_trait::async_trait;

use crate::stat::DirEntry;

/// The uniform async directory-iteration contract.
///
/// Mirrors a classic `readdir` stream: a cursor over entries with
/// save/restore positioning. All iteration state lives in the wrapped
/// implementation; adapters add none of their own.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// The entry under the iterator, or `None` past the end.
    async fn entry(&self) -> Option<DirEntry>;

    /// Advances to the next entry; `false` once the end is reached.
    async fn advance(&mut self) -> bool;

    /// Resets the iterator to the first entry.
    async fn rewind(&mut self);

    /// Moves the iterator to a position previously returned by [`tell`](Self::tell).
    async fn seek_to(&mut self, pos: u64);

    /// The current iterator position.
    async fn tell(&self) -> u64;

    /// Closes the directory stream.
    async fn close(&mut self) -> io::Result<()>;
}
