// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Splitting oversized IOs into block-sized sub-operations.

use std::io::{self, IoSlice, IoSliceMut};
use std::marker::PhantomData;
use std::ops::AsyncFnMut;

/// Runs `op` once per block until `count` bytes have been transferred.
///
/// With `block_size == 0`, or a `count` that already fits, `op` runs exactly
/// once with the full count. Otherwise each call requests
/// `min(remaining, block_size)` and the loop advances by what `op` actually
/// transferred; a short (but non-negative) transfer ends the stream and the
/// accumulated count is returned. Errors propagate as-is, OS error code
/// included, no matter how many blocks already completed.
pub(crate) async fn split_io<F>(count: usize, block_size: usize, mut op: F) -> io::Result<usize>
where
    F: AsyncFnMut(usize) -> io::Result<usize>,
{
    if block_size == 0 || count <= block_size {
        return op(count).await;
    }

    let mut transferred = 0usize;
    let mut remaining = count;
    while remaining > 0 {
        let len = remaining.min(block_size);
        let n = op(len).await?;
        debug_assert!(n <= len, "sub-operation transferred more than requested");
        transferred += n;
        remaining -= n.min(remaining);
        if n < len {
            tracing::debug!(requested = len, got = n, total = transferred, "short transfer ended split io");
            break;
        }
    }
    Ok(transferred)
}

/// A byte-position cursor over a caller's scatter list of mutable buffers.
///
/// [`window`](Self::window) materializes a fresh bounded view for each
/// sub-operation instead of editing the caller's array in place, so the array
/// is observably untouched throughout; the split point may fall inside an
/// element, in which case the window's edge slices cover the partial pieces.
pub(crate) struct IovWindowMut<'a> {
    segments: Vec<(*mut u8, usize)>,
    pos: usize,
    total: usize,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> IovWindowMut<'a> {
    pub(crate) fn new<'b>(bufs: &'a mut [IoSliceMut<'b>]) -> Self {
        let segments: Vec<(*mut u8, usize)> = bufs.iter_mut().map(|b| (b.as_mut_ptr(), b.len())).collect();
        let total = segments.iter().map(|&(_, len)| len).sum();
        Self {
            segments,
            pos: 0,
            total,
            _borrow: PhantomData,
        }
    }

    /// Total bytes across all segments.
    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Marks `n` bytes at the cursor as consumed.
    pub(crate) fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.total);
    }

    /// A scatter view of up to `max` bytes starting at the cursor.
    ///
    /// Holding the view borrows the cursor mutably, so no two views coexist
    /// and each maps a disjoint-by-construction region of the caller's
    /// buffers at the time it is used.
    pub(crate) fn window(&mut self, max: usize) -> Vec<IoSliceMut<'_>> {
        let mut need = max.min(self.total - self.pos);
        let mut skip = self.pos;
        let mut view = Vec::new();
        for &(ptr, len) in &self.segments {
            if need == 0 {
                break;
            }
            if skip >= len {
                skip -= len;
                continue;
            }
            let take = (len - skip).min(need);
            // SAFETY: `ptr..ptr+len` is a live exclusive borrow captured from
            // the caller's IoSliceMut array, which `self` holds for 'a; the
            // &mut self borrow on this method keeps views from overlapping in
            // time.
            let slice = unsafe { core::slice::from_raw_parts_mut(ptr.add(skip), take) };
            view.push(IoSliceMut::new(slice));
            need -= take;
            skip = 0;
        }
        view
    }
}

// SAFETY: the raw segments stand in for the exclusive borrow named by 'a,
// which is Send; the cursor never aliases them outside that borrow.
unsafe impl Send for IovWindowMut<'_> {}

/// As [`IovWindowMut`], over immutable gather buffers.
pub(crate) struct IovWindow<'a> {
    segments: Vec<(*const u8, usize)>,
    pos: usize,
    total: usize,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> IovWindow<'a> {
    pub(crate) fn new<'b>(bufs: &'a [IoSlice<'b>]) -> Self {
        let segments: Vec<(*const u8, usize)> = bufs.iter().map(|b| (b.as_ptr(), b.len())).collect();
        let total = segments.iter().map(|&(_, len)| len).sum();
        Self {
            segments,
            pos: 0,
            total,
            _borrow: PhantomData,
        }
    }

    /// Total bytes across all segments.
    pub(crate) fn total(&self) -> usize {
        self.total
    }

    /// Marks `n` bytes at the cursor as consumed.
    pub(crate) fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.total);
    }

    /// A gather view of up to `max` bytes starting at the cursor.
    pub(crate) fn window(&self, max: usize) -> Vec<IoSlice<'_>> {
        let mut need = max.min(self.total - self.pos);
        let mut skip = self.pos;
        let mut view = Vec::new();
        for &(ptr, len) in &self.segments {
            if need == 0 {
                break;
            }
            if skip >= len {
                skip -= len;
                continue;
            }
            let take = (len - skip).min(need);
            // SAFETY: `ptr..ptr+len` is a live shared borrow captured from the
            // caller's IoSlice array, which `self` holds for 'a.
            let slice = unsafe { core::slice::from_raw_parts(ptr.add(skip), take) };
            view.push(IoSlice::new(slice));
            need -= take;
            skip = 0;
        }
        view
    }
}

// SAFETY: the raw segments stand in for the shared borrow named by 'a, which
// is Send + Sync.
unsafe impl Send for IovWindow<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_block_size_is_a_single_call() {
        let mut calls = Vec::new();
        let n = split_io(100, 0, async |len| {
            calls.push(len);
            Ok(len)
        })
        .await
        .unwrap();
        assert_eq!(n, 100);
        assert_eq!(calls, vec![100]);
    }

    #[tokio::test]
    async fn oversized_count_splits_into_blocks() {
        let mut calls = Vec::new();
        let n = split_io(10, 4, async |len| {
            calls.push(len);
            Ok(len)
        })
        .await
        .unwrap();
        assert_eq!(n, 10);
        assert_eq!(calls, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn short_transfer_returns_accumulated_count() {
        let mut calls = 0;
        let n = split_io(100, 10, async |len| {
            calls += 1;
            if calls == 3 { Ok(5) } else { Ok(len) }
        })
        .await
        .unwrap();
        assert_eq!(n, 25);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn error_mid_split_propagates_with_os_code() {
        let mut calls = 0;
        let result = split_io(100, 10, async |len| {
            calls += 1;
            if calls == 2 {
                Err(io::Error::from_raw_os_error(28))
            } else {
                Ok(len)
            }
        })
        .await;
        assert_eq!(result.unwrap_err().raw_os_error(), Some(28));
    }

    #[test]
    fn window_splits_inside_an_element() {
        let mut a = [0u8; 5];
        let mut b = [0u8; 10];
        let mut bufs = [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)];
        let mut cursor = IovWindowMut::new(&mut bufs);
        assert_eq!(cursor.total(), 15);

        let first = cursor.window(7);
        assert_eq!(first.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![5, 2]);
        drop(first);
        cursor.advance(7);

        let second = cursor.window(7);
        assert_eq!(second.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![7]);
        drop(second);
        cursor.advance(7);

        let third = cursor.window(7);
        assert_eq!(third.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![1]);
        drop(third);
        cursor.advance(1);

        assert!(cursor.window(7).is_empty());
        // The caller's array itself is untouched.
        drop(cursor);
        assert_eq!(bufs[0].len(), 5);
        assert_eq!(bufs[1].len(), 10);
    }

    #[test]
    fn gather_window_walks_segments() {
        let a = [1u8; 3];
        let b = [2u8; 3];
        let bufs = [IoSlice::new(&a), IoSlice::new(&b)];
        let mut cursor = IovWindow::new(&bufs);
        cursor.advance(2);
        let view = cursor.window(3);
        let bytes: Vec<u8> = view.iter().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(bytes, vec![1, 2, 2]);
    }
}
