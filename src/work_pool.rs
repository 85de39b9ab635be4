// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::pin::Pin;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::task::{Context, Poll};
use core::time::Duration;
use std::fmt;
use std::sync::Arc;

const MAX_WORKERS: usize = 4;
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A small pool of OS threads that runs blocking filesystem calls on behalf
/// of async callers.
///
/// The thread adapters ship every underlay operation here so that a blocking
/// system call never occupies an executor worker. The pool starts with one
/// thread and grows, up to a small cap, whenever submissions outpace the
/// threads available to run them; threads idle for ten seconds retire,
/// always leaving one behind.
///
/// Cloning is cheap and shares the pool; an adapter hands its clone to every
/// file and directory handle it produces, so one wrapped filesystem and all
/// of its open handles drain through the same threads.
#[derive(Clone)]
pub struct WorkPool {
    shared: Arc<Shared>,
}

struct Shared {
    queue_tx: flume::Sender<async_task::Runnable>,
    queue_rx: flume::Receiver<async_task::Runnable>,
    workers: AtomicUsize,
    queued: AtomicUsize,
}

impl WorkPool {
    /// Creates a pool with one initial worker thread.
    #[must_use]
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = flume::unbounded();
        let pool = Self {
            shared: Arc::new(Shared {
                queue_tx,
                queue_rx,
                workers: AtomicUsize::new(1),
                queued: AtomicUsize::new(0),
            }),
        };
        spawn_worker(&pool.shared);
        pool
    }

    /// Runs a blocking closure on a worker thread.
    ///
    /// The returned future resolves to the closure's return value. A panic on
    /// the worker is re-raised on the awaiting task.
    pub fn run<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> WorkFuture<T> {
        WorkFuture { task: self.submit(f) }
    }

    /// Runs a blocking closure that borrows caller memory through raw
    /// pointers.
    ///
    /// Identical to [`run`](Self::run) except that the returned future
    /// **blocks on drop** until the closure has finished (or is known never
    /// to start). That is the guarantee that makes it sound for the closure
    /// to reconstruct slices from raw pointers into the caller's stack: even
    /// if the awaiting task is cancelled, the borrowed memory outlives the
    /// closure's execution.
    ///
    /// # Safety
    ///
    /// Not `unsafe` itself, but any raw pointers smuggled into `f` must point
    /// into data that lives until the returned future is dropped.
    pub fn run_scoped<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> ScopedWorkFuture<T> {
        let (fence_tx, fence_rx) = flume::bounded(1);
        let fence = CompletionFence(Some(fence_tx));
        let task = self.submit(move || {
            let value = f();
            drop(fence);
            value
        });
        ScopedWorkFuture { task, fence_rx }
    }

    fn submit<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> async_task::Task<std::thread::Result<T>> {
        let tx = self.shared.queue_tx.clone();
        let (runnable, task) = async_task::spawn(
            async move { std::panic::catch_unwind(core::panic::AssertUnwindSafe(f)) },
            move |runnable: async_task::Runnable| {
                let _ = tx.send(runnable);
            },
        );

        let backlog = self.shared.queued.fetch_add(1, Ordering::Relaxed) + 1;
        self.grow_if_backlogged(backlog);
        runnable.schedule();
        task
    }

    /// Adds a worker when more work is queued than threads exist to take it.
    fn grow_if_backlogged(&self, backlog: usize) {
        loop {
            let workers = self.shared.workers.load(Ordering::Acquire);
            if backlog <= workers || workers >= MAX_WORKERS {
                return;
            }
            if self
                .shared
                .workers
                .compare_exchange(workers, workers + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                spawn_worker(&self.shared);
                return;
            }
        }
    }
}

impl Default for WorkPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkPool")
            .field("workers", &self.shared.workers.load(Ordering::Relaxed))
            .field("queued", &self.shared.queued.load(Ordering::Relaxed))
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>) {
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name("sluice-io".into())
        .spawn(move || worker_loop(&shared))
        .expect("failed to spawn io worker thread");
}

fn worker_loop(shared: &Shared) {
    loop {
        match shared.queue_rx.recv_timeout(WORKER_IDLE_TIMEOUT) {
            Ok(runnable) => {
                let _ = shared.queued.fetch_sub(1, Ordering::Relaxed);
                let _ = runnable.run();
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                // Retire, unless this is the last worker; the CAS loop keeps
                // the invariant under concurrent retirements.
                let mut workers = shared.workers.load(Ordering::Relaxed);
                while workers > 1 {
                    match shared
                        .workers
                        .compare_exchange_weak(workers, workers - 1, Ordering::AcqRel, Ordering::Relaxed)
                    {
                        Ok(_) => {
                            tracing::trace!(remaining = workers - 1, "idle io worker retired");
                            return;
                        }
                        Err(actual) => workers = actual,
                    }
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                let _ = shared.workers.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        }
    }
}

/// Future for [`WorkPool::run`].
pub struct WorkFuture<T> {
    task: async_task::Task<std::thread::Result<T>>,
}

impl<T> Future for WorkFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match Pin::new(&mut self.get_mut().task).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(panic)) => std::panic::resume_unwind(panic),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Signals the fence when dropped, whether the closure ran or was cancelled
/// before starting.
struct CompletionFence(Option<flume::Sender<()>>);

impl Drop for CompletionFence {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// Future for [`WorkPool::run_scoped`].
///
/// Dropping this future before completion blocks the current thread until
/// the submitted closure has finished or is confirmed never to run; see
/// [`WorkPool::run_scoped`].
pub struct ScopedWorkFuture<T> {
    task: async_task::Task<std::thread::Result<T>>,
    fence_rx: flume::Receiver<()>,
}

impl<T> Future for ScopedWorkFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Ready(outcome) => {
                // Drain the fence so Drop returns immediately.
                let _ = this.fence_rx.try_recv();
                match outcome {
                    Ok(value) => Poll::Ready(value),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for ScopedWorkFuture<T> {
    fn drop(&mut self) {
        // Blocks until the closure's fence drops. Cancelling the task first
        // makes "never ran" resolve promptly: a runnable that has not started
        // is destroyed, dropping the closure and the fence with it.
        let _ = self.fence_rx.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_closure_and_returns_value() {
        let pool = WorkPool::new();
        let value = pool.run(|| 21 * 2).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn scoped_run_sees_borrowed_data() {
        let pool = WorkPool::new();
        let data = vec![7u8; 64];
        let ptr = data.as_ptr() as usize;
        let len = data.len();
        let sum = pool
            .run_scoped(move || {
                // SAFETY: `data` outlives the await below, and ScopedWorkFuture
                // blocks on drop, so the slice is valid for the closure's run.
                let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
                slice.iter().map(|&b| u32::from(b)).sum::<u32>()
            })
            .await;
        drop(data);
        assert_eq!(sum, 7 * 64);
    }

    #[tokio::test]
    async fn many_concurrent_submissions_complete() {
        let pool = WorkPool::new();
        let futures: Vec<_> = (0..64).map(|i| pool.run(move || i * 2)).collect();
        for (i, f) in futures.into_iter().enumerate() {
            assert_eq!(f.await, i * 2);
        }
    }

    #[tokio::test]
    #[should_panic(expected = "worker boom")]
    async fn worker_panic_propagates() {
        let pool = WorkPool::new();
        pool.run(|| panic!("worker boom")).await;
    }
}
