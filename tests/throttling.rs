// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
#![allow(missing_docs, reason = "Tests")]

use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;
use std::time::Duration;

use sluice::fake::{FakeBlockingFile, FakeFile};
use sluice::{File, ThreadFile, ThrottleLimits, ThrottledFile, UpperLimits};
use tokio::time::Instant;

const MIB: u32 = 1 << 20;

fn read_limits(limits: UpperLimits) -> ThrottleLimits {
    ThrottleLimits {
        read: limits,
        ..ThrottleLimits::default()
    }
}

// ===========================================================================
// Throughput and IOPS pacing (virtual clock)
// ===========================================================================

mod pacing {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sequential_reads_respect_throughput() {
        // 1 MiB/s over a one-second window: ten 1 MiB reads take nine-plus
        // windows beyond the first free one.
        let limits = read_limits(UpperLimits {
            throughput: MIB,
            ..UpperLimits::default()
        });
        let file = ThrottledFile::new(FakeFile::with_contents(vec![0xA5; MIB as usize]), limits);

        let started = Instant::now();
        let mut buf = vec![0u8; MIB as usize];
        for _ in 0..10 {
            assert_eq!(file.read_at(0, &mut buf).await.unwrap(), MIB as usize);
        }
        let elapsed = Instant::now() - started;
        assert!(elapsed >= Duration::from_secs(9), "ten reads finished in {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(11), "ten reads took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn reads_respect_iops() {
        let limits = read_limits(UpperLimits {
            iops: 10,
            ..UpperLimits::default()
        });
        let file = ThrottledFile::new(FakeFile::with_contents(vec![1u8; 64]), limits);

        let started = Instant::now();
        let mut buf = [0u8; 1];
        for _ in 0..21 {
            let _ = file.read_at(0, &mut buf).await.unwrap();
        }
        let elapsed = Instant::now() - started;
        // 21 ops at 10/s: the first window admits ten for free, the rest wait.
        assert!(elapsed >= Duration::from_secs(1), "21 ops finished in {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(4), "21 ops took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn combined_cap_binds_reads_and_writes_together() {
        // R.IOPS = 10, RW.IOPS = 15: sixty reads and thirty writes have to
        // respect both the per-direction and the combined rate.
        let limits = ThrottleLimits {
            read: UpperLimits {
                iops: 10,
                ..UpperLimits::default()
            },
            rw: UpperLimits {
                iops: 15,
                ..UpperLimits::default()
            },
            ..ThrottleLimits::default()
        };
        let file = Arc::new(ThrottledFile::new(FakeFile::with_contents(vec![1u8; 64]), limits));

        let started = Instant::now();
        let reader = {
            let file = Arc::clone(&file);
            tokio::spawn(async move {
                let mut buf = [0u8; 1];
                for _ in 0..60 {
                    let _ = file.read_at(0, &mut buf).await.unwrap();
                }
            })
        };
        let writer = {
            let file = Arc::clone(&file);
            tokio::spawn(async move {
                for _ in 0..30 {
                    let _ = file.write_at(0, &[1u8]).await.unwrap();
                }
            })
        };
        reader.await.unwrap();
        writer.await.unwrap();
        let elapsed = Instant::now() - started;

        // Ninety combined ops at 15/s need at least five windows beyond the
        // free first one; sixty reads at 10/s need at least five as well.
        assert!(elapsed >= Duration::from_secs(5), "workload finished in {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(12), "workload took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_throttled_in_the_write_direction() {
        let limits = ThrottleLimits {
            write: UpperLimits {
                throughput: 1000,
                ..UpperLimits::default()
            },
            ..ThrottleLimits::default()
        };
        let file = ThrottledFile::new(FakeFile::new(), limits);

        // Over-limit write holds the scope on release.
        let started = Instant::now();
        file.write_at(0, &[7u8; 2000]).await.unwrap();
        let write_elapsed = Instant::now() - started;
        assert!(write_elapsed >= Duration::from_millis(950), "write released after {write_elapsed:?}");

        // Reads are a different direction; nothing holds them.
        let started = Instant::now();
        let mut buf = [0u8; 100];
        let _ = file.read_at(0, &mut buf).await.unwrap();
        assert_eq!(Instant::now(), started, "reads must not be paced by write debt");
    }

    #[tokio::test(start_paused = true)]
    async fn vectored_writes_account_in_the_write_direction() {
        // The whole gather sum is admitted against the write throughput.
        let limits = ThrottleLimits {
            write: UpperLimits {
                throughput: 1000,
                ..UpperLimits::default()
            },
            ..ThrottleLimits::default()
        };
        let file = ThrottledFile::new(FakeFile::new(), limits);

        let started = Instant::now();
        let n = file
            .write_vectored_at(0, &[IoSlice::new(&[1u8; 1500]), IoSlice::new(&[2u8; 500])])
            .await
            .unwrap();
        assert_eq!(n, 2000);
        let elapsed = Instant::now() - started;
        assert!(elapsed >= Duration::from_millis(950), "gather write released after {elapsed:?}");
    }
}

// ===========================================================================
// Concurrency gate
// ===========================================================================

mod concurrency {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_ops_never_exceed_the_gate() {
        let limits = read_limits(UpperLimits {
            concurrent_ops: 3,
            ..UpperLimits::default()
        });
        let fake = FakeFile::with_contents(vec![9u8; 4096]).with_op_delay(Duration::from_millis(5));
        let file = Arc::new(ThrottledFile::new(fake.clone(), limits));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let file = Arc::clone(&file);
            tasks.push(tokio::spawn(async move {
                let mut buf = [0u8; 64];
                file.read_at(0, &mut buf).await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 64);
        }

        let peak = fake.peak_in_flight();
        assert!(peak <= 3, "gate of 3 was exceeded: peak {peak}");
        assert!(peak >= 2, "expected overlap under a 5 ms op delay, peak {peak}");
    }
}

// ===========================================================================
// IO splitting
// ===========================================================================

mod splitting {
    use super::*;

    #[tokio::test]
    async fn round_trip_survives_every_block_size() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        for block_size in [0u64, 1, 4096, 10_000, 10_001] {
            let limits = ThrottleLimits {
                read: UpperLimits {
                    block_size,
                    ..UpperLimits::default()
                },
                write: UpperLimits {
                    block_size,
                    ..UpperLimits::default()
                },
                ..ThrottleLimits::default()
            };
            let file = ThrottledFile::new(FakeFile::new(), limits);

            assert_eq!(file.write_at(0, &payload).await.unwrap(), payload.len());
            let mut back = vec![0u8; payload.len()];
            assert_eq!(file.read_at(0, &mut back).await.unwrap(), payload.len());
            assert_eq!(back, payload, "corruption at block_size {block_size}");
        }
    }

    #[tokio::test]
    async fn oversized_read_issues_block_sized_calls() {
        let limits = read_limits(UpperLimits {
            block_size: 4096,
            ..UpperLimits::default()
        });
        let fake = FakeFile::with_contents(vec![3u8; 10_000]);
        let file = ThrottledFile::new(fake.clone(), limits);

        let mut buf = vec![0u8; 10_000];
        assert_eq!(file.read_at(0, &mut buf).await.unwrap(), 10_000);

        let lens: Vec<usize> = fake.io_log().iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![4096, 4096, 1808]);
        let offsets: Vec<u64> = fake.io_log().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 4096, 8192]);
    }

    #[tokio::test]
    async fn scatter_read_splits_inside_an_element() {
        // block_size 7 over iovecs of 5 and 10 bytes: inner reads of 7, 7, 1,
        // and the caller's array comes back structurally untouched.
        let limits = read_limits(UpperLimits {
            block_size: 7,
            ..UpperLimits::default()
        });
        let content: Vec<u8> = (0u8..15).collect();
        let fake = FakeFile::with_contents(content.clone());
        let file = ThrottledFile::new(fake.clone(), limits);

        let mut a = [0u8; 5];
        let mut b = [0u8; 10];
        let mut bufs = [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)];
        let n = file.read_vectored_at(0, &mut bufs).await.unwrap();
        assert_eq!(n, 15);

        assert_eq!(bufs[0].len(), 5, "caller's iovec array must be untouched");
        assert_eq!(bufs[1].len(), 10, "caller's iovec array must be untouched");
        drop(bufs);
        assert_eq!(&a, &content[..5]);
        assert_eq!(&b, &content[5..]);

        let lens: Vec<usize> = fake.io_log().iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![7, 7, 1]);
    }

    #[tokio::test]
    async fn short_transfer_ends_the_split_with_the_partial_count() {
        // 25 bytes of content, 100 requested in 10-byte blocks: the third
        // block comes back short and the caller sees 25.
        let limits = read_limits(UpperLimits {
            block_size: 10,
            ..UpperLimits::default()
        });
        let fake = FakeFile::with_contents(vec![8u8; 25]);
        let file = ThrottledFile::new(fake.clone(), limits);

        let mut buf = [0u8; 100];
        assert_eq!(file.read_at(0, &mut buf).await.unwrap(), 25);
        let lens: Vec<usize> = fake.io_log().iter().map(|r| r.len).collect();
        assert_eq!(lens, vec![10, 10, 10]);
    }

    #[tokio::test]
    async fn errors_mid_split_surface_with_their_os_code() {
        // A blocking underlay that fails everything, stacked under both
        // adapters: the code crosses the pool and the splitter untouched.
        let limits = read_limits(UpperLimits {
            block_size: 8,
            ..UpperLimits::default()
        });
        let inner = ThreadFile::new(FakeBlockingFile::new().failing(5));
        let file = ThrottledFile::new(inner, limits);

        let mut buf = [0u8; 64];
        let err = file.read_at(0, &mut buf).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(5));
    }
}

// ===========================================================================
// Pass-through behavior
// ===========================================================================

mod pass_through {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn non_data_operations_are_never_paced() {
        // Saturate the read window, then confirm metadata operations fly.
        let limits = read_limits(UpperLimits {
            throughput: 100,
            ..UpperLimits::default()
        });
        let file = ThrottledFile::new(FakeFile::with_contents(vec![0u8; 1000]), limits);
        let mut buf = [0u8; 200];
        let _ = file.read_at(0, &mut buf).await.unwrap();

        let started = Instant::now();
        let _ = file.metadata().await.unwrap();
        file.sync_all().await.unwrap();
        file.set_len(500).await.unwrap();
        file.allocate(0, 0, 100).await.unwrap();
        assert_eq!(Instant::now(), started, "non-data operations must not be throttled");
    }

    #[tokio::test]
    async fn xattr_capability_passes_through() {
        let inner = ThreadFile::new(FakeBlockingFile::new().with_xattrs());
        let file = ThrottledFile::new(inner, ThrottleLimits::default());
        assert!(file.supports_xattr());
        file.set_xattr("user.q", b"pass", 0).await.unwrap();
        let mut value = [0u8; 8];
        let n = file.get_xattr("user.q", &mut value).await.unwrap();
        assert_eq!(&value[..n], b"pass");

        let plain = ThrottledFile::new(ThreadFile::new(FakeBlockingFile::new()), ThrottleLimits::default());
        assert!(!plain.supports_xattr());
    }

    #[tokio::test]
    async fn unlimited_file_adds_no_pacing_or_splitting() {
        let fake = FakeFile::with_contents(vec![4u8; 8192]);
        let file = ThrottledFile::new(fake.clone(), ThrottleLimits::default());
        let mut buf = vec![0u8; 8192];
        assert_eq!(file.read_at(0, &mut buf).await.unwrap(), 8192);
        // block_size 0: exactly one inner call.
        assert_eq!(fake.io_log().len(), 1);
    }
}
