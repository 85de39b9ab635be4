// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
#![allow(missing_docs, reason = "Tests")]

use std::io::{IoSlice, IoSliceMut, Read as _, Seek as _, SeekFrom, Write as _};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sluice::fake::{FakeBlockingDirectory, FakeBlockingFile, FakeBlockingFilesystem, FakeCall, FakeCompletionFile, FakeFile};
use sluice::{
    BlockingFile, BlockingFileXattr as _, BlockingFilesystem as _, CallbackFile, DirEntry, Directory, File, FileKind, FileStat,
    Filesystem, OpenOptions, ThreadDirectory, ThreadFile, ThreadFilesystem, export_file, export_fs,
};

// ===========================================================================
// Thread adapters (blocking underlay)
// ===========================================================================

mod thread_adapter {
    use super::*;

    #[tokio::test]
    async fn positional_read_round_trips_bytes() {
        let file = ThreadFile::new(FakeBlockingFile::with_contents(*b"hello world\0\0\0\0\0"));
        let mut buf = [0u8; 16];
        let n = file.read_at(0, &mut buf).await.unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf, b"hello world\0\0\0\0\0");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_read_does_not_stall_the_runtime() {
        // The underlay blocks its thread for 100 ms; a concurrent task on the
        // single-threaded runtime must still run immediately.
        let fake = FakeBlockingFile::with_contents(*b"hello world\0\0\0\0\0").with_op_delay(Duration::from_millis(100));
        let file = ThreadFile::new(fake);
        let mut buf = [0u8; 16];
        let started = std::time::Instant::now();
        let (read, side_elapsed) = tokio::join!(file.read_at(0, &mut buf), async { started.elapsed() });
        assert_eq!(read.unwrap(), 16);
        assert_eq!(&buf, b"hello world\0\0\0\0\0");
        assert!(side_elapsed < Duration::from_millis(90), "runtime was stalled for {side_elapsed:?}");
    }

    #[tokio::test]
    async fn underlay_sees_byte_identical_arguments() {
        let file = ThreadFile::new(FakeBlockingFile::new());
        file.write_at(5, b"abc").await.unwrap();
        let mut buf = [0u8; 4];
        let _ = file.read_at(2, &mut buf).await.unwrap();

        let uif = file.underlay();
        let calls = uif.read().unwrap().calls();
        assert_eq!(
            calls,
            vec![
                FakeCall::WriteAt {
                    offset: 5,
                    data: b"abc".to_vec()
                },
                FakeCall::ReadAt { offset: 2, len: 4 },
            ]
        );
    }

    #[tokio::test]
    async fn streaming_io_advances_the_cursor() {
        let mut file = ThreadFile::new(FakeBlockingFile::new());
        assert_eq!(file.write(b"one").await.unwrap(), 3);
        assert_eq!(file.write(b"two").await.unwrap(), 3);
        let pos = file.seek(SeekFrom::Start(0)).await.unwrap();
        assert_eq!(pos, 0);
        let mut buf = [0u8; 6];
        assert_eq!(file.read(&mut buf).await.unwrap(), 6);
        assert_eq!(&buf, b"onetwo");
    }

    #[tokio::test]
    async fn vectored_io_round_trips() {
        let mut file = ThreadFile::new(FakeBlockingFile::new());
        let n = file
            .write_vectored(&[IoSlice::new(b"alpha"), IoSlice::new(b"beta")])
            .await
            .unwrap();
        assert_eq!(n, 9);

        let mut a = [0u8; 5];
        let mut b = [0u8; 4];
        let n = file
            .read_vectored_at(0, &mut [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)])
            .await
            .unwrap();
        assert_eq!(n, 9);
        assert_eq!(&a, b"alpha");
        assert_eq!(&b, b"beta");
    }

    #[tokio::test]
    async fn underlay_errors_keep_their_os_code() {
        let file = ThreadFile::new(FakeBlockingFile::new().failing(13));
        let err = file.read_at(0, &mut [0u8; 8]).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(13));
    }

    #[tokio::test]
    async fn underlay_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut file = ThreadFile::new(FakeBlockingFile::new().counting_drops(Arc::clone(&drops)));
        file.close().await.unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 0, "close must not destroy the underlay");
        drop(file);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn metadata_and_set_len_pass_through() {
        let file = ThreadFile::new(FakeBlockingFile::with_contents(vec![1u8; 100]));
        assert_eq!(file.metadata().await.unwrap().size, 100);
        file.set_len(40).await.unwrap();
        assert_eq!(file.metadata().await.unwrap().size, 40);
        file.sync_all().await.unwrap();
        file.sync_range(0, 40).await.unwrap();
    }

    #[tokio::test]
    async fn xattr_capability_follows_the_underlay() {
        let plain = ThreadFile::new(FakeBlockingFile::new());
        assert!(!plain.supports_xattr());
        let err = plain.get_xattr("user.tag", &mut [0u8; 8]).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);

        let extended = ThreadFile::new(FakeBlockingFile::new().with_xattrs());
        assert!(extended.supports_xattr());
        extended.set_xattr("user.tag", b"blue", 0).await.unwrap();
        let mut value = [0u8; 16];
        let n = extended.get_xattr("user.tag", &mut value).await.unwrap();
        assert_eq!(&value[..n], b"blue");
        extended.remove_xattr("user.tag").await.unwrap();
        let err = extended.get_xattr("user.tag", &mut value).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(61));
    }
}

// ===========================================================================
// Thread directory adapter
// ===========================================================================

mod thread_directory {
    use super::*;

    fn sample_dir() -> FakeBlockingDirectory {
        FakeBlockingDirectory::new(vec![
            DirEntry::new("a.txt", FileKind::File),
            DirEntry::new("b.txt", FileKind::File),
            DirEntry::new("sub", FileKind::Directory),
        ])
    }

    #[tokio::test]
    async fn iterates_entries_in_order() {
        let mut dir = ThreadDirectory::new(sample_dir());
        let mut names = Vec::new();
        loop {
            let Some(entry) = dir.entry().await else { break };
            names.push(entry.name);
            if !dir.advance().await {
                break;
            }
        }
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn rewind_and_seek_restore_position() {
        let mut dir = ThreadDirectory::new(sample_dir());
        assert!(dir.advance().await);
        let pos = dir.tell().await;
        assert_eq!(pos, 1);
        dir.rewind().await;
        assert_eq!(dir.tell().await, 0);
        dir.seek_to(pos).await;
        assert_eq!(dir.entry().await.unwrap().name, "b.txt");
        dir.close().await.unwrap();
    }
}

// ===========================================================================
// Thread filesystem adapter
// ===========================================================================

mod thread_filesystem {
    use super::*;

    #[tokio::test]
    async fn create_write_and_reopen() {
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        let file = fs.create(Path::new("data.bin"), 0o644).await.unwrap();
        file.write_at(0, b"persisted").await.unwrap();
        drop(file);

        let reopened = fs.open(Path::new("data.bin"), OpenOptions::new().read(true)).await.unwrap();
        let mut buf = [0u8; 9];
        assert_eq!(reopened.read_at(0, &mut buf).await.unwrap(), 9);
        assert_eq!(&buf, b"persisted");
    }

    #[tokio::test]
    async fn open_missing_file_reports_the_os_code() {
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        let err = fs.open(Path::new("absent"), OpenOptions::new().read(true)).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(2));
    }

    #[tokio::test]
    async fn rename_moves_the_file() {
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        let _ = fs.create(Path::new("old"), 0o644).await.unwrap();
        fs.rename(Path::new("old"), Path::new("new")).await.unwrap();

        let uif = fs.underlay();
        let underlay = uif.read().unwrap();
        assert!(!underlay.contains(Path::new("old")), "rename must not leave the source behind");
        assert!(underlay.contains(Path::new("new")));
    }

    #[tokio::test]
    async fn hard_link_shares_content() {
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        let file = fs.create(Path::new("orig"), 0o644).await.unwrap();
        file.write_at(0, b"shared").await.unwrap();
        fs.hard_link(Path::new("orig"), Path::new("link")).await.unwrap();

        let linked = fs.open(Path::new("link"), OpenOptions::new().read(true)).await.unwrap();
        let mut buf = [0u8; 6];
        linked.read_at(0, &mut buf).await.unwrap();
        assert_eq!(&buf, b"shared");
    }

    #[tokio::test]
    async fn metadata_access_truncate_and_statfs() {
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        let file = fs.create(Path::new("f"), 0o644).await.unwrap();
        file.write_at(0, &[0u8; 128]).await.unwrap();

        assert_eq!(fs.metadata(Path::new("f")).await.unwrap().size, 128);
        fs.access(Path::new("f"), 4).await.unwrap();
        fs.truncate(Path::new("f"), 32).await.unwrap();
        assert_eq!(fs.metadata(Path::new("f")).await.unwrap().size, 32);
        assert_eq!(fs.statfs(Path::new("/")).await.unwrap().block_size, 4096);
        assert_eq!(fs.statvfs(Path::new("/")).await.unwrap().name_max, 255);
        fs.sync().await.unwrap();
        fs.remove_file(Path::new("f")).await.unwrap();
        let err = fs.metadata(Path::new("f")).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(2));
    }

    #[tokio::test]
    async fn directories_create_list_remove() {
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        fs.create_dir(Path::new("d"), 0o755).await.unwrap();
        assert_eq!(fs.metadata(Path::new("d")).await.unwrap().kind, FileKind::Directory);

        let uif = fs.underlay();
        uif.read()
            .unwrap()
            .insert_dir("listing", vec![DirEntry::new("x", FileKind::File)]);
        let dir = fs.open_dir(Path::new("listing")).await.unwrap();
        assert_eq!(dir.entry().await.unwrap().name, "x");

        fs.remove_dir(Path::new("d")).await.unwrap();
    }

    #[tokio::test]
    async fn fs_xattr_capability_follows_the_underlay() {
        let plain = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        assert!(!plain.supports_xattr());

        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new().with_xattrs());
        assert!(fs.supports_xattr());
        let _ = fs.create(Path::new("tagged"), 0o644).await.unwrap();
        fs.set_xattr(Path::new("tagged"), "user.color", b"red", 0).await.unwrap();
        let mut value = [0u8; 8];
        let n = fs.get_xattr(Path::new("tagged"), "user.color", &mut value).await.unwrap();
        assert_eq!(&value[..n], b"red");
        let n = fs.lget_xattr(Path::new("tagged"), "user.color", &mut value).await.unwrap();
        assert_eq!(&value[..n], b"red");
        let mut list = [0u8; 32];
        let n = fs.list_xattr(Path::new("tagged"), &mut list).await.unwrap();
        assert_eq!(&list[..n], b"user.color\0");
        fs.remove_xattr(Path::new("tagged"), "user.color").await.unwrap();
    }
}

// ===========================================================================
// Callback adapters (completion underlay)
// ===========================================================================

mod callback_adapter {
    use super::*;

    #[tokio::test]
    async fn completions_resolve_operations() {
        let file = CallbackFile::new(FakeCompletionFile::with_contents(*b"callback data"), None);
        let mut buf = [0u8; 8];
        let n = file.read_at(9, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data");

        file.write_at(0, b"Callback").await.unwrap();
        let n = file.read_at(0, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Callback");
        assert_eq!(file.metadata().await.unwrap().size, 13);
    }

    #[tokio::test]
    async fn streaming_and_vectored_bridge_through_owned_buffers() {
        let mut file = CallbackFile::new(FakeCompletionFile::with_contents(Vec::new()), None);
        file.write_vectored(&[IoSlice::new(b"ab"), IoSlice::new(b"cd")]).await.unwrap();
        file.seek(SeekFrom::Start(0)).await.unwrap();
        let mut a = [0u8; 3];
        let mut b = [0u8; 1];
        let n = file
            .read_vectored(&mut [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)])
            .await
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(&a, b"abc");
        assert_eq!(&b, b"d");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_operation_times_out() {
        let file = CallbackFile::new(FakeCompletionFile::stalled(), Some(Duration::from_micros(1000)));
        let mut buf = [0u8; 16];
        let err = file.read_at(0, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_only_applies_past_the_deadline() {
        // An inline completion beats any timeout, however short.
        let file = CallbackFile::new(FakeCompletionFile::with_contents(*b"x"), Some(Duration::from_micros(1)));
        let mut buf = [0u8; 1];
        assert_eq!(file.read_at(0, &mut buf).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn xattr_capability_follows_the_underlay() {
        let plain = CallbackFile::new(FakeCompletionFile::with_contents(Vec::new()), None);
        assert!(!plain.supports_xattr());

        let extended = CallbackFile::new(FakeCompletionFile::with_contents(Vec::new()).with_xattrs(), None);
        assert!(extended.supports_xattr());
        extended.set_xattr("user.k", b"v", 0).await.unwrap();
        let mut value = [0u8; 4];
        let n = extended.get_xattr("user.k", &mut value).await.unwrap();
        assert_eq!(&value[..n], b"v");
    }
}

// ===========================================================================
// Export (runtime-hosted object driven from OS threads)
// ===========================================================================

mod export {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exported_file_serves_blocking_callers() {
        let fake = FakeFile::with_contents(b"exported data".to_vec());
        let exported = export_file(fake.clone(), tokio::runtime::Handle::current());

        let (n, buf) = tokio::task::spawn_blocking(move || {
            exported.write_at(9, b"DATA").unwrap();
            let mut buf = [0u8; 13];
            let n = exported.read_at(0, &mut buf).unwrap();
            (n, buf)
        })
        .await
        .unwrap();
        assert_eq!(n, 13);
        assert_eq!(&buf, b"exported DATA");
        assert_eq!(fake.contents(), b"exported DATA");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exported_streaming_io_keeps_cursor_order() {
        let fake = FakeFile::new();
        let mut exported = export_file(fake.clone(), tokio::runtime::Handle::current());

        tokio::task::spawn_blocking(move || {
            assert_eq!(exported.write(b"one").unwrap(), 3);
            assert_eq!(exported.write(b"two").unwrap(), 3);
            assert_eq!(exported.seek(SeekFrom::Start(0)).unwrap(), 0);
            let mut buf = [0u8; 6];
            exported.read(&mut buf).unwrap();
            assert_eq!(&buf, b"onetwo");
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exported_filesystem_round_trips_through_every_bridge() {
        // blocking underlay -> thread adapter (async) -> lifted (completion)
        // -> exported (blocking again), driven from an OS thread.
        let fs = ThreadFilesystem::new(FakeBlockingFilesystem::new());
        let exported = export_fs(fs, tokio::runtime::Handle::current());

        tokio::task::spawn_blocking(move || {
            let mut file = exported.create(Path::new("bridge"), 0o644).unwrap();
            file.write_at(0, b"full circle").unwrap();
            let stat = exported.metadata(Path::new("bridge")).unwrap();
            assert_eq!(stat.size, 11);

            let mut reopened = exported.open(Path::new("bridge"), OpenOptions::new().read(true)).unwrap();
            let mut buf = [0u8; 11];
            assert_eq!(reopened.read_at(0, &mut buf).unwrap(), 11);
            assert_eq!(&buf, b"full circle");
            let _ = file.close();
            let _ = reopened.close();
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exported_xattr_capability_survives_the_bridges() {
        let inner = ThreadFile::new(FakeBlockingFile::new().with_xattrs());
        let exported = export_file(inner, tokio::runtime::Handle::current());

        tokio::task::spawn_blocking(move || {
            let xattr = exported.as_xattr().expect("xattr capability must survive lifting");
            xattr.set_xattr("user.stage", b"exported", 0).unwrap();
            let mut value = [0u8; 16];
            let n = xattr.get_xattr("user.stage", &mut value).unwrap();
            assert_eq!(&value[..n], b"exported");
        })
        .await
        .unwrap();
    }
}

// ===========================================================================
// Real filesystem smoke test (std::fs underlay)
// ===========================================================================

mod real_fs {
    use super::*;

    struct StdBlockingFile(std::fs::File);

    #[cfg(unix)]
    fn positional_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn positional_read(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        file.seek_read(buf, offset)
    }

    #[cfg(unix)]
    fn positional_write(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        file.write_at(buf, offset)
    }

    #[cfg(windows)]
    fn positional_write(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        file.seek_write(buf, offset)
    }

    impl BlockingFile for StdBlockingFile {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }

        fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> std::io::Result<usize> {
            self.0.read_vectored(bufs)
        }

        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.write(buf)
        }

        fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
            self.0.write_vectored(bufs)
        }

        fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            positional_read(&self.0, buf, offset)
        }

        fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<usize> {
            positional_write(&self.0, buf, offset)
        }

        fn read_vectored_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> std::io::Result<usize> {
            let mut total = 0;
            let mut at = offset;
            for buf in bufs {
                let n = positional_read(&self.0, buf, at)?;
                total += n;
                at += n as u64;
                if n < buf.len() {
                    break;
                }
            }
            Ok(total)
        }

        fn write_vectored_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
            let mut total = 0;
            let mut at = offset;
            for buf in bufs {
                let n = positional_write(&self.0, buf, at)?;
                total += n;
                at += n as u64;
                if n < buf.len() {
                    break;
                }
            }
            Ok(total)
        }

        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.0.seek(pos)
        }

        fn metadata(&self) -> std::io::Result<FileStat> {
            let meta = self.0.metadata()?;
            let mut stat = FileStat::regular(meta.len());
            if meta.file_type().is_dir() {
                stat.kind = FileKind::Directory;
            }
            Ok(stat)
        }

        fn sync_all(&self) -> std::io::Result<()> {
            self.0.sync_all()
        }

        fn sync_data(&self) -> std::io::Result<()> {
            self.0.sync_data()
        }

        fn sync_range(&self, _offset: u64, _len: u64) -> std::io::Result<()> {
            self.0.sync_data()
        }

        fn set_permissions(&self, _mode: u32) -> std::io::Result<()> {
            Ok(())
        }

        fn set_owner(&self, _uid: u32, _gid: u32) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
        }

        fn set_len(&self, len: u64) -> std::io::Result<()> {
            self.0.set_len(len)
        }

        fn allocate(&self, _mode: u32, _offset: u64, _len: u64) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
        }

        fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn adapter_over_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("real.bin");
        let std_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        let file = ThreadFile::new(StdBlockingFile(std_file));
        file.write_at(0, b"written through the adapter").await.unwrap();
        file.sync_all().await.unwrap();

        let mut buf = [0u8; 27];
        assert_eq!(file.read_at(0, &mut buf).await.unwrap(), 27);
        assert_eq!(&buf, b"written through the adapter");
        assert_eq!(file.metadata().await.unwrap().size, 27);

        file.set_len(7).await.unwrap();
        assert_eq!(file.metadata().await.unwrap().size, 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"written");
    }
}
