//! End-to-end tests against a real ring.
//!
//! These need a kernel with io_uring and permission to create an SQPOLL
//! ring; when setup fails (seccomp'd container, old kernel) the tests skip
//! instead of failing.

use std::io::Write;

use anyhow::Result;
use tempfile::NamedTempFile;
use uring_fread::{ChunkedReader, RingError, BLOCK_SZ};

fn patterned_file(size: usize) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    let bytes: Vec<u8> = (0..size).map(|v| (v % 251) as u8).collect();
    file.write_all(&bytes)?;
    file.flush()?;
    Ok(file)
}

/// `None` means the environment cannot create a ring; skip the test.
fn open_or_skip(path: &std::path::Path) -> Option<ChunkedReader> {
    match ChunkedReader::open(path) {
        Ok(reader) => Some(reader),
        Err(RingError::Setup(e)) => {
            eprintln!("skipping: cannot create io_uring ring here: {}", e);
            None
        }
        Err(e) => panic!("open failed: {}", e),
    }
}

/// Old kernels reject non-registered files under SQPOLL with EBADF.
fn sqpoll_unsupported(err: &RingError) -> bool {
    matches!(
        err,
        RingError::AsyncIo(e) if e.raw_os_error() == Some(libc::EBADF)
    )
}

#[test]
fn block_sized_reads_step_through_each_block() -> Result<()> {
    let file = patterned_file(10_000)?;
    let Some(mut reader) = open_or_skip(file.path()) else {
        return Ok(());
    };
    assert_eq!(reader.file_size(), 10_000);

    let mut buf = vec![0u8; BLOCK_SZ];
    let mut lens = Vec::new();
    let mut out = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                lens.push(n);
                out.extend_from_slice(&buf[..n]);
            }
            Err(e) if sqpoll_unsupported(&e) => {
                eprintln!("skipping: kernel lacks IORING_FEAT_SQPOLL_NONFIXED");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(lens, vec![4096, 4096, 1808]);
    assert_eq!(out, std::fs::read(file.path())?);

    let metrics = reader.metrics();
    assert_eq!(metrics.submissions, 1);
    assert_eq!(metrics.acknowledgements, 3);

    // exhausted readers keep returning 0
    assert_eq!(reader.read(&mut buf)?, 0);
    reader.close();
    Ok(())
}

#[test]
fn arbitrary_chunking_reproduces_the_file() -> Result<()> {
    let size = 3 * BLOCK_SZ + 123;
    let file = patterned_file(size)?;
    let Some(mut reader) = open_or_skip(file.path()) else {
        return Ok(());
    };

    let mut buf = vec![0u8; 997];
    let mut out = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if sqpoll_unsupported(&e) => {
                eprintln!("skipping: kernel lacks IORING_FEAT_SQPOLL_NONFIXED");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(out.len(), size);
    assert_eq!(out, std::fs::read(file.path())?);
    Ok(())
}

#[test]
fn empty_file_returns_zero_immediately() -> Result<()> {
    let file = NamedTempFile::new()?;
    let Some(mut reader) = open_or_skip(file.path()) else {
        return Ok(());
    };

    let mut buf = [0u8; 64];
    assert_eq!(reader.read(&mut buf)?, 0);
    assert_eq!(reader.read(&mut buf)?, 0);
    assert_eq!(reader.metrics().submissions, 0);
    Ok(())
}

#[test]
fn exact_multiple_has_no_short_block() -> Result<()> {
    let file = patterned_file(2 * BLOCK_SZ)?;
    let Some(mut reader) = open_or_skip(file.path()) else {
        return Ok(());
    };

    let mut buf = vec![0u8; BLOCK_SZ];
    let mut lens = Vec::new();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => lens.push(n),
            Err(e) if sqpoll_unsupported(&e) => {
                eprintln!("skipping: kernel lacks IORING_FEAT_SQPOLL_NONFIXED");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(lens, vec![4096, 4096]);
    Ok(())
}

#[test]
fn works_through_std_io_read() -> Result<()> {
    use std::io::Read;

    let size = BLOCK_SZ + 77;
    let file = patterned_file(size)?;
    let Some(mut reader) = open_or_skip(file.path()) else {
        return Ok(());
    };

    let mut out = Vec::new();
    match reader.read_to_end(&mut out) {
        Ok(n) => {
            assert_eq!(n, size);
            assert_eq!(out, std::fs::read(file.path())?);
        }
        Err(e) if e.raw_os_error() == Some(libc::EBADF) => {
            eprintln!("skipping: kernel lacks IORING_FEAT_SQPOLL_NONFIXED");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[test]
fn missing_file_is_an_open_error() {
    match ChunkedReader::open("/definitely/not/here") {
        Err(RingError::Open { path, .. }) => {
            assert_eq!(path, std::path::Path::new("/definitely/not/here"));
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("open of a missing path succeeded"),
    }
}
