//! Kernel-assisted asynchronous file reading over raw io_uring rings.
//!
//! A [`ChunkedReader`] opens a file, submits one vectored read covering the
//! whole file into `BLOCK_SZ`-aligned buffers, and exposes a conventional
//! pull-based `read`. The submission is drained by a kernel polling thread
//! (`IORING_SETUP_SQPOLL`), so the steady-state read path makes no
//! syscalls: the only kernel crossings are ring setup at open and the
//! occasional wakeup when the poller has gone idle.
//!
//! The lower layer, [`RingTransport`], owns the ring file descriptor and
//! the shared submission/completion mappings and speaks the acquire/release
//! index protocol directly. It can be used on its own when the reader's
//! one-request-per-file shape does not fit.
//!
//! ```no_run
//! use uring_fread::ChunkedReader;
//!
//! # fn main() -> uring_fread::Result<()> {
//! let mut reader = ChunkedReader::open("/var/log/syslog")?;
//! let mut buf = vec![0u8; 64 * 1024];
//! loop {
//!     let n = reader.read(&mut buf)?;
//!     if n == 0 {
//!         break;
//!     }
//!     // use &buf[..n]
//! }
//! reader.close();
//! # Ok(())
//! # }
//! ```

mod cqueue;
mod error;
mod reader;
mod request;
mod ring;
mod squeue;
mod sys;
mod util;

pub use cqueue::Completion;
pub use error::{Result, RingError};
pub use reader::ChunkedReader;
pub use request::RequestDescriptor;
pub use ring::{RingConfig, RingMetrics, RingTransport};

/// Physical block size: every scatter-list buffer is one of these, aligned
/// to this boundary because the kernel reads and writes them directly.
pub const BLOCK_SZ: usize = 4096;
