//! Error taxonomy for ring setup, file open, allocation and async I/O.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Debug, Error)]
pub enum RingError {
    /// Ring creation, mapping or geometry computation failed. Fatal; open
    /// aborts.
    #[error("ring setup failed: {0}")]
    Setup(#[source] io::Error),

    /// The file could not be opened or sized.
    #[error("failed to open {}: {}", path.display(), source)]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An aligned block buffer could not be allocated. Fatal.
    #[error("aligned block allocation failed")]
    Allocation,

    /// No free submission slot. Cannot happen with a single outstanding
    /// request per transport, but the transport admits up to `ring_entries`.
    #[error("submission ring full")]
    RingFull,

    /// The completion carried a negative result. The reader becomes
    /// exhausted; no retry is attempted.
    #[error("async read failed: {0}")]
    AsyncIo(#[source] io::Error),
}

impl From<RingError> for io::Error {
    fn from(e: RingError) -> io::Error {
        match e {
            RingError::Setup(err) | RingError::AsyncIo(err) => err,
            RingError::Open { source, .. } => source,
            RingError::Allocation => {
                io::Error::new(io::ErrorKind::OutOfMemory, "aligned block allocation failed")
            }
            RingError::RingFull => {
                io::Error::new(io::ErrorKind::WouldBlock, "submission ring full")
            }
        }
    }
}
