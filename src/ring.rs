//! The ring transport: ring creation, memory mapping, submission and
//! completion primitives.

use std::os::unix::io::{AsRawFd, RawFd};
use std::{cmp, io, mem};

use tracing::{debug, trace};

use crate::cqueue::{Completion, CqRing};
use crate::error::{Result, RingError};
use crate::squeue::{prep_readv, SetupFlags, SqRing};
use crate::sys;
use crate::util::{Fd, Mmap};

/// Ring creation knobs. The defaults are the ones the read path was tuned
/// with: 256 entries and a 2 s poll-thread idle.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Submission queue depth; rounded up to a power of two by the kernel.
    pub queue_depth: u32,
    /// Milliseconds the kernel poll thread keeps spinning after the last
    /// submission before it sleeps and requires an explicit wakeup.
    pub sq_thread_idle_ms: u32,
    /// Pin the poll thread to this CPU.
    pub sq_thread_cpu: Option<u32>,
}

impl Default for RingConfig {
    fn default() -> RingConfig {
        RingConfig {
            queue_depth: 256,
            sq_thread_idle_ms: 2000,
            sq_thread_cpu: None,
        }
    }
}

/// Counters for the syscall-free fast path. Threaded through the transport
/// instead of living in process globals.
#[derive(Debug, Default, Clone, Copy)]
pub struct RingMetrics {
    /// Submission entries published.
    pub submissions: u64,
    /// Explicit `io_uring_enter` calls made to wake a sleeping poll thread.
    pub wakeups: u64,
    /// Completion slots handed back to the kernel.
    pub acknowledgements: u64,
}

// NOTE: the ring views hold raw pointers into `memory`; their lifetime can
// never exceed it. The mapped regions never move, so the views stay valid
// for the life of the transport. Field order matters: the mappings must be
// unmapped before the ring descriptor is closed, and Rust drops fields in
// declaration order.
#[allow(dead_code)]
struct MemoryMap {
    sq_mmap: Mmap,
    sqe_mmap: Mmap,
    cq_mmap: Option<Mmap>,
}

/// Owns the ring file descriptor and all three shared mappings, and exposes
/// the primitives the reader is built on: enqueue one vectored read, observe
/// a completion, acknowledge it.
///
/// A transport must be driven by exactly one thread; nothing here locks.
pub struct RingTransport {
    sq: SqRing,
    cq: CqRing,
    memory: MemoryMap,
    fd: Fd,
    metrics: RingMetrics,
}

impl RingTransport {
    /// Create a ring with a kernel submission poller enabled
    /// (`IORING_SETUP_SQPOLL`) and the given idle timeout.
    pub fn create(queue_depth: u32, sq_thread_idle_ms: u32) -> Result<RingTransport> {
        RingTransport::with_config(&RingConfig {
            queue_depth,
            sq_thread_idle_ms,
            sq_thread_cpu: None,
        })
    }

    pub fn with_config(config: &RingConfig) -> Result<RingTransport> {
        let mut flags = SetupFlags::SQPOLL;
        let mut p = sys::io_uring_params {
            sq_thread_idle: config.sq_thread_idle_ms,
            ..Default::default()
        };
        if let Some(cpu) = config.sq_thread_cpu {
            flags |= SetupFlags::SQ_AFF;
            p.sq_thread_cpu = cpu;
        }
        p.flags = flags.bits();

        let fd = unsafe {
            Fd::from_raw(sys::io_uring_setup(config.queue_depth, &mut p))
                .ok_or_else(|| RingError::Setup(io::Error::last_os_error()))?
        };

        let sq_len = p.sq_off.array as usize + p.sq_entries as usize * mem::size_of::<u32>();
        let cq_len =
            p.cq_off.cqes as usize + p.cq_entries as usize * mem::size_of::<sys::io_uring_cqe>();
        let sqe_len = p.sq_entries as usize * mem::size_of::<sys::io_uring_sqe>();

        let sqe_mmap =
            Mmap::new(&fd, sys::IORING_OFF_SQES, sqe_len).map_err(RingError::Setup)?;

        let (memory, sq, cq) = if p.features & sys::IORING_FEAT_SINGLE_MMAP != 0 {
            let scq_mmap = Mmap::new(&fd, sys::IORING_OFF_SQ_RING, cmp::max(sq_len, cq_len))
                .map_err(RingError::Setup)?;

            let sq = unsafe { SqRing::new(scq_mmap.as_mut_ptr(), sqe_mmap.as_mut_ptr(), &p) };
            let cq = unsafe { CqRing::new(scq_mmap.as_mut_ptr(), &p) };
            let memory = MemoryMap {
                sq_mmap: scq_mmap,
                sqe_mmap,
                cq_mmap: None,
            };

            (memory, sq, cq)
        } else {
            let sq_mmap =
                Mmap::new(&fd, sys::IORING_OFF_SQ_RING, sq_len).map_err(RingError::Setup)?;
            let cq_mmap =
                Mmap::new(&fd, sys::IORING_OFF_CQ_RING, cq_len).map_err(RingError::Setup)?;

            let sq = unsafe { SqRing::new(sq_mmap.as_mut_ptr(), sqe_mmap.as_mut_ptr(), &p) };
            let cq = unsafe { CqRing::new(cq_mmap.as_mut_ptr(), &p) };
            let memory = MemoryMap {
                sq_mmap,
                sqe_mmap,
                cq_mmap: Some(cq_mmap),
            };

            (memory, sq, cq)
        };

        debug!(
            fd = fd.as_raw_fd(),
            sq_entries = p.sq_entries,
            cq_entries = p.cq_entries,
            single_mmap = p.features & sys::IORING_FEAT_SINGLE_MMAP != 0,
            "ring created"
        );

        Ok(RingTransport {
            sq,
            cq,
            memory,
            fd,
            metrics: RingMetrics::default(),
        })
    }

    /// Enqueue one vectored read over `iovecs` against `fd`, tagged with
    /// `tag`. The entry is visible to the kernel poller as soon as the tail
    /// is release-stored; if the poller has gone idle, it is woken with one
    /// `io_uring_enter` call.
    ///
    /// A failed wakeup is surfaced as an error, but the entry is already
    /// published by then: the kernel owns the supplied buffers until the
    /// completion is seen, and the caller must keep treating the read as
    /// in flight.
    ///
    /// Mutates shared ring memory; the `&mut self` receiver is the
    /// exclusion this requires.
    pub fn submit_vectored_read(
        &mut self,
        fd: RawFd,
        iovecs: &[libc::iovec],
        tag: u64,
    ) -> Result<()> {
        let sqe = prep_readv(fd, iovecs.as_ptr(), iovecs.len() as u32, tag);

        self.sq.push(sqe).map_err(|_| RingError::RingFull)?;
        self.metrics.submissions += 1;
        trace!(fd, vecs = iovecs.len(), tag, "readv submitted");

        if self.sq.need_wakeup() {
            self.metrics.wakeups += 1;
            trace!("poll thread asleep, waking");
            loop {
                let ret = unsafe {
                    sys::io_uring_enter(self.fd.as_raw_fd(), 1, 0, sys::IORING_ENTER_SQ_WAKEUP)
                };
                if ret >= 0 {
                    break;
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(RingError::Setup(err));
                }
            }
        }

        Ok(())
    }

    /// Return the oldest unconsumed completion without consuming it, or
    /// `None` when the ring is empty. Repeated peeks return the same entry
    /// until [`acknowledge_completion`](Self::acknowledge_completion).
    #[inline]
    pub fn peek_completion(&self) -> Option<Completion> {
        self.cq.peek()
    }

    /// Spin until a completion appears. With SQPOLL there is no syscall to
    /// park on; the kernel produces the entry whenever the read finishes.
    pub fn wait_completion(&self) -> Completion {
        loop {
            if let Some(entry) = self.cq.peek() {
                return entry;
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Hand the current completion slot back to the kernel. Must be called
    /// exactly once per distinct entry consumed.
    #[inline]
    pub fn acknowledge_completion(&mut self) {
        self.cq.advance();
        self.metrics.acknowledgements += 1;
    }

    /// Counters accumulated so far.
    #[inline]
    pub fn metrics(&self) -> RingMetrics {
        self.metrics
    }

    /// Submission entries the kernel has rejected as malformed. Non-zero
    /// means an encoding bug on this side.
    pub fn sq_dropped(&self) -> u32 {
        self.sq.dropped()
    }

    /// Completion events the kernel dropped on a full completion ring.
    pub fn cq_overflow(&self) -> u32 {
        self.cq.overflow()
    }

    /// Unmap the ring regions and close the ring descriptor. Dropping the
    /// transport does the same; consuming `self` makes a second call
    /// impossible.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for RingTransport {
    fn drop(&mut self) {
        trace!(
            fd = self.fd.as_raw_fd(),
            metrics = ?self.metrics,
            dropped = self.sq.dropped(),
            overflow = self.cq.overflow(),
            "ring shut down"
        );
    }
}

impl AsRawFd for RingTransport {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
