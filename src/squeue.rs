//! Submission ring view.

use std::sync::atomic;

use crate::sys;
use crate::util::unsync_load;

use bitflags::bitflags;

bitflags! {
    /// Ring setup flags passed through to `io_uring_setup`.
    pub struct SetupFlags: u32 {
        /// Busy-wait for completions instead of IRQ notification.
        const IOPOLL = sys::IORING_SETUP_IOPOLL;

        /// Run a kernel thread that drains submissions without a syscall
        /// per operation.
        const SQPOLL = sys::IORING_SETUP_SQPOLL;

        /// Pin the poll thread to `sq_thread_cpu`.
        const SQ_AFF = sys::IORING_SETUP_SQ_AFF;

        /// Clamp oversized queue sizes instead of failing.
        const CLAMP = sys::IORING_SETUP_CLAMP;
    }
}

/// Live view over the mapped submission ring.
///
/// Every pointer here aliases kernel-shared memory; the view owns nothing
/// and allocates nothing. The transport keeps the backing mappings alive
/// for at least as long as this view.
pub(crate) struct SqRing {
    head: *const atomic::AtomicU32,
    tail: *const atomic::AtomicU32,
    ring_mask: *const u32,
    ring_entries: *const u32,
    flags: *const atomic::AtomicU32,
    dropped: *const atomic::AtomicU32,
    array: *mut u32,

    sqes: *mut sys::io_uring_sqe,
}

impl SqRing {
    /// # Safety
    ///
    /// `sq_base` must point at a live submission ring mapping laid out
    /// according to `p.sq_off`, and `sqe_base` at the entry array mapping.
    pub unsafe fn new(
        sq_base: *mut libc::c_void,
        sqe_base: *mut libc::c_void,
        p: &sys::io_uring_params,
    ) -> SqRing {
        let base = sq_base.cast::<u8>();

        SqRing {
            head: base.add(p.sq_off.head as usize) as *const atomic::AtomicU32,
            tail: base.add(p.sq_off.tail as usize) as *const atomic::AtomicU32,
            ring_mask: base.add(p.sq_off.ring_mask as usize) as *const u32,
            ring_entries: base.add(p.sq_off.ring_entries as usize) as *const u32,
            flags: base.add(p.sq_off.flags as usize) as *const atomic::AtomicU32,
            dropped: base.add(p.sq_off.dropped as usize) as *const atomic::AtomicU32,
            array: base.add(p.sq_off.array as usize) as *mut u32,
            sqes: sqe_base as *mut sys::io_uring_sqe,
        }
    }

    /// Whether the kernel poll thread has gone to sleep and needs an
    /// `io_uring_enter` call to resume draining submissions.
    pub fn need_wakeup(&self) -> bool {
        unsafe { (*self.flags).load(atomic::Ordering::Acquire) & sys::IORING_SQ_NEED_WAKEUP != 0 }
    }

    /// The number of invalid submission entries the kernel has rejected.
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.dropped).load(atomic::Ordering::Acquire) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.ring_entries.read() as usize }
    }

    #[inline]
    pub fn len(&self) -> usize {
        unsafe {
            let head = (*self.head).load(atomic::Ordering::Acquire);
            let tail = unsync_load(self.tail);

            tail.wrapping_sub(head) as usize
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Write one entry at `tail & mask`, publish the slot through the index
    /// array, and release-store the advanced tail. The release pairs with
    /// the kernel poller's acquire of the tail: entry contents written here
    /// become visible before the new index does.
    ///
    /// If the ring is full the entry is handed back unchanged.
    pub fn push(&mut self, entry: sys::io_uring_sqe) -> Result<(), sys::io_uring_sqe> {
        if self.is_full() {
            return Err(entry);
        }

        unsafe {
            let tail = unsync_load(self.tail);
            let index = tail & self.ring_mask.read();

            *self.sqes.add(index as usize) = entry;
            self.array.add(index as usize).write_volatile(index);

            (*self.tail).store(tail.wrapping_add(1), atomic::Ordering::Release);
        }

        Ok(())
    }
}

/// Encode one vectored read: `len` iovecs starting at `iovecs`, file
/// offset 0, opaque `tag` echoed back on the completion.
pub(crate) fn prep_readv(
    fd: libc::c_int,
    iovecs: *const libc::iovec,
    len: u32,
    tag: u64,
) -> sys::io_uring_sqe {
    sys::io_uring_sqe {
        opcode: sys::IORING_OP_READV,
        fd,
        addr: iovecs as u64,
        len,
        off: 0,
        user_data: tag,
        ..Default::default()
    }
}
