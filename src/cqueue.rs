//! Completion ring view.

use std::sync::atomic;

use crate::sys;
use crate::util::unsync_load;

/// Live view over the mapped completion ring. Same ownership rules as
/// [`SqRing`](crate::squeue::SqRing): raw pointers into shared memory kept
/// alive by the transport.
pub(crate) struct CqRing {
    head: *const atomic::AtomicU32,
    tail: *const atomic::AtomicU32,
    ring_mask: *const u32,
    overflow: *const atomic::AtomicU32,

    cqes: *const sys::io_uring_cqe,
}

/// One completed operation, copied out of the ring.
///
/// Carries back the opaque tag supplied at submission and a signed result
/// (negative values are negated `errno` codes).
#[derive(Debug, Clone, Copy)]
pub struct Completion(pub(crate) sys::io_uring_cqe);

impl Completion {
    /// The operation result, equivalent to the return value of `readv(2)`.
    #[inline]
    pub fn result(&self) -> i32 {
        self.0.res
    }

    /// The tag set on the submission, echoed back unchanged.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.0.user_data
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.0.flags
    }
}

impl CqRing {
    /// # Safety
    ///
    /// `cq_base` must point at a live completion ring mapping laid out
    /// according to `p.cq_off`.
    pub unsafe fn new(cq_base: *mut libc::c_void, p: &sys::io_uring_params) -> CqRing {
        let base = cq_base.cast::<u8>();

        CqRing {
            head: base.add(p.cq_off.head as usize) as *const atomic::AtomicU32,
            tail: base.add(p.cq_off.tail as usize) as *const atomic::AtomicU32,
            ring_mask: base.add(p.cq_off.ring_mask as usize) as *const u32,
            overflow: base.add(p.cq_off.overflow as usize) as *const atomic::AtomicU32,
            cqes: base.add(p.cq_off.cqes as usize) as *const sys::io_uring_cqe,
        }
    }

    /// The number of events the kernel dropped on a full ring.
    pub fn overflow(&self) -> u32 {
        unsafe { (*self.overflow).load(atomic::Ordering::Acquire) }
    }

    /// Copy out the entry at `head & mask` without consuming it. Repeated
    /// peeks return the same entry until [`advance`](Self::advance) is
    /// called.
    ///
    /// The acquire load of the tail pairs with the kernel's release store:
    /// entry contents produced before the tail bump are fully visible once
    /// the bump is observed here.
    #[inline]
    pub fn peek(&self) -> Option<Completion> {
        unsafe {
            let tail = (*self.tail).load(atomic::Ordering::Acquire);
            let head = unsync_load(self.head);

            if head == tail {
                return None;
            }

            let entry = *self.cqes.add((head & self.ring_mask.read()) as usize);
            Some(Completion(entry))
        }
    }

    /// Advance the head by one and release-store it, handing the slot back
    /// to the kernel. Exactly once per entry consumed: skipping it stalls
    /// the ring, doubling it loses unrelated entries.
    #[inline]
    pub fn advance(&mut self) {
        unsafe {
            let head = unsync_load(self.head);
            (*self.head).store(head.wrapping_add(1), atomic::Ordering::Release);
        }
    }
}
