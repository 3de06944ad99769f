//! Kernel ABI for io_uring, transcribed from `<linux/io_uring.h>`.
//!
//! Field order and sizes here must match the kernel bit-for-bit; the rings
//! are shared memory and the kernel reads these structs in place.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

/// Offsets into the submission ring mapping, reported by `io_uring_setup`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_sqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// Offsets into the completion ring mapping, reported by `io_uring_setup`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_cqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// Setup parameters passed to and filled in by `io_uring_setup`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_uring_params {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: io_sqring_offsets,
    pub cq_off: io_cqring_offsets,
}

/// One submission queue entry. 64 bytes.
///
/// The kernel header expresses several of these fields as unions; the
/// flattened layout below picks the member this crate uses and keeps the
/// exact byte offsets.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_uring_sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    /// union { off, addr2 }
    pub off: u64,
    /// union { addr, splice_off_in }
    pub addr: u64,
    pub len: u32,
    /// union of the per-opcode flags (rw_flags, fsync_flags, ...)
    pub op_flags: u32,
    pub user_data: u64,
    /// union { buf_index, buf_group }
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub __pad2: [u64; 2],
}

/// One completion queue entry. 16 bytes.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct io_uring_cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

pub const IORING_OP_NOP: u8 = 0;
pub const IORING_OP_READV: u8 = 1;

pub const IORING_SETUP_IOPOLL: u32 = 1 << 0;
pub const IORING_SETUP_SQPOLL: u32 = 1 << 1;
pub const IORING_SETUP_SQ_AFF: u32 = 1 << 2;
pub const IORING_SETUP_CQSIZE: u32 = 1 << 3;
pub const IORING_SETUP_CLAMP: u32 = 1 << 4;

pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
pub const IORING_FEAT_NODROP: u32 = 1 << 1;
pub const IORING_FEAT_SQPOLL_NONFIXED: u32 = 1 << 7;

pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;

pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
pub const IORING_ENTER_SQ_WAKEUP: u32 = 1 << 1;

pub const IORING_OFF_SQ_RING: libc::off_t = 0;
pub const IORING_OFF_CQ_RING: libc::off_t = 0x800_0000;
pub const IORING_OFF_SQES: libc::off_t = 0x1000_0000;
