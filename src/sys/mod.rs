//! Raw io_uring system call wrappers.
//!
//! Wrapped by hand over `libc::syscall`; with SQPOLL enabled, `enter` is
//! only ever used to wake the kernel poller back up.

#![allow(clippy::missing_safety_doc)]

mod abi;

pub use abi::*;

use libc::{c_int, c_long, c_uint, syscall};
use std::ptr;

pub unsafe fn io_uring_setup(entries: c_uint, p: *mut io_uring_params) -> c_int {
    syscall(libc::SYS_io_uring_setup, entries as c_long, p as c_long) as _
}

pub unsafe fn io_uring_enter(
    fd: c_int,
    to_submit: c_uint,
    min_complete: c_uint,
    flags: c_uint,
) -> c_int {
    syscall(
        libc::SYS_io_uring_enter,
        fd as c_long,
        to_submit as c_long,
        min_complete as c_long,
        flags as c_long,
        ptr::null::<libc::sigset_t>() as c_long,
        0 as c_long,
    ) as _
}
