//! One outstanding read request: the file size and its aligned scatter list.

use std::{ptr, slice};

use crate::error::{Result, RingError};
use crate::BLOCK_SZ;

/// Describes one vectored read: an ordered list of block buffers covering
/// the whole file, plus the logical file size.
///
/// Every buffer is a `BLOCK_SZ`-aligned allocation of `BLOCK_SZ` physical
/// bytes, because the kernel side performs direct memory access into them.
/// The logical length (`iov_len`) is `BLOCK_SZ` for every block except
/// possibly the last. The iovec array itself lives on the heap and its
/// address stays stable for the lifetime of the descriptor, so the kernel
/// can keep referring to it while the request is in flight.
pub struct RequestDescriptor {
    file_size: u64,
    iovecs: Vec<libc::iovec>,
}

impl RequestDescriptor {
    /// Allocate `ceil(file_size / BLOCK_SZ)` aligned block buffers.
    pub fn allocate(file_size: u64) -> Result<RequestDescriptor> {
        let block_count = (file_size as usize + BLOCK_SZ - 1) / BLOCK_SZ;
        let mut iovecs: Vec<libc::iovec> = Vec::with_capacity(block_count);
        let mut bytes_remaining = file_size as usize;

        while bytes_remaining > 0 {
            let bytes_to_read = bytes_remaining.min(BLOCK_SZ);

            let mut buf: *mut libc::c_void = ptr::null_mut();
            let rc = unsafe { libc::posix_memalign(&mut buf, BLOCK_SZ, BLOCK_SZ) };
            if rc != 0 {
                for iov in &iovecs {
                    unsafe { libc::free(iov.iov_base) };
                }
                return Err(RingError::Allocation);
            }

            iovecs.push(libc::iovec {
                iov_base: buf,
                iov_len: bytes_to_read,
            });
            bytes_remaining -= bytes_to_read;
        }

        Ok(RequestDescriptor { file_size, iovecs })
    }

    #[inline]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.iovecs.len()
    }

    /// Logical byte count of block `index`.
    #[inline]
    pub fn block_len(&self, index: usize) -> usize {
        self.iovecs[index].iov_len
    }

    /// The logical bytes of block `index`. Only meaningful once the
    /// completion for the request has been observed.
    #[inline]
    pub fn block(&self, index: usize) -> &[u8] {
        let iov = &self.iovecs[index];
        unsafe { slice::from_raw_parts(iov.iov_base as *const u8, iov.iov_len) }
    }

    /// The scatter list handed to the kernel.
    #[inline]
    pub fn as_iovecs(&self) -> &[libc::iovec] {
        &self.iovecs
    }

    #[cfg(test)]
    pub(crate) fn block_mut(&mut self, index: usize) -> &mut [u8] {
        let iov = &self.iovecs[index];
        unsafe { slice::from_raw_parts_mut(iov.iov_base as *mut u8, iov.iov_len) }
    }
}

impl Drop for RequestDescriptor {
    fn drop(&mut self) {
        for iov in &self.iovecs {
            unsafe { libc::free(iov.iov_base) };
        }
    }
}
