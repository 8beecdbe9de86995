//! # Virtual Memory Helpers
//!
//! Page size discovery and virtual address range reservation.
//!
//! A segment is always mapped into a range that somebody reserved beforehand.
//! `VmRegion` is that reservation: an anonymous `PROT_NONE` mapping with
//! `MAP_NORESERVE`, so it consumes address space but neither memory nor swap.
//! The storage engine later maps block files over parts of it with
//! `MAP_FIXED` and, when it lets go of them, puts a fresh reservation back in
//! their place via [`restore_reservation`].

use std::ptr::NonNull;

use eyre::{bail, ensure, Result};

/// Returns the OS page size.
pub fn page_size() -> Result<usize> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    ensure!(size > 0, "failed to query the system page size");
    Ok(size as usize)
}

pub fn is_aligned(value: usize, page_size: usize) -> bool {
    page_size > 0 && value % page_size == 0
}

pub fn align_up(value: usize, page_size: usize) -> usize {
    value.div_ceil(page_size) * page_size
}

/// A reserved, inaccessible range of virtual address space.
#[derive(Debug)]
pub struct VmRegion {
    addr: NonNull<u8>,
    len: usize,
}

impl VmRegion {
    /// Reserves `len` bytes of address space. `len` must be a non-zero
    /// multiple of the page size.
    pub fn reserve(len: usize) -> Result<Self> {
        let page_size = page_size()?;
        ensure!(
            len > 0 && is_aligned(len, page_size),
            "reservation size {} is not a non-zero multiple of page size {}",
            len,
            page_size
        );

        // SAFETY: a fresh anonymous PROT_NONE mapping at a kernel-chosen
        // address cannot alias any existing Rust object.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            bail!(
                "failed to reserve {} bytes of address space: {}",
                len,
                std::io::Error::last_os_error()
            );
        }

        let addr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| eyre::eyre!("mmap returned a null reservation"))?;

        Ok(Self { addr, len })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for VmRegion {
    fn drop(&mut self) {
        // SAFETY: addr/len describe exactly the range reserved in `reserve`;
        // anything mapped over it since then belongs to this range too.
        unsafe {
            libc::munmap(self.addr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// Replaces `[addr, addr + len)` with an inaccessible reservation, dropping
/// whatever mapping was there.
///
/// # Safety
///
/// The caller must own the range and no live references into it may exist.
pub unsafe fn restore_reservation(addr: NonNull<u8>, len: usize) -> Result<()> {
    let ptr = libc::mmap(
        addr.as_ptr() as *mut libc::c_void,
        len,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_FIXED,
        -1,
        0,
    );

    if ptr == libc::MAP_FAILED {
        bail!(
            "failed to restore reservation at {:p} ({} bytes): {}",
            addr.as_ptr(),
            len,
            std::io::Error::last_os_error()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size().unwrap();

        assert!(size >= 512);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn align_up_rounds_to_page() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }

    #[test]
    fn is_aligned_rejects_zero_page_size() {
        assert!(!is_aligned(4096, 0));
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(100, 4096));
    }

    #[test]
    fn reserve_returns_page_aligned_region() {
        let page = page_size().unwrap();
        let region = VmRegion::reserve(page * 16).unwrap();

        assert_eq!(region.len(), page * 16);
        assert!(is_aligned(region.as_ptr().as_ptr() as usize, page));
    }

    #[test]
    fn reserve_rejects_unaligned_size() {
        let page = page_size().unwrap();

        assert!(VmRegion::reserve(page + 1).is_err());
        assert!(VmRegion::reserve(0).is_err());
    }

    #[test]
    fn restore_reservation_keeps_range_reserved() {
        let page = page_size().unwrap();
        let region = VmRegion::reserve(page * 4).unwrap();

        unsafe { restore_reservation(region.as_ptr(), page * 2).unwrap() };

        assert_eq!(region.len(), page * 4);
    }
}
