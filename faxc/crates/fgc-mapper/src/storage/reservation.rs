//! Reservation - Raw Address Space From the OS
//!
//! Reserves a contiguous range of virtual addresses that is inaccessible
//! until parts of it are committed. The range is released when the
//! reservation is dropped.
//!
//! Platform Support:
//! - Unix: the range is obtained through `memmap2` and immediately replaced
//!   by a `PROT_NONE` / `MAP_NORESERVE` mapping. Commit maps fresh anonymous
//!   read/write pages over a sub-range with `MAP_FIXED`; uncommit maps a
//!   `PROT_NONE` mapping back. Both discard the previous contents, so a
//!   recommitted page always reads as zero.
//! - Windows: `VirtualAlloc(MEM_RESERVE)` / `MEM_COMMIT` / `VirtualFree
//!   (MEM_DECOMMIT)`.
//!
//! When the requested page size is larger than the OS page size, the
//! reservation is over-allocated by one page and the base is aligned up.

use crate::error::{MapperError, Result};
use crate::storage::{align_up, system_page_size};
use std::io;

/// Reservation - an aligned, initially inaccessible address range
pub struct Reservation {
    /// First usable address (aligned to `page_size`)
    base: usize,

    /// Usable size in bytes
    size: usize,

    /// Alignment and commit unit
    page_size: usize,

    /// Backing mapping; dropping it unmaps the whole range
    #[cfg(unix)]
    _mapping: memmap2::MmapMut,

    /// Start of the OS allocation, released on drop
    #[cfg(windows)]
    allocation: usize,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &self.size)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Reservation {
    /// Reserve `size` bytes aligned to `page_size`
    ///
    /// # Errors
    /// - `Configuration` if `page_size` is smaller than the OS page.
    /// - `VirtualMemory` if the OS cannot provide the address range.
    pub fn reserve(size: usize, page_size: usize) -> Result<Self> {
        if size == 0 || !page_size.is_power_of_two() {
            return Err(MapperError::VirtualMemory(format!(
                "cannot reserve {} bytes with page size {}",
                size, page_size
            )));
        }

        // The OS maps whole pages; a smaller unit would share them.
        let os_page = system_page_size();
        if page_size < os_page {
            return Err(MapperError::Configuration(format!(
                "page size {} is smaller than the OS page size {}",
                page_size, os_page
            )));
        }

        let alignment = page_size.max(os_page);
        let slack = if alignment > os_page { alignment } else { 0 };
        let total = align_up(size, os_page)
            .checked_add(slack)
            .ok_or_else(|| MapperError::VirtualMemory(format!("reservation of {} bytes overflows", size)))?;

        let reservation = os::reserve(total, alignment, size, page_size)?;

        log::debug!(
            "reserved {} bytes at {:#x} (page size {})",
            reservation.size,
            reservation.base,
            reservation.page_size
        );

        Ok(reservation)
    }

    /// First usable address
    pub fn base(&self) -> usize {
        self.base
    }

    /// Usable size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Page size the reservation is aligned to
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// One past the last usable address
    pub fn end(&self) -> usize {
        self.base + self.size
    }

    /// Check if address lies inside the reservation
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }

    /// Make `[address, address + len)` readable and writable
    ///
    /// Taking `&mut self` keeps any borrowed view of the range from
    /// outliving a change of its mapping.
    pub fn commit_range(&mut self, address: usize, len: usize) -> io::Result<()> {
        self.check_range(address, len);
        os::commit(address, len)
    }

    /// Return `[address, address + len)` to the OS and make it inaccessible
    pub fn uncommit_range(&mut self, address: usize, len: usize) -> io::Result<()> {
        self.check_range(address, len);
        os::uncommit(address, len)
    }

    fn check_range(&self, address: usize, len: usize) {
        assert!(
            address >= self.base && address.saturating_add(len) <= self.end(),
            "range [{:#x}, {:#x}) outside reservation [{:#x}, {:#x})",
            address,
            address.saturating_add(len),
            self.base,
            self.end()
        );
    }
}

#[cfg(unix)]
mod os {
    use super::Reservation;
    use crate::error::{MapperError, Result};
    use crate::storage::align_up;
    use memmap2::MmapOptions;
    use std::io;

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    ))]
    const NORESERVE: libc::c_int = libc::MAP_NORESERVE;
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    const NORESERVE: libc::c_int = 0;

    pub(super) fn reserve(total: usize, alignment: usize, size: usize, page_size: usize) -> Result<Reservation> {
        let mapping = MmapOptions::new().len(total).map_anon().map_err(|e| {
            MapperError::VirtualMemory(format!("Failed to reserve {} bytes: {}", total, e))
        })?;

        let raw = mapping.as_ptr() as usize;

        // Drop access to the whole mapping until pages are committed.
        uncommit(raw, total).map_err(|e| {
            MapperError::VirtualMemory(format!("Failed to protect reservation: {}", e))
        })?;

        Ok(Reservation {
            base: align_up(raw, alignment),
            size,
            page_size,
            _mapping: mapping,
        })
    }

    pub(super) fn commit(address: usize, len: usize) -> io::Result<()> {
        // SAFETY: the range lies inside a mapping owned by the reservation,
        // and no references into it exist while the reservation is borrowed
        // mutably.
        let ptr = unsafe {
            libc::mmap(
                address as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn uncommit(address: usize, len: usize) -> io::Result<()> {
        // SAFETY: see `commit`.
        let ptr = unsafe {
            libc::mmap(
                address as *mut libc::c_void,
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_FIXED | NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
mod os {
    use super::Reservation;
    use crate::error::{MapperError, Result};
    use crate::storage::align_up;
    use std::ffi::c_void;
    use std::io;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_NOACCESS, PAGE_READWRITE,
    };

    pub(super) fn reserve(total: usize, alignment: usize, size: usize, page_size: usize) -> Result<Reservation> {
        // SAFETY: reserving fresh address space has no preconditions.
        let ptr = unsafe { VirtualAlloc(std::ptr::null(), total, MEM_RESERVE, PAGE_NOACCESS) };
        if ptr.is_null() {
            return Err(MapperError::VirtualMemory(format!(
                "Failed to reserve {} bytes: {}",
                total,
                io::Error::last_os_error()
            )));
        }

        let raw = ptr as usize;
        Ok(Reservation {
            base: align_up(raw, alignment),
            size,
            page_size,
            allocation: raw,
        })
    }

    pub(super) fn commit(address: usize, len: usize) -> io::Result<()> {
        // SAFETY: the range lies inside the reservation.
        let ptr = unsafe { VirtualAlloc(address as *const c_void, len, MEM_COMMIT, PAGE_READWRITE) };
        if ptr.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn uncommit(address: usize, len: usize) -> io::Result<()> {
        // SAFETY: the range lies inside the reservation.
        if unsafe { VirtualFree(address as *mut c_void, len, MEM_DECOMMIT) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    impl Drop for Reservation {
        fn drop(&mut self) {
            // SAFETY: `allocation` is the pointer returned by VirtualAlloc.
            if unsafe { VirtualFree(self.allocation as *mut c_void, 0, MEM_RELEASE) } == 0 {
                log::warn!(
                    "Failed to release reservation at {:#x}: {}",
                    self.allocation,
                    io::Error::last_os_error()
                );
            }
        }
    }
}
