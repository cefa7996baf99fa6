//! Storage Module - Page-Addressed Virtual Space
//!
//! The mapper never talks to the operating system directly. It drives a
//! [`Storage`]: a reservation split into fixed-size pages that can be
//! committed, uncommitted and pretouched by page index.
//!
//! ```text
//! Reserve ──► Commit ──► Use ──► Uncommit ──► Commit ...
//!    │          │                    │
//!    │          │                    └── mmap(PROT_NONE, MAP_FIXED | MAP_NORESERVE)
//!    │          └── mmap(PROT_READ | PROT_WRITE, MAP_FIXED)
//!    └── mmap(PROT_NONE, MAP_NORESERVE)
//! ```
//!
//! [`VirtualSpace`] is the OS-backed implementation. Tests substitute
//! recording implementations of the trait.

pub mod reservation;
pub mod virtual_space;

pub use reservation::Reservation;
pub use virtual_space::VirtualSpace;

use crate::error::Result;
use crate::pretouch::{PretouchExecutor, PretouchReport};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Page-granular backing store for a mapper
///
/// Page indices are 0-based from the start of the reservation.
pub trait Storage {
    /// Size of the reservation in bytes
    fn reserved_size(&self) -> usize;

    /// Size of one page in bytes
    fn page_size(&self) -> usize;

    /// Address of the first byte of `page`
    fn page_start(&self, page: usize) -> usize;

    /// Back pages `[start_page, start_page + page_count)` with memory
    ///
    /// Returns whether every committed page is guaranteed to read as zero.
    ///
    /// # Errors
    /// `MapperError::OutOfMemory` if the OS refuses the request.
    fn commit(&mut self, start_page: usize, page_count: usize) -> Result<bool>;

    /// Release the memory behind pages `[start_page, start_page + page_count)`
    fn uncommit(&mut self, start_page: usize, page_count: usize) -> Result<()>;

    /// Touch every page of a committed range through `executor`
    fn pretouch(
        &self,
        start_page: usize,
        page_count: usize,
        executor: &PretouchExecutor,
    ) -> PretouchReport;
}

/// System page size (cached)
static SYSTEM_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Get system page size dynamically
///
/// Returns actual system page size from OS.
/// Caches result for performance.
pub fn system_page_size() -> usize {
    let cached = SYSTEM_PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = page_size::get();
    SYSTEM_PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Align value up to a power-of-two boundary
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Align value down to a power-of-two boundary
pub fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}
