//! Virtual Space - OS-Backed Page Storage
//!
//! Page-granular view of a [`Reservation`] with its own bookkeeping:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬─────┐
//! │  Page 0  │  Page 1  │  Page 2  │  Page 3  │Tail │ ◄── used_size ends here
//! └──────────┴──────────┴──────────┴──────────┴─────┘
//! base                                          └── only the used prefix
//!                                                   of the last page is
//!                                                   ever committed
//! ```
//!
//! - `committed`: one bit per page, set while the page is backed.
//! - `dirty`: one bit per page, only used for pre-committed ("special")
//!   spaces. Their memory is never returned to the OS, so a page that was
//!   used before is not zero when it is committed again.

use crate::bitmap::CommitBitmap;
use crate::error::{MapperError, Result};
use crate::mapper::MemoryType;
use crate::pretouch::{PretouchExecutor, PretouchReport};
use crate::storage::{Reservation, Storage};
use std::sync::atomic::{AtomicU8, Ordering};

/// VirtualSpace - page storage over an OS reservation
#[derive(Debug)]
pub struct VirtualSpace {
    /// Underlying address range
    reservation: Reservation,

    /// Bytes of the reservation that may be committed
    used_size: usize,

    /// Pages that are currently backed
    committed: CommitBitmap,

    /// Pages whose memory may hold stale data (special spaces only)
    dirty: CommitBitmap,

    /// Memory is pinned and committed up front
    special: bool,

    /// What the space backs, for accounting
    memory_type: MemoryType,

    /// Bytes currently committed
    committed_bytes: usize,
}

impl VirtualSpace {
    /// Reserve a new space of `reserved_size` bytes
    ///
    /// Only `used_size` bytes are ever committed. With `special` set, the
    /// used range is committed immediately and stays backed for the life of
    /// the space.
    pub fn reserve(
        reserved_size: usize,
        used_size: usize,
        page_size: usize,
        memory_type: MemoryType,
        special: bool,
    ) -> Result<Self> {
        if used_size > reserved_size {
            return Err(MapperError::Configuration(format!(
                "used_size {} exceeds reserved_size {}",
                used_size, reserved_size
            )));
        }

        let mut reservation = Reservation::reserve(reserved_size, page_size)?;
        let page_count = reserved_size.div_ceil(page_size);

        if special && used_size > 0 {
            let base = reservation.base();
            reservation
                .commit_range(base, used_size)
                .map_err(|e| out_of_memory(used_size, 0, e))?;
        }

        log::info!(
            "virtual space for {:?}: {} bytes reserved, {} used, page size {}{}",
            memory_type,
            reserved_size,
            used_size,
            page_size,
            if special { ", pinned" } else { "" }
        );

        Ok(Self {
            reservation,
            used_size,
            committed: CommitBitmap::new(page_count),
            dirty: CommitBitmap::new(page_count),
            special,
            memory_type,
            committed_bytes: 0,
        })
    }

    /// Base address
    pub fn base(&self) -> usize {
        self.reservation.base()
    }

    /// Bytes that may be committed
    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// Number of pages that may be committed (the tail page included)
    pub fn committable_pages(&self) -> usize {
        self.used_size.div_ceil(self.reservation.page_size())
    }

    /// Size of the partial last page, 0 if `used_size` is page aligned
    pub fn tail_size(&self) -> usize {
        self.used_size % self.reservation.page_size()
    }

    /// Memory type the space was reserved for
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Whether the memory is pinned and committed up front
    pub fn is_special(&self) -> bool {
        self.special
    }

    /// Check whether `page` is currently committed
    pub fn is_page_committed(&self, page: usize) -> bool {
        page < self.committed.len() && self.committed.at(page)
    }

    /// Number of committed pages
    pub fn committed_pages(&self) -> usize {
        self.committed.count_ones()
    }

    /// Bytes currently committed
    pub fn committed_size(&self) -> usize {
        self.committed_bytes
    }

    /// Check if address lies inside the used part of the reservation
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base() && address < self.base() + self.used_size
    }

    /// Committed bytes of `page`, or None if the page is not committed
    pub fn page_bytes(&self, page: usize) -> Option<&[u8]> {
        if !self.is_page_committed(page) {
            return None;
        }
        let (start, end) = self.page_bounds(page, page + 1);
        // SAFETY: the page is committed read/write and cannot be uncommitted
        // while this shared borrow of the space is alive.
        Some(unsafe { std::slice::from_raw_parts(start as *const u8, end - start) })
    }

    /// Mutable committed bytes of `page`, or None if the page is not committed
    pub fn page_bytes_mut(&mut self, page: usize) -> Option<&mut [u8]> {
        if !self.is_page_committed(page) {
            return None;
        }
        let (start, end) = self.page_bounds(page, page + 1);
        // SAFETY: as in `page_bytes`; the exclusive borrow rules out aliases.
        Some(unsafe { std::slice::from_raw_parts_mut(start as *mut u8, end - start) })
    }

    /// Byte bounds of pages `[start_page, end_page)`, clipped to `used_size`
    fn page_bounds(&self, start_page: usize, end_page: usize) -> (usize, usize) {
        let start = self.page_start(start_page);
        let end = self
            .page_start(end_page)
            .min(self.base() + self.used_size);
        (start, end)
    }

    fn check_pages(&self, start_page: usize, page_count: usize) {
        crate::assert_context!(
            start_page + page_count <= self.committable_pages(),
            "pages [{}, {}) beyond used size ({} committable pages)",
            start_page,
            start_page + page_count,
            self.committable_pages()
        );
    }
}

impl Storage for VirtualSpace {
    fn reserved_size(&self) -> usize {
        self.reservation.size()
    }

    fn page_size(&self) -> usize {
        self.reservation.page_size()
    }

    fn page_start(&self, page: usize) -> usize {
        self.base() + page * self.reservation.page_size()
    }

    fn commit(&mut self, start_page: usize, page_count: usize) -> Result<bool> {
        if page_count == 0 {
            return Ok(true);
        }
        self.check_pages(start_page, page_count);
        let end_page = start_page + page_count;
        crate::assert_context!(
            self.committed.is_range_clear(start_page, end_page),
            "Trying to commit pages [{}, {}) that are already committed",
            start_page,
            end_page
        );

        let (start, end) = self.page_bounds(start_page, end_page);

        let zero_filled = if self.special {
            let zero = self.dirty.is_range_clear(start_page, end_page);
            self.dirty.clear_range(start_page, end_page);
            zero
        } else {
            self.reservation
                .commit_range(start, end - start)
                .map_err(|e| out_of_memory(end - start, start_page, e))?;
            true
        };

        self.committed.set_range(start_page, end_page);
        self.committed_bytes += end - start;

        log::trace!(
            "committed pages [{}, {}) at {:#x}, zero_filled={}",
            start_page,
            end_page,
            start,
            zero_filled
        );

        Ok(zero_filled)
    }

    fn uncommit(&mut self, start_page: usize, page_count: usize) -> Result<()> {
        if page_count == 0 {
            return Ok(());
        }
        self.check_pages(start_page, page_count);
        let end_page = start_page + page_count;
        crate::assert_context!(
            self.committed.is_range_set(start_page, end_page),
            "Trying to uncommit pages [{}, {}) that are not committed",
            start_page,
            end_page
        );

        let (start, end) = self.page_bounds(start_page, end_page);

        if self.special {
            self.dirty.set_range(start_page, end_page);
        } else {
            self.reservation
                .uncommit_range(start, end - start)
                .map_err(|e| {
                    MapperError::Uncommit(format!(
                        "pages [{}, {}) at {:#x}: {}",
                        start_page, end_page, start, e
                    ))
                })?;
        }

        self.committed.clear_range(start_page, end_page);
        self.committed_bytes -= end - start;

        log::trace!("uncommitted pages [{}, {}) at {:#x}", start_page, end_page, start);

        Ok(())
    }

    fn pretouch(
        &self,
        start_page: usize,
        page_count: usize,
        executor: &PretouchExecutor,
    ) -> PretouchReport {
        crate::assert_context!(
            self.committed.is_range_set(start_page, start_page + page_count),
            "Trying to pretouch pages [{}, {}) that are not committed",
            start_page,
            start_page + page_count
        );

        let base = self.base();
        let page_size = self.reservation.page_size();

        executor.run(start_page, page_count, page_size, move |page| {
            let address = base + page * page_size;
            // SAFETY: every page in the range is committed read/write and the
            // first byte of a tail page is inside the used size. Adding zero
            // faults the page in without changing its contents.
            let byte = unsafe { &*(address as *const AtomicU8) };
            byte.fetch_add(0, Ordering::Relaxed);
        })
    }
}

fn out_of_memory(requested: usize, page: usize, err: std::io::Error) -> MapperError {
    log::error!(
        "OS refused to commit {} bytes at page {}: {}",
        requested,
        page,
        err
    );
    MapperError::OutOfMemory { requested, page }
}
