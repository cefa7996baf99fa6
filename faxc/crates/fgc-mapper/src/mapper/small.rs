//! Small-Region Strategy
//!
//! `regions_per_page` regions share one storage page. A per-page refcount
//! holds the number of committed regions on the page; the page is backed
//! exactly while its refcount is non-zero.

use crate::biased_array::BiasedMappedArray;
use crate::error::{MapperError, Result};
use crate::mapper::{CommitOutcome, MapperCore};
use crate::pretouch::PretouchExecutor;
use crate::storage::{align_up, Storage};

/// SmallRegions - several regions per storage page
#[derive(Debug, Clone)]
pub struct SmallRegions {
    regions_per_page: usize,

    /// Committed regions per storage page
    refcounts: BiasedMappedArray<u32>,
}

impl SmallRegions {
    /// `granule` is the region-space size of one storage page
    ///
    /// # Errors
    /// `Configuration` if a granule is smaller than a region or not a
    /// multiple of it.
    pub fn new<S: Storage>(storage: &S, region_granularity: usize, granule: usize) -> Result<Self> {
        if region_granularity == 0 || granule < region_granularity || granule % region_granularity != 0 {
            return Err(MapperError::Configuration(format!(
                "commit granule {} is not a multiple of the region size {}",
                granule, region_granularity
            )));
        }

        let page_size = storage.page_size();
        let base = storage.page_start(0);
        let end = base + align_up(storage.reserved_size(), page_size);

        Ok(Self {
            regions_per_page: granule / region_granularity,
            refcounts: BiasedMappedArray::new(base, end, page_size),
        })
    }

    /// Regions sharing one storage page
    pub fn regions_per_page(&self) -> usize {
        self.regions_per_page
    }

    /// Refcount of `page`, None outside the table
    pub fn refcount(&self, page: usize) -> Option<u32> {
        (page < self.refcounts.len()).then(|| self.refcounts.get_by_index(page))
    }

    pub(crate) fn commit<S: Storage>(
        &mut self,
        core: &mut MapperCore<S>,
        start: usize,
        count: usize,
        executor: Option<&PretouchExecutor>,
    ) -> Result<CommitOutcome> {
        let mut outcome = CommitOutcome {
            zero_filled: true,
            ..Default::default()
        };
        let mut first_new: Option<usize> = None;
        let mut last_new = 0;

        for region in start..start + count {
            let page = region / self.regions_per_page;
            let refs = self.refcounts.get_by_index(page);

            if refs == 0 {
                outcome.zero_filled &= core.storage.commit(page, 1)?;
                outcome.pages += 1;

                let placed = core.place_on_node(page, 1, region);
                if placed > 0 {
                    outcome.numa_requests += 1;
                    outcome.numa_bytes += placed;
                }

                first_new.get_or_insert(page);
                last_new = page;
                log::trace!(
                    "committed page {} at {:#x} for region {}",
                    page,
                    self.refcounts.address_of(page),
                    region
                );
            } else if first_new.is_none() || page != last_new {
                // Backed before this call; its contents are unknown.
                outcome.zero_filled = false;
            }

            self.refcounts.set_by_index(page, refs + 1);
            core.commit_map.set_bit(region);
        }

        if let Some(first) = first_new {
            core.pretouch(first, last_new - first + 1, executor);
        }

        Ok(outcome)
    }

    /// Returns the number of pages released
    pub(crate) fn uncommit<S: Storage>(
        &mut self,
        core: &mut MapperCore<S>,
        start: usize,
        count: usize,
    ) -> Result<usize> {
        let mut released = 0;

        for region in start..start + count {
            let page = region / self.regions_per_page;
            let refs = self.refcounts.get_by_index(page);
            debug_assert!(refs > 0, "page {} of committed region {} has no references", page, region);

            if refs == 1 {
                core.storage.uncommit(page, 1)?;
                released += 1;
                log::trace!(
                    "uncommitted page {} at {:#x} with region {}",
                    page,
                    self.refcounts.address_of(page),
                    region
                );
            }

            self.refcounts.set_by_index(page, refs - 1);
            core.commit_map.clear_bit(region);
        }

        Ok(released)
    }
}
