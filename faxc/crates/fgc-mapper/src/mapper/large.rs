//! Large-Region Strategy
//!
//! Each region is backed by `pages_per_region` whole storage pages and no
//! page is ever shared between regions, so a batch of regions maps onto a
//! single contiguous page range.

use crate::error::{MapperError, Result};
use crate::mapper::{CommitOutcome, MapperCore};
use crate::pretouch::PretouchExecutor;
use crate::storage::Storage;

/// LargeRegions - one or more storage pages per region
#[derive(Debug, Clone)]
pub struct LargeRegions {
    pages_per_region: usize,
}

impl LargeRegions {
    /// `granule` is the region-space size of one storage page
    ///
    /// # Errors
    /// `Configuration` if a region is smaller than a granule or not a
    /// multiple of it.
    pub fn new(region_granularity: usize, granule: usize) -> Result<Self> {
        if granule == 0 || region_granularity < granule || region_granularity % granule != 0 {
            return Err(MapperError::Configuration(format!(
                "region size {} is not a multiple of the commit granule {}",
                region_granularity, granule
            )));
        }
        Ok(Self {
            pages_per_region: region_granularity / granule,
        })
    }

    /// Storage pages backing one region
    pub fn pages_per_region(&self) -> usize {
        self.pages_per_region
    }

    pub(crate) fn commit<S: Storage>(
        &self,
        core: &mut MapperCore<S>,
        start: usize,
        count: usize,
        executor: Option<&PretouchExecutor>,
    ) -> Result<CommitOutcome> {
        let start_page = start * self.pages_per_region;
        let page_count = count * self.pages_per_region;

        let zero_filled = core.storage.commit(start_page, page_count)?;

        let mut outcome = CommitOutcome {
            pages: page_count,
            zero_filled,
            ..Default::default()
        };

        for region in start..start + count {
            let placed = core.place_on_node(region * self.pages_per_region, self.pages_per_region, region);
            if placed > 0 {
                outcome.numa_requests += 1;
                outcome.numa_bytes += placed;
            }
        }

        core.pretouch(start_page, page_count, executor);
        core.commit_map.set_range(start, start + count);

        Ok(outcome)
    }

    /// Returns the number of pages released
    pub(crate) fn uncommit<S: Storage>(
        &self,
        core: &mut MapperCore<S>,
        start: usize,
        count: usize,
    ) -> Result<usize> {
        let start_page = start * self.pages_per_region;
        let page_count = count * self.pages_per_region;

        core.storage.uncommit(start_page, page_count)?;
        core.commit_map.clear_range(start, start + count);

        Ok(page_count)
    }
}
