//! Test Utilities for the Mapper Test Suite
//!
//! Recording doubles for every collaborator of a mapper, so tests can
//! assert the exact storage, NUMA and listener traffic of each operation.

#![allow(dead_code)]

use fgc_mapper::{
    CommitListener, MapperConfig, MapperError, MemoryType, NumaAdvisor, PretouchExecutor,
    PretouchReport, RegionMapper, Result, Storage,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

/// Page size used by the recording doubles (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Fake base address of recording storage
pub const BASE: usize = 0x7f00_0000_0000;

// ============================================================================
// RECORDING STORAGE
// ============================================================================

/// One call made on a [`RecordingStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCall {
    Commit { start: usize, count: usize },
    Uncommit { start: usize, count: usize },
    Pretouch { start: usize, count: usize },
}

/// Storage that keeps page state in memory and records every call
#[derive(Debug)]
pub struct RecordingStorage {
    reserved_size: usize,
    page_size: usize,
    committed: BTreeSet<usize>,
    calls: Mutex<Vec<StorageCall>>,

    /// Value reported by every commit
    pub zero_filled: bool,

    /// Commits covering this page fail with OutOfMemory
    pub fail_commit_at: Option<usize>,
}

impl RecordingStorage {
    pub fn new(reserved_size: usize) -> Self {
        Self::with_page_size(reserved_size, PAGE_SIZE)
    }

    pub fn with_page_size(reserved_size: usize, page_size: usize) -> Self {
        Self {
            reserved_size,
            page_size,
            committed: BTreeSet::new(),
            calls: Mutex::new(Vec::new()),
            zero_filled: true,
            fail_commit_at: None,
        }
    }

    /// All calls so far
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    /// Commit calls only
    pub fn commits(&self) -> Vec<(usize, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::Commit { start, count } => Some((start, count)),
                _ => None,
            })
            .collect()
    }

    /// Uncommit calls only
    pub fn uncommits(&self) -> Vec<(usize, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::Uncommit { start, count } => Some((start, count)),
                _ => None,
            })
            .collect()
    }

    /// Pretouch calls only
    pub fn pretouches(&self) -> Vec<(usize, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::Pretouch { start, count } => Some((start, count)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Pages currently committed
    pub fn committed_pages(&self) -> Vec<usize> {
        self.committed.iter().copied().collect()
    }

    pub fn is_page_committed(&self, page: usize) -> bool {
        self.committed.contains(&page)
    }
}

impl Storage for RecordingStorage {
    fn reserved_size(&self) -> usize {
        self.reserved_size
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_start(&self, page: usize) -> usize {
        BASE + page * self.page_size
    }

    fn commit(&mut self, start_page: usize, page_count: usize) -> Result<bool> {
        self.calls.lock().push(StorageCall::Commit {
            start: start_page,
            count: page_count,
        });

        let pages = start_page..start_page + page_count;
        if let Some(page) = self.fail_commit_at.filter(|page| pages.contains(page)) {
            return Err(MapperError::OutOfMemory {
                requested: page_count * self.page_size,
                page,
            });
        }

        for page in pages {
            assert!(self.committed.insert(page), "page {} committed twice", page);
        }
        Ok(self.zero_filled)
    }

    fn uncommit(&mut self, start_page: usize, page_count: usize) -> Result<()> {
        self.calls.lock().push(StorageCall::Uncommit {
            start: start_page,
            count: page_count,
        });

        for page in start_page..start_page + page_count {
            assert!(self.committed.remove(&page), "page {} uncommitted twice", page);
        }
        Ok(())
    }

    fn pretouch(
        &self,
        start_page: usize,
        page_count: usize,
        executor: &PretouchExecutor,
    ) -> PretouchReport {
        self.calls.lock().push(StorageCall::Pretouch {
            start: start_page,
            count: page_count,
        });

        executor.run(start_page, page_count, self.page_size, |page| {
            assert!(self.committed.contains(&page), "pretouch of uncommitted page {}", page);
        })
    }
}

// ============================================================================
// RECORDING COLLABORATORS
// ============================================================================

/// NUMA advisor that records every request as `(address, size, region)`
#[derive(Debug, Default)]
pub struct RecordingNuma {
    requests: Mutex<Vec<(usize, usize, usize)>>,
}

impl RecordingNuma {
    pub fn requests(&self) -> Vec<(usize, usize, usize)> {
        self.requests.lock().clone()
    }
}

impl NumaAdvisor for RecordingNuma {
    fn request_memory_on_node(&self, address: usize, size: usize, region_index: usize) {
        self.requests.lock().push((address, size, region_index));
    }
}

/// Listener that records every notification as `(start, count, zero_filled)`
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(usize, usize, bool)>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<(usize, usize, bool)> {
        self.events.lock().clone()
    }
}

impl CommitListener for RecordingListener {
    fn on_commit(&self, start_region: usize, count: usize, zero_filled: bool) {
        self.events.lock().push((start_region, count, zero_filled));
    }
}

// ============================================================================
// MAPPER FIXTURE
// ============================================================================

/// Configuration over 4KB pages with `num_regions` regions of `region_size` bytes
pub fn config(num_regions: usize, region_size: usize, commit_factor: usize) -> MapperConfig {
    let reserved_size = num_regions * region_size / commit_factor;
    MapperConfig {
        reserved_size,
        used_size: reserved_size,
        page_size: PAGE_SIZE,
        region_granularity: region_size,
        commit_factor,
        memory_type: MemoryType::Heap,
        numa_aware: false,
        always_pretouch: false,
        ..Default::default()
    }
}

/// Mapper over recording storage with recording NUMA advisor and listener
pub struct MapperFixture {
    pub mapper: RegionMapper<RecordingStorage>,
    pub numa: Arc<RecordingNuma>,
    pub listener: Arc<RecordingListener>,
}

impl MapperFixture {
    pub fn new(config: &MapperConfig) -> Self {
        Self::with_storage(RecordingStorage::new(config.reserved_size), config)
    }

    pub fn with_storage(storage: RecordingStorage, config: &MapperConfig) -> Self {
        let numa = Arc::new(RecordingNuma::default());
        let listener = Arc::new(RecordingListener::default());

        let mut mapper = RegionMapper::create(storage, config)
            .expect("fixture configuration must be valid")
            .with_numa(numa.clone());
        let weak: Weak<dyn CommitListener> = Arc::downgrade(&listener) as Weak<dyn CommitListener>;
        mapper.set_listener(weak);

        Self {
            mapper,
            numa,
            listener,
        }
    }

    pub fn storage(&self) -> &RecordingStorage {
        self.mapper.storage()
    }

    /// Every bit, refcount and storage page agrees
    pub fn assert_consistent(&self) {
        let mapper = &self.mapper;
        match mapper.granule_refcount(0) {
            None => {
                // Large regions: a page is committed iff its region is.
                let per_region = self.storage().reserved_size() / mapper.num_regions();
                let pages_per_region = per_region / self.storage().page_size();
                for region in 0..mapper.num_regions() {
                    for page in region * pages_per_region..(region + 1) * pages_per_region {
                        assert_eq!(
                            self.storage().is_page_committed(page),
                            mapper.is_committed(region),
                            "page {} of region {}",
                            page,
                            region
                        );
                    }
                }
            },
            Some(_) => {
                let pages = self.storage().reserved_size() / self.storage().page_size();
                let per_page = mapper.num_regions() / pages;
                for page in 0..pages {
                    let committed = (page * per_page..(page + 1) * per_page)
                        .filter(|&region| mapper.is_committed(region))
                        .count();
                    assert_eq!(mapper.granule_refcount(page), Some(committed as u32), "page {}", page);
                    assert_eq!(self.storage().is_page_committed(page), committed > 0, "page {}", page);
                }
            },
        }
    }
}
