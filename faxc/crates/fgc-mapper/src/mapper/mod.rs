//! Mapper Module - Region-to-Space Mapping
//!
//! A reservation is split into equal-sized regions. The mapper commits and
//! uncommits them through a page-granular [`Storage`], keeps one bit per
//! region and notifies a listener after every commit.
//!
//! Two granularities have to be reconciled, the region size and the OS commit
//! granule (`page_size * commit_factor` bytes of region space, backed by one
//! storage page):
//!
//! ```text
//! Large regions (region >= granule)       Small regions (region < granule)
//!
//! │ region 0  │ region 1  │               │r0│r1│r2│r3│r4│r5│r6│r7│
//! ├──┬──┬──┬──┼──┬──┬──┬──┤               ├───────────┼───────────┤
//! │p0│p1│p2│p3│p4│p5│p6│p7│               │  page 0   │  page 1   │
//!                                         refcount: number of committed
//! pages are never shared                  regions on the page
//! ```
//!
//! The strategy is picked once, at construction, from the configuration.
//! Commit and uncommit take `&mut self`; callers that share a mapper wrap it
//! in a lock ([`SharedMapper`]).

pub mod large;
pub mod small;

pub use large::LargeRegions;
pub use small::SmallRegions;

use crate::bitmap::CommitBitmap;
use crate::config::{ConfigError, MapperConfig};
use crate::error::{MapperError, Result};
use crate::logging::{self, MapperEvent};
use crate::numa::{NumaAdvisor, NumaManager};
use crate::pretouch::PretouchExecutor;
use crate::stats::MapperStats;
use crate::storage::{Storage, VirtualSpace};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// What a mapped reservation holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    /// Java-style object heap; the only NUMA-placed type
    Heap,
    /// Marking bitmap
    MarkBitmap,
    /// Card table
    CardTable,
    /// Block offset table
    OffsetTable,
    /// Any other side data structure
    Auxiliary,
}

impl MemoryType {
    /// Whether commits of this type are handed to the NUMA advisor
    pub fn is_numa_placed(self) -> bool {
        matches!(self, MemoryType::Heap)
    }
}

/// Receives one notification per successful commit
///
/// `zero_filled` is true only if every byte of the committed regions is
/// guaranteed to read as zero. With small regions, several regions placed
/// on a page committed by the same call still report true; a conservative
/// reading would report false for every region after the first on a page.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, start_region: usize, count: usize, zero_filled: bool);
}

/// Which commit strategy a mapper uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategyKind {
    /// Each region spans one or more whole storage pages
    LargeRegions,
    /// Several regions share one storage page
    SmallRegions,
}

/// Mapper shared behind a lock
pub type SharedMapper<S> = Arc<parking_lot::Mutex<RegionMapper<S>>>;

/// State both strategies operate on
pub(crate) struct MapperCore<S> {
    pub(crate) storage: S,
    pub(crate) region_granularity: usize,
    pub(crate) commit_map: CommitBitmap,
    pub(crate) memory_type: MemoryType,
    pub(crate) numa: Arc<dyn NumaAdvisor>,
    pub(crate) always_pretouch: bool,
    pub(crate) stats: MapperStats,
}

impl<S: Storage> MapperCore<S> {
    /// Ask for NUMA placement of `pages` pages from `first_page`, heap only
    ///
    /// Returns the number of bytes placed.
    pub(crate) fn place_on_node(&self, first_page: usize, pages: usize, region: usize) -> usize {
        if !self.memory_type.is_numa_placed() {
            return 0;
        }
        let size = self.storage.page_size() * pages;
        self.numa
            .request_memory_on_node(self.storage.page_start(first_page), size, region);
        size
    }

    /// Pretouch freshly committed pages if enabled and an executor is given
    pub(crate) fn pretouch(
        &self,
        start_page: usize,
        page_count: usize,
        executor: Option<&PretouchExecutor>,
    ) {
        let executor = match executor {
            Some(executor) if self.always_pretouch && page_count > 0 => executor,
            _ => return,
        };

        let report = self.storage.pretouch(start_page, page_count, executor);
        self.stats.record_pretouch(report.pages);
        logging::log_event(MapperEvent::Pretouch {
            pages: report.pages,
            workers: report.workers,
            duration: report.duration,
        });
    }
}

/// What one strategy commit did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommitOutcome {
    /// Storage pages physically committed
    pub(crate) pages: usize,
    /// Every committed byte reads as zero
    pub(crate) zero_filled: bool,
    /// NUMA placement requests issued
    pub(crate) numa_requests: usize,
    /// Bytes covered by those requests
    pub(crate) numa_bytes: usize,
}

enum Strategy {
    Large(LargeRegions),
    Small(SmallRegions),
}

/// RegionMapper - commits regions of a reservation onto physical memory
///
/// # Examples
///
/// ```rust
/// use fgc_mapper::{MapperConfig, MemoryType, RegionMapper};
///
/// let config = MapperConfig {
///     reserved_size: 8 * 1024 * 1024,
///     used_size: 8 * 1024 * 1024,
///     region_granularity: 1024 * 1024,
///     memory_type: MemoryType::Auxiliary,
///     ..Default::default()
/// };
///
/// let mut mapper = RegionMapper::reserve(&config).unwrap();
/// mapper.commit_regions(2, 3, None).unwrap();
/// assert!(mapper.is_committed(3));
/// assert_eq!(mapper.committed_regions(), 3);
///
/// mapper.uncommit_regions(2, 3).unwrap();
/// assert_eq!(mapper.committed_regions(), 0);
/// ```
pub struct RegionMapper<S: Storage> {
    core: MapperCore<S>,
    strategy: Strategy,
    listener: Option<Weak<dyn CommitListener>>,
}

impl RegionMapper<VirtualSpace> {
    /// Reserve OS address space for `config` and build a mapper over it
    ///
    /// # Errors
    /// `Configuration` for an invalid configuration, `VirtualMemory` if the
    /// address space cannot be reserved, `OutOfMemory` if pre-committed
    /// memory cannot be backed.
    pub fn reserve(config: &MapperConfig) -> Result<Self> {
        config.validate()?;
        let storage = VirtualSpace::reserve(
            config.reserved_size,
            config.used_size,
            config.page_size,
            config.memory_type,
            config.pre_committed,
        )?;
        Self::create(storage, config)
    }
}

impl<S: Storage> RegionMapper<S> {
    /// Build a mapper over `storage`, picking the strategy from the sizes
    pub fn create(storage: S, config: &MapperConfig) -> Result<Self> {
        let kind = if config.uses_large_regions() {
            StrategyKind::LargeRegions
        } else {
            StrategyKind::SmallRegions
        };
        Self::create_with_strategy(storage, config, kind)
    }

    /// Build a mapper with an explicit strategy
    ///
    /// # Errors
    /// `Configuration` if the configuration is invalid, does not match the
    /// storage, or its sizes do not suit `kind`.
    pub fn create_with_strategy(storage: S, config: &MapperConfig, kind: StrategyKind) -> Result<Self> {
        config.validate()?;

        if storage.page_size() != config.page_size {
            return Err(ConfigError::StorageMismatch(format!(
                "storage page size {} differs from configured {}",
                storage.page_size(),
                config.page_size
            ))
            .into());
        }
        if storage.reserved_size() != config.reserved_size {
            return Err(ConfigError::StorageMismatch(format!(
                "storage reserves {} bytes, configuration {}",
                storage.reserved_size(),
                config.reserved_size
            ))
            .into());
        }

        let granule = config.granule_size().ok_or_else(|| {
            MapperError::Configuration("commit granule overflows".to_string())
        })?;

        let strategy = match kind {
            StrategyKind::LargeRegions => {
                Strategy::Large(LargeRegions::new(config.region_granularity, granule)?)
            },
            StrategyKind::SmallRegions => {
                Strategy::Small(SmallRegions::new(&storage, config.region_granularity, granule)?)
            },
        };

        let numa: Arc<dyn NumaAdvisor> = if config.numa_aware && config.memory_type.is_numa_placed() {
            Arc::new(NumaManager::detect())
        } else {
            Arc::new(NumaManager::single_node())
        };

        let num_regions = config.num_regions();

        log::info!(
            "{:?} mapper: {} regions of {} bytes over {} byte pages ({:?})",
            config.memory_type,
            num_regions,
            config.region_granularity,
            config.page_size,
            kind
        );
        logging::log_event(MapperEvent::Reserve {
            memory_type: config.memory_type,
            reserved_bytes: config.reserved_size,
            page_size: config.page_size,
            num_regions,
        });

        Ok(Self {
            core: MapperCore {
                storage,
                region_granularity: config.region_granularity,
                commit_map: CommitBitmap::new(num_regions),
                memory_type: config.memory_type,
                numa,
                always_pretouch: config.always_pretouch,
                stats: MapperStats::new(),
            },
            strategy,
            listener: None,
        })
    }

    /// Replace the NUMA advisor
    pub fn with_numa(mut self, numa: Arc<dyn NumaAdvisor>) -> Self {
        self.core.numa = numa;
        self
    }

    /// Bind the commit listener
    ///
    /// # Panics
    /// If a listener is already bound.
    pub fn set_listener(&mut self, listener: Weak<dyn CommitListener>) {
        crate::assert_context!(
            self.listener.is_none(),
            "a commit listener is already bound to the {:?} mapper",
            self.core.memory_type
        );
        self.listener = Some(listener);
    }

    /// Wrap the mapper for use from several threads
    pub fn into_shared(self) -> SharedMapper<S> {
        Arc::new(parking_lot::Mutex::new(self))
    }

    /// Commit regions `[start, start + count)`
    ///
    /// Pages are pretouched through `executor` when the mapper was configured
    /// with `always_pretouch`. The listener is notified once on success.
    ///
    /// # Errors
    /// `OutOfMemory` if storage cannot back the regions. Nothing is rolled
    /// back: with small regions, regions of the batch committed before the
    /// failure stay committed.
    ///
    /// # Panics
    /// If the range is out of bounds or any region in it is committed.
    pub fn commit_regions(
        &mut self,
        start: usize,
        count: usize,
        executor: Option<&PretouchExecutor>,
    ) -> Result<()> {
        let end = self.check_range(start, count);
        crate::assert_context!(
            self.core.commit_map.is_range_clear(start, end),
            "region {} in [{}, {}) is already committed",
            self.core.commit_map.find_first_set(start, end).unwrap_or(start),
            start,
            end
        );

        if count == 0 {
            self.core.stats.record_commit(0, 0);
            self.fire_on_commit(start, 0, true);
            return Ok(());
        }

        let result = match &mut self.strategy {
            Strategy::Large(large) => large.commit(&mut self.core, start, count, executor),
            Strategy::Small(small) => small.commit(&mut self.core, start, count, executor),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.core.stats.record_commit_failure();
                logging::log_event(MapperEvent::CommitFailure {
                    memory_type: self.core.memory_type,
                    start,
                    count,
                    reason: e.to_string(),
                });
                return Err(e);
            },
        };

        self.core.stats.record_commit(count, outcome.pages);
        if outcome.numa_requests > 0 {
            self.core.stats.record_numa_requests(outcome.numa_requests);
            logging::log_event(MapperEvent::NumaPlacement {
                requests: outcome.numa_requests,
                bytes: outcome.numa_bytes,
            });
        }

        log::debug!(
            "{:?}: committed regions [{}, {}), {} new pages, zero_filled={}",
            self.core.memory_type,
            start,
            end,
            outcome.pages,
            outcome.zero_filled
        );
        logging::log_event(MapperEvent::Commit {
            memory_type: self.core.memory_type,
            start,
            count,
            pages: outcome.pages,
            zero_filled: outcome.zero_filled,
        });

        self.fire_on_commit(start, count, outcome.zero_filled);
        Ok(())
    }

    /// Uncommit regions `[start, start + count)`
    ///
    /// # Errors
    /// `Uncommit` if storage cannot release the memory.
    ///
    /// # Panics
    /// If the range is out of bounds or any region in it is not committed.
    pub fn uncommit_regions(&mut self, start: usize, count: usize) -> Result<()> {
        let end = self.check_range(start, count);
        crate::assert_context!(
            self.core.commit_map.is_range_set(start, end),
            "region {} in [{}, {}) is not committed",
            (start..end)
                .find(|&region| !self.core.commit_map.at(region))
                .unwrap_or(start),
            start,
            end
        );

        let pages = match &mut self.strategy {
            Strategy::Large(large) => large.uncommit(&mut self.core, start, count)?,
            Strategy::Small(small) => small.uncommit(&mut self.core, start, count)?,
        };

        self.core.stats.record_uncommit(count, pages);

        log::debug!(
            "{:?}: uncommitted regions [{}, {}), {} pages released",
            self.core.memory_type,
            start,
            end,
            pages
        );
        logging::log_event(MapperEvent::Uncommit {
            memory_type: self.core.memory_type,
            start,
            count,
            pages,
        });

        Ok(())
    }

    fn check_range(&self, start: usize, count: usize) -> usize {
        let num_regions = self.num_regions();
        crate::assert_context!(
            start.checked_add(count).is_some_and(|end| end <= num_regions),
            "regions [{}, +{}) out of range for {} regions",
            start,
            count,
            num_regions
        );
        start + count
    }

    fn fire_on_commit(&self, start: usize, count: usize, zero_filled: bool) {
        if let Some(listener) = self.listener.as_ref().and_then(Weak::upgrade) {
            listener.on_commit(start, count, zero_filled);
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Check if `region` is committed; false for out-of-range indices
    pub fn is_committed(&self, region: usize) -> bool {
        region < self.num_regions() && self.core.commit_map.at(region)
    }

    /// Number of regions
    pub fn num_regions(&self) -> usize {
        self.core.commit_map.len()
    }

    /// Number of committed regions
    pub fn committed_regions(&self) -> usize {
        self.core.commit_map.count_ones()
    }

    /// Indices of committed regions, ascending
    pub fn committed_region_indices(&self) -> Vec<usize> {
        self.core.commit_map.iter_ones().collect()
    }

    /// Region size in bytes
    pub fn region_granularity(&self) -> usize {
        self.core.region_granularity
    }

    /// Memory type
    pub fn memory_type(&self) -> MemoryType {
        self.core.memory_type
    }

    /// Strategy picked at construction
    pub fn strategy_kind(&self) -> StrategyKind {
        match self.strategy {
            Strategy::Large(_) => StrategyKind::LargeRegions,
            Strategy::Small(_) => StrategyKind::SmallRegions,
        }
    }

    /// Number of committed regions on storage page `page`
    ///
    /// None with large regions or for a page outside the table.
    pub fn granule_refcount(&self, page: usize) -> Option<u32> {
        match &self.strategy {
            Strategy::Large(_) => None,
            Strategy::Small(small) => small.refcount(page),
        }
    }

    /// Underlying storage
    pub fn storage(&self) -> &S {
        &self.core.storage
    }

    /// Activity counters
    pub fn stats(&self) -> &MapperStats {
        &self.core.stats
    }
}

impl<S: Storage> std::fmt::Debug for RegionMapper<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionMapper")
            .field("memory_type", &self.core.memory_type)
            .field("strategy", &self.strategy_kind())
            .field("num_regions", &self.num_regions())
            .field("committed_regions", &self.committed_regions())
            .field("region_granularity", &self.core.region_granularity)
            .finish()
    }
}
