//! Configuration Module - Mapper Construction Parameters
//!
//! Holds every parameter that fixes the geometry of a mapper: the
//! reservation extent, the OS commit granule, the logical region size and
//! the factor relating the two. All of them are validated once, at
//! construction; an invalid configuration is a startup failure.

use crate::mapper::MemoryType;
use serde::{Deserialize, Serialize};

/// Construction parameters for a [`RegionMapper`](crate::RegionMapper)
///
/// # Examples
///
/// ```rust
/// use fgc_mapper::{MapperConfig, MemoryType};
///
/// // Heap reservation of 64MB split into 1MB regions over 4KB pages
/// let config = MapperConfig {
///     reserved_size: 64 * 1024 * 1024,
///     used_size: 64 * 1024 * 1024,
///     page_size: 4096,
///     region_granularity: 1024 * 1024,
///     memory_type: MemoryType::Heap,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.num_regions(), 64);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Size of the virtual reservation in bytes
    ///
    /// Must be a multiple of `page_size`.
    /// Default: 64MB
    pub reserved_size: usize,

    /// Part of the reservation that may ever be committed
    ///
    /// If not a multiple of `page_size`, the last page is a tail page and
    /// only its used prefix is committed.
    /// Default: reserved_size
    pub used_size: usize,

    /// OS commit page size in bytes
    ///
    /// Must be a power of two.
    /// Default: system page size
    pub page_size: usize,

    /// Logical region size, measured in region-space bytes
    ///
    /// Must be a power of two.
    /// Default: 2MB
    pub region_granularity: usize,

    /// Ratio between region-space bytes and reservation bytes
    ///
    /// Auxiliary structures (mark bitmaps, card tables) cover many heap
    /// bytes per reserved byte; for those the factor is > 1.
    /// Default: 1
    pub commit_factor: usize,

    /// What the reservation backs
    ///
    /// Only `MemoryType::Heap` is subject to NUMA placement.
    /// Default: Heap
    pub memory_type: MemoryType,

    /// Touch every freshly committed page before returning
    ///
    /// Only takes effect when a pretouch executor is passed to
    /// `commit_regions`.
    /// Default: false
    pub always_pretouch: bool,

    /// Number of pretouch worker threads
    ///
    /// If None, auto-detects: min(8, num_cpus)
    /// Default: Auto-detect
    pub pretouch_threads: Option<usize>,

    /// Bytes handed to a pretouch worker per chunk
    ///
    /// Default: 4MB
    pub pretouch_chunk_size: usize,

    /// Enable NUMA-aware placement of heap memory
    ///
    /// Default: true
    pub numa_aware: bool,

    /// Commit the whole reservation up front and pin it
    ///
    /// Commit/uncommit then only update bookkeeping, and memory that was
    /// used before is not reported as zero-filled.
    /// Default: false
    pub pre_committed: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        let num_cpus = num_cpus::get();

        MapperConfig {
            // Reservation
            reserved_size: 64 * MB,
            used_size: 64 * MB,
            page_size: crate::storage::system_page_size(),

            // Regions
            region_granularity: 2 * MB,
            commit_factor: 1,
            memory_type: MemoryType::Heap,

            // Pretouch
            always_pretouch: false,
            pretouch_threads: Some(num_cpus.clamp(1, 8)),
            pretouch_chunk_size: 4 * MB,

            // Placement
            numa_aware: true,
            pre_committed: false,
        }
    }
}

impl MapperConfig {
    /// Validate configuration
    ///
    /// Checks every structural precondition of the mapper.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fgc_mapper::MapperConfig;
    ///
    /// let config = MapperConfig {
    ///     page_size: 3000, // Not a power of two
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize(format!(
                "page_size {} must be a power of two",
                self.page_size
            )));
        }

        if !self.region_granularity.is_power_of_two() {
            return Err(ConfigError::InvalidRegionSize(format!(
                "region_granularity {} must be a power of two",
                self.region_granularity
            )));
        }

        if self.commit_factor == 0 {
            return Err(ConfigError::InvalidCommitFactor(
                "commit_factor must be > 0".to_string(),
            ));
        }

        let granule = self.granule_size().ok_or_else(|| {
            ConfigError::InvalidCommitFactor(format!(
                "page_size * commit_factor overflows ({} * {})",
                self.page_size, self.commit_factor
            ))
        })?;

        let (larger, smaller) = if self.region_granularity >= granule {
            (self.region_granularity, granule)
        } else {
            (granule, self.region_granularity)
        };
        if larger % smaller != 0 {
            return Err(ConfigError::IncompatibleGranularity(format!(
                "region_granularity {} and commit granule {} do not divide each other",
                self.region_granularity, granule
            )));
        }

        if self.reserved_size == 0 || self.reserved_size % self.page_size != 0 {
            return Err(ConfigError::InvalidReservation(format!(
                "reserved_size {} must be a non-zero multiple of page_size {}",
                self.reserved_size, self.page_size
            )));
        }

        if self.used_size > self.reserved_size {
            return Err(ConfigError::InvalidReservation(format!(
                "used_size {} exceeds reserved_size {}",
                self.used_size, self.reserved_size
            )));
        }

        if self.num_regions() == 0 {
            return Err(ConfigError::InvalidReservation(format!(
                "reservation of {} bytes holds no region of {} bytes",
                self.reserved_size, self.region_granularity
            )));
        }

        if let Some(threads) = self.pretouch_threads {
            if threads == 0 {
                return Err(ConfigError::InvalidPretouchThreads(
                    "pretouch_threads must be > 0".to_string(),
                ));
            }
        }

        if self.pretouch_chunk_size == 0 {
            return Err(ConfigError::InvalidPretouchThreads(
                "pretouch_chunk_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - FGC_MAPPER_RESERVED_SIZE
    /// - FGC_MAPPER_REGION_SIZE
    /// - FGC_MAPPER_PAGE_SIZE
    /// - FGC_MAPPER_COMMIT_FACTOR
    /// - FGC_MAPPER_PRETOUCH
    /// - FGC_MAPPER_PRETOUCH_THREADS
    /// - FGC_MAPPER_NUMA
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = env_usize("FGC_MAPPER_RESERVED_SIZE") {
            config.reserved_size = size;
            config.used_size = size;
        }

        if let Some(size) = env_usize("FGC_MAPPER_REGION_SIZE") {
            config.region_granularity = size;
        }

        if let Some(size) = env_usize("FGC_MAPPER_PAGE_SIZE") {
            config.page_size = size;
        }

        if let Some(factor) = env_usize("FGC_MAPPER_COMMIT_FACTOR") {
            config.commit_factor = factor;
        }

        if let Some(flag) = env_flag("FGC_MAPPER_PRETOUCH") {
            config.always_pretouch = flag;
        }

        if let Some(threads) = env_usize("FGC_MAPPER_PRETOUCH_THREADS") {
            config.pretouch_threads = Some(threads);
        }

        if let Some(flag) = env_flag("FGC_MAPPER_NUMA") {
            config.numa_aware = flag;
        }

        config
    }

    /// Commit granule measured in region-space bytes
    ///
    /// Returns None on overflow.
    pub fn granule_size(&self) -> Option<usize> {
        self.page_size.checked_mul(self.commit_factor)
    }

    /// Number of regions the bitmap covers
    pub fn num_regions(&self) -> usize {
        if self.region_granularity == 0 {
            return 0;
        }
        self.reserved_size.saturating_mul(self.commit_factor) / self.region_granularity
    }

    /// Whether one region spans one or more whole commit granules
    pub fn uses_large_regions(&self) -> bool {
        self.granule_size()
            .is_some_and(|granule| self.region_granularity >= granule)
    }

    /// Effective pretouch worker count
    pub fn pretouch_workers(&self) -> usize {
        self.pretouch_threads
            .unwrap_or_else(|| num_cpus::get().clamp(1, 8))
            .max(1)
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid page size: {0}")]
    InvalidPageSize(String),

    #[error("Invalid region size: {0}")]
    InvalidRegionSize(String),

    #[error("Invalid commit factor: {0}")]
    InvalidCommitFactor(String),

    #[error("Incompatible granularity: {0}")]
    IncompatibleGranularity(String),

    #[error("Invalid reservation: {0}")]
    InvalidReservation(String),

    #[error("Invalid pretouch setting: {0}")]
    InvalidPretouchThreads(String),

    #[error("Storage does not match configuration: {0}")]
    StorageMismatch(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

const MB: usize = 1024 * 1024;

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse::<usize>().ok()
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    Some(val == "1" || val.eq_ignore_ascii_case("true"))
}
