//! # FGC Mapper - Region-to-Space Mapping for Region-Based Heaps
//!
//! `fgc-mapper` maps a fixed virtual address reservation, split into
//! equal-sized regions, onto physical memory. It commits and uncommits
//! regions through the operating system and keeps exact track of which
//! regions are backed.
//!
//! ## Overview
//!
//! - **Two granularities**: the heap's region size and the OS commit granule
//!   are reconciled by one of two strategies, picked at construction
//! - **Shared pages**: when several regions share a page, a per-page refcount
//!   keeps the page backed while any of its regions is committed
//! - **Zero-fill reporting**: a listener learns after every commit whether
//!   the new memory is known to read as zero
//! - **NUMA placement**: heap memory is spread over NUMA nodes by region
//! - **Parallel pretouch**: new pages can be faulted in up front by a bounded
//!   worker pool
//!
//! ## Quick Start
//!
//! ```rust
//! use fgc_mapper::{MapperConfig, MemoryType, RegionMapper};
//!
//! fn main() -> Result<(), fgc_mapper::MapperError> {
//!     let config = MapperConfig {
//!         reserved_size: 16 * 1024 * 1024,
//!         used_size: 16 * 1024 * 1024,
//!         region_granularity: 1024 * 1024,
//!         memory_type: MemoryType::Heap,
//!         ..Default::default()
//!     };
//!
//!     let mut mapper = RegionMapper::reserve(&config)?;
//!     mapper.commit_regions(0, 4, None)?;
//!     assert!(mapper.is_committed(3));
//!
//!     mapper.uncommit_regions(0, 4)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Heap Sizing Controller                  │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ commit_regions / uncommit_regions
//! ┌───────────────────────────▼─────────────────────────────┐
//! │                      RegionMapper                        │
//! │  ┌──────────────┐   ┌────────────────────────────────┐  │
//! │  │ CommitBitmap │   │ Strategy                        │  │
//! │  │ 1 bit/region │   │  LargeRegions │ SmallRegions    │  │
//! │  └──────────────┘   │               │ (refcounts)     │  │
//! │                     └───────┬────────────────────────┘  │
//! │        NumaAdvisor ◄────────┤                            │
//! │   PretouchExecutor ◄────────┤                            │
//! │     CommitListener ◄────────┘ (once per commit)          │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ commit / uncommit pages
//! ┌───────────────────────────▼─────────────────────────────┐
//! │              Storage (VirtualSpace over OS)              │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! All geometry is fixed by [`MapperConfig`]; see its documentation for
//! defaults and the `FGC_MAPPER_*` environment overrides.

// Core mapper
pub mod mapper;
pub mod config;
pub mod error;

// Building blocks
pub mod biased_array;
pub mod bitmap;
pub mod storage;

// Collaborators
pub mod numa;
pub mod pretouch;

// Monitoring
pub mod logging;
pub mod stats;

// Re-export main types for convenience
pub use config::{ConfigError, MapperConfig};
pub use error::{MapperError, Result};
pub use mapper::{CommitListener, MemoryType, RegionMapper, SharedMapper, StrategyKind};
pub use numa::{NumaAdvisor, NumaManager};
pub use pretouch::{PretouchExecutor, PretouchReport};
pub use stats::{MapperStats, MapperStatsSnapshot};
pub use storage::{Storage, VirtualSpace};

/// Crate version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserve a mapper configured from the environment
///
/// Reads the `FGC_MAPPER_*` variables over the defaults and reserves OS
/// memory for them.
///
/// # Examples
///
/// ```rust
/// let mapper = fgc_mapper::reserve_from_env()?;
/// assert!(mapper.num_regions() > 0);
/// # Ok::<(), fgc_mapper::MapperError>(())
/// ```
pub fn reserve_from_env() -> Result<RegionMapper<VirtualSpace>> {
    let config = MapperConfig::from_env();
    RegionMapper::reserve(&config)
}
