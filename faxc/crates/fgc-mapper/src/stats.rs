//! Stats Module - Mapper Activity Counters
//!
//! Counters are plain relaxed atomics; they are updated on the committing
//! thread and may be read from anywhere. A [`MapperStatsSnapshot`] is a
//! consistent-enough copy for reporting and serializes with `serde`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// MapperStats - commit/uncommit activity of one mapper
#[derive(Debug, Default)]
pub struct MapperStats {
    /// commit_regions calls (including empty ones)
    commit_calls: AtomicU64,
    /// uncommit_regions calls
    uncommit_calls: AtomicU64,
    /// Storage pages physically committed
    pages_committed: AtomicU64,
    /// Storage pages physically uncommitted
    pages_uncommitted: AtomicU64,
    /// Pages touched by pretouch passes
    pretouched_pages: AtomicU64,
    /// NUMA placement requests issued
    numa_requests: AtomicU64,
    /// Commits that failed in storage
    commit_failures: AtomicU64,
    /// Regions committed, cumulative
    regions_committed: AtomicU64,
    /// Regions uncommitted, cumulative
    regions_uncommitted: AtomicU64,
}

/// Point-in-time copy of [`MapperStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapperStatsSnapshot {
    pub commit_calls: u64,
    pub uncommit_calls: u64,
    pub pages_committed: u64,
    pub pages_uncommitted: u64,
    pub pretouched_pages: u64,
    pub numa_requests: u64,
    pub commit_failures: u64,
    pub regions_committed: u64,
    pub regions_uncommitted: u64,
}

impl MapperStats {
    /// Create new stats collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful commit of `regions` regions backed by `pages` new pages
    pub fn record_commit(&self, regions: usize, pages: usize) {
        self.commit_calls.fetch_add(1, Ordering::Relaxed);
        self.pages_committed.fetch_add(pages as u64, Ordering::Relaxed);
        self.regions_committed.fetch_add(regions as u64, Ordering::Relaxed);
    }

    /// Record an uncommit of `regions` regions that released `pages` pages
    pub fn record_uncommit(&self, regions: usize, pages: usize) {
        self.uncommit_calls.fetch_add(1, Ordering::Relaxed);
        self.pages_uncommitted.fetch_add(pages as u64, Ordering::Relaxed);
        self.regions_uncommitted.fetch_add(regions as u64, Ordering::Relaxed);
    }

    /// Record a commit that storage refused
    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pretouch pass
    pub fn record_pretouch(&self, pages: usize) {
        self.pretouched_pages.fetch_add(pages as u64, Ordering::Relaxed);
    }

    /// Record NUMA placement requests
    pub fn record_numa_requests(&self, requests: usize) {
        self.numa_requests.fetch_add(requests as u64, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MapperStatsSnapshot {
        MapperStatsSnapshot {
            commit_calls: self.commit_calls.load(Ordering::Relaxed),
            uncommit_calls: self.uncommit_calls.load(Ordering::Relaxed),
            pages_committed: self.pages_committed.load(Ordering::Relaxed),
            pages_uncommitted: self.pages_uncommitted.load(Ordering::Relaxed),
            pretouched_pages: self.pretouched_pages.load(Ordering::Relaxed),
            numa_requests: self.numa_requests.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            regions_committed: self.regions_committed.load(Ordering::Relaxed),
            regions_uncommitted: self.regions_uncommitted.load(Ordering::Relaxed),
        }
    }

    /// Render the snapshot as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}
