//! Pretouch - Parallel Warming of Committed Pages
//!
//! Freshly committed pages are normally backed lazily, on first access.
//! Pretouching writes to every page up front so that the cost of faulting
//! them in is paid during the resize instead of on the allocation path.
//!
//! The executor splits a page range into disjoint contiguous chunks and
//! hands them out to a bounded set of scoped worker threads through a shared
//! chunk cursor. Workers never share a page, and they only see the page
//! indices and the touch callback; no mapper state is reachable from inside
//! the parallel section.

use crate::config::MapperConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// PretouchExecutor - bounded worker pool for zero-touching pages
#[derive(Debug, Clone)]
pub struct PretouchExecutor {
    /// Maximum number of worker threads
    workers: usize,

    /// Bytes per chunk handed to a worker
    chunk_size: usize,
}

/// Outcome of one pretouch pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PretouchReport {
    /// Pages touched
    pub pages: usize,
    /// Worker threads that took part (1 means the caller's thread)
    pub workers: usize,
    /// Wall-clock duration
    pub duration: Duration,
}

impl PretouchExecutor {
    /// Default chunk size: 4MB
    pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

    /// Create an executor with `workers` threads and the default chunk size
    pub fn new(workers: usize) -> Self {
        Self::with_chunk_size(workers, Self::DEFAULT_CHUNK_SIZE)
    }

    /// Create an executor with an explicit chunk size in bytes
    pub fn with_chunk_size(workers: usize, chunk_size: usize) -> Self {
        Self {
            workers: workers.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Create an executor sized from the mapper configuration
    pub fn from_config(config: &MapperConfig) -> Self {
        Self::with_chunk_size(config.pretouch_workers(), config.pretouch_chunk_size)
    }

    /// Maximum number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Pages per chunk for a given page size
    pub fn chunk_pages(&self, page_size: usize) -> usize {
        (self.chunk_size / page_size.max(1)).max(1)
    }

    /// Touch pages `[start_page, start_page + page_count)`
    ///
    /// `touch` is called exactly once per page index. With a single chunk or
    /// a single worker the pass runs on the calling thread.
    ///
    /// # Panics
    /// Re-raises a panic from any worker thread.
    pub fn run<F>(&self, start_page: usize, page_count: usize, page_size: usize, touch: F) -> PretouchReport
    where
        F: Fn(usize) + Sync,
    {
        let started = Instant::now();

        if page_count == 0 {
            return PretouchReport {
                pages: 0,
                workers: 0,
                duration: started.elapsed(),
            };
        }

        let chunk_pages = self.chunk_pages(page_size);
        let chunk_count = page_count.div_ceil(chunk_pages);
        let workers = self.workers.min(chunk_count);

        if workers <= 1 {
            (start_page..start_page + page_count).for_each(&touch);
            return PretouchReport {
                pages: page_count,
                workers: 1,
                duration: started.elapsed(),
            };
        }

        let next_chunk = AtomicUsize::new(0);
        let touched = AtomicUsize::new(0);

        let result = crossbeam::thread::scope(|scope| {
            for worker_id in 0..workers {
                let next_chunk = &next_chunk;
                let touched = &touched;
                let touch = &touch;

                scope
                    .builder()
                    .name(format!("fgc-pretouch-{}", worker_id))
                    .spawn(move |_| {
                        let mut local = 0usize;
                        loop {
                            let chunk = next_chunk.fetch_add(1, Ordering::Relaxed);
                            if chunk >= chunk_count {
                                break;
                            }
                            let first = start_page + chunk * chunk_pages;
                            let last = (first + chunk_pages).min(start_page + page_count);
                            (first..last).for_each(touch);
                            local += last - first;
                        }
                        touched.fetch_add(local, Ordering::Relaxed);
                    })
                    .unwrap_or_else(|e| panic!("Failed to spawn pretouch worker: {}", e));
            }
        });

        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }

        let pages = touched.load(Ordering::Relaxed);
        debug_assert_eq!(pages, page_count, "pretouch skipped pages");

        let report = PretouchReport {
            pages,
            workers,
            duration: started.elapsed(),
        };

        log::trace!(
            "pretouched {} pages from page {} with {} workers in {:?}",
            report.pages,
            start_page,
            report.workers,
            report.duration
        );

        report
    }
}

impl Default for PretouchExecutor {
    fn default() -> Self {
        Self::from_config(&MapperConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[test]
    fn test_serial_for_single_chunk() {
        let executor = PretouchExecutor::with_chunk_size(4, 64 * 4096);
        let seen = Mutex::new(Vec::new());

        let report = executor.run(10, 5, 4096, |page| seen.lock().push(page));

        assert_eq!(report.workers, 1);
        assert_eq!(report.pages, 5);
        assert_eq!(*seen.lock(), vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_parallel_touches_each_page_once() {
        let executor = PretouchExecutor::with_chunk_size(4, 2 * 4096);
        let seen = Mutex::new(Vec::new());

        let report = executor.run(100, 37, 4096, |page| seen.lock().push(page));

        assert_eq!(report.pages, 37);
        assert!(report.workers > 1 && report.workers <= 4);

        let pages = seen.into_inner();
        let unique: HashSet<_> = pages.iter().copied().collect();
        assert_eq!(pages.len(), 37, "a page was touched twice");
        assert_eq!(unique, (100..137).collect::<HashSet<_>>());
    }

    #[test]
    fn test_empty_range() {
        let executor = PretouchExecutor::new(8);
        let report = executor.run(0, 0, 4096, |_| panic!("nothing to touch"));
        assert_eq!(report.pages, 0);
        assert_eq!(report.workers, 0);
    }

    #[test]
    fn test_chunk_pages_never_zero() {
        let executor = PretouchExecutor::with_chunk_size(2, 1024);
        assert_eq!(executor.chunk_pages(4096), 1);
        assert_eq!(executor.chunk_pages(512), 2);
    }
}
