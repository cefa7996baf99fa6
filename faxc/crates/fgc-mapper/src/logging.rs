//! Mapper Logging and Tracing
//!
//! Structured event log for commit activity, useful for:
//! - Heap resize analysis
//! - Debugging region bookkeeping
//! - Production monitoring
//!
//! Call sites also emit plain `log` records; this module keeps the
//! structured trail and renders it on the console when asked to.
//!
//! Log Levels:
//! - ERROR: Commit failures
//! - INFO: Reservations
//! - DEBUG: Commit / uncommit batches
//! - TRACE: Pretouch passes, NUMA placement

use crate::mapper::MemoryType;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Log level for mapper events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Mapper event types
#[derive(Debug, Clone, PartialEq)]
pub enum MapperEvent {
    /// Address space reserved for a mapper
    Reserve {
        memory_type: MemoryType,
        reserved_bytes: usize,
        page_size: usize,
        num_regions: usize,
    },

    /// Regions committed
    Commit {
        memory_type: MemoryType,
        start: usize,
        count: usize,
        pages: usize,
        zero_filled: bool,
    },

    /// Regions uncommitted
    Uncommit {
        memory_type: MemoryType,
        start: usize,
        count: usize,
        pages: usize,
    },

    /// Commit refused by the OS
    CommitFailure {
        memory_type: MemoryType,
        start: usize,
        count: usize,
        reason: String,
    },

    /// Pretouch pass over newly committed pages
    Pretouch {
        pages: usize,
        workers: usize,
        duration: Duration,
    },

    /// NUMA placement requests for one commit
    NumaPlacement { requests: usize, bytes: usize },
}

/// Mapper logger configuration
#[derive(Debug, Clone)]
pub struct MapperLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Maximum number of retained events, oldest dropped first
    pub capacity: usize,
}

impl Default for MapperLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            capacity: 4096,
        }
    }
}

/// MapperLogger - structured event trail for mapper operations
pub struct MapperLogger {
    config: MapperLoggerConfig,
    events: Mutex<VecDeque<(Instant, MapperEvent)>>,
    enabled: AtomicBool,
}

impl MapperLogger {
    /// Create new mapper logger
    pub fn new(config: MapperLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a mapper event
    pub fn log(&self, event: MapperEvent) {
        if !self.is_enabled() {
            return;
        }

        if Self::event_level(&event) > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if self.config.capacity > 0 && events.len() >= self.config.capacity {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    /// Get log level for event
    fn event_level(event: &MapperEvent) -> LogLevel {
        match event {
            MapperEvent::CommitFailure { .. } => LogLevel::Error,
            MapperEvent::Reserve { .. } => LogLevel::Info,
            MapperEvent::Commit { .. } | MapperEvent::Uncommit { .. } => LogLevel::Debug,
            MapperEvent::Pretouch { .. } | MapperEvent::NumaPlacement { .. } => LogLevel::Trace,
        }
    }

    /// Output to console
    fn output_console(&self, event: &MapperEvent) {
        let prefix = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        let line = if self.config.json {
            Self::format_json(event)
        } else {
            Self::format_human(event)
        };

        match event {
            MapperEvent::CommitFailure { .. } => eprintln!("{}{}", prefix, line),
            _ => println!("{}{}", prefix, line),
        }
    }

    /// Render in human-readable format
    pub fn format_human(event: &MapperEvent) -> String {
        match event {
            MapperEvent::Reserve {
                memory_type,
                reserved_bytes,
                page_size,
                num_regions,
            } => format!(
                "[Mapper] {:?}: reserved {} bytes, page size {}, {} regions",
                memory_type, reserved_bytes, page_size, num_regions
            ),
            MapperEvent::Commit {
                memory_type,
                start,
                count,
                pages,
                zero_filled,
            } => format!(
                "[Mapper] {:?}: committed regions [{}, {}) ({} pages, zero_filled={})",
                memory_type,
                start,
                start + count,
                pages,
                zero_filled
            ),
            MapperEvent::Uncommit {
                memory_type,
                start,
                count,
                pages,
            } => format!(
                "[Mapper] {:?}: uncommitted regions [{}, {}) ({} pages)",
                memory_type,
                start,
                start + count,
                pages
            ),
            MapperEvent::CommitFailure {
                memory_type,
                start,
                count,
                reason,
            } => format!(
                "[Mapper] {:?}: commit of regions [{}, {}) failed: {}",
                memory_type,
                start,
                start + count,
                reason
            ),
            MapperEvent::Pretouch {
                pages,
                workers,
                duration,
            } => format!(
                "[Mapper] Pretouched {} pages with {} workers ({:.2}ms)",
                pages,
                workers,
                duration.as_secs_f64() * 1000.0
            ),
            MapperEvent::NumaPlacement { requests, bytes } => {
                format!("[Mapper] NUMA: {} placement requests, {} bytes", requests, bytes)
            },
        }
    }

    /// Render in JSON format
    pub fn format_json(event: &MapperEvent) -> String {
        let json = match event {
            MapperEvent::Reserve {
                memory_type,
                reserved_bytes,
                page_size,
                num_regions,
            } => serde_json::json!({
                "type": "reserve",
                "memory_type": memory_type,
                "reserved_bytes": reserved_bytes,
                "page_size": page_size,
                "num_regions": num_regions
            }),
            MapperEvent::Commit {
                memory_type,
                start,
                count,
                pages,
                zero_filled,
            } => serde_json::json!({
                "type": "commit",
                "memory_type": memory_type,
                "start": start,
                "count": count,
                "pages": pages,
                "zero_filled": zero_filled
            }),
            MapperEvent::Uncommit {
                memory_type,
                start,
                count,
                pages,
            } => serde_json::json!({
                "type": "uncommit",
                "memory_type": memory_type,
                "start": start,
                "count": count,
                "pages": pages
            }),
            MapperEvent::CommitFailure {
                memory_type,
                start,
                count,
                reason,
            } => serde_json::json!({
                "type": "commit_failure",
                "memory_type": memory_type,
                "start": start,
                "count": count,
                "reason": reason
            }),
            MapperEvent::Pretouch {
                pages,
                workers,
                duration,
            } => serde_json::json!({
                "type": "pretouch",
                "pages": pages,
                "workers": workers,
                "duration_ms": duration.as_secs_f64() * 1000.0
            }),
            MapperEvent::NumaPlacement { requests, bytes } => serde_json::json!({
                "type": "numa_placement",
                "requests": requests,
                "bytes": bytes
            }),
        };

        json.to_string()
    }

    /// Get all events
    pub fn get_events(&self) -> Vec<(Instant, MapperEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for MapperLogger {
    fn default() -> Self {
        Self::new(MapperLoggerConfig::default())
    }
}

// Global mapper logger
lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<MapperLogger> = Mutex::new(MapperLogger::default());
}

/// Log a mapper event to the global logger
pub fn log_event(event: MapperEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: MapperLoggerConfig) {
    *GLOBAL_LOGGER.lock() = MapperLogger::new(config);
}

/// Get global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}

/// Snapshot of the global logger's events
pub fn get_events() -> Vec<MapperEvent> {
    GLOBAL_LOGGER
        .lock()
        .get_events()
        .into_iter()
        .map(|(_, event)| event)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_event() -> MapperEvent {
        MapperEvent::Commit {
            memory_type: MemoryType::Heap,
            start: 4,
            count: 2,
            pages: 1024,
            zero_filled: true,
        }
    }

    #[test]
    fn test_logger_level_filter() {
        let logger = MapperLogger::new(MapperLoggerConfig {
            level: LogLevel::Debug,
            ..Default::default()
        });

        logger.log(commit_event());
        logger.log(MapperEvent::NumaPlacement {
            requests: 2,
            bytes: 4096,
        });

        assert_eq!(logger.event_count(), 1);
        assert_eq!(logger.get_events()[0].1, commit_event());
    }

    #[test]
    fn test_logger_disable() {
        let logger = MapperLogger::default();

        logger.disable();
        logger.log(MapperEvent::Reserve {
            memory_type: MemoryType::Heap,
            reserved_bytes: 1 << 20,
            page_size: 4096,
            num_regions: 1,
        });

        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_logger_capacity_drops_oldest() {
        let logger = MapperLogger::new(MapperLoggerConfig {
            level: LogLevel::Trace,
            capacity: 2,
            ..Default::default()
        });

        for requests in 0..10 {
            logger.log(MapperEvent::NumaPlacement { requests, bytes: 0 });
        }

        let events = logger.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, MapperEvent::NumaPlacement { requests: 8, bytes: 0 });
        assert_eq!(events[1].1, MapperEvent::NumaPlacement { requests: 9, bytes: 0 });
    }

    #[test]
    fn test_human_format() {
        let line = MapperLogger::format_human(&commit_event());
        assert_eq!(
            line,
            "[Mapper] Heap: committed regions [4, 6) (1024 pages, zero_filled=true)"
        );
    }

    #[test]
    fn test_json_format() {
        let line = MapperLogger::format_json(&commit_event());
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["type"], "commit");
        assert_eq!(value["memory_type"], "Heap");
        assert_eq!(value["start"], 4);
        assert_eq!(value["zero_filled"], true);
    }
}
