//! Global Event Log Tests
//!
//! The global logger is process-wide; this binary holds a single test so
//! no other mapper writes to it concurrently.

mod common;

use common::{config, MapperFixture, RecordingStorage, PAGE_SIZE};
use fgc_mapper::logging::{self, LogLevel, MapperEvent, MapperLoggerConfig};
use fgc_mapper::MemoryType;

#[test]
fn test_mapper_events_reach_global_logger() {
    logging::configure_logger(MapperLoggerConfig {
        level: LogLevel::Trace,
        ..Default::default()
    });

    let cfg = config(16, PAGE_SIZE / 4, 1);
    let mut fixture = MapperFixture::new(&cfg);
    fixture.mapper.commit_regions(0, 6, None).unwrap();
    fixture.mapper.uncommit_regions(4, 2).unwrap();

    let mut storage = RecordingStorage::new(cfg.reserved_size);
    storage.fail_commit_at = Some(0);
    let mut failing = MapperFixture::with_storage(storage, &cfg);
    assert!(failing.mapper.commit_regions(0, 1, None).is_err());

    let events = logging::get_events();

    let reserves = events
        .iter()
        .filter(|event| matches!(event, MapperEvent::Reserve { .. }))
        .count();
    assert_eq!(reserves, 2);

    assert!(events.contains(&MapperEvent::Commit {
        memory_type: MemoryType::Heap,
        start: 0,
        count: 6,
        pages: 2,
        zero_filled: true,
    }));
    assert!(events.contains(&MapperEvent::NumaPlacement {
        requests: 2,
        bytes: 2 * PAGE_SIZE,
    }));
    assert!(events.contains(&MapperEvent::Uncommit {
        memory_type: MemoryType::Heap,
        start: 4,
        count: 2,
        pages: 1,
    }));
    assert!(events
        .iter()
        .any(|event| matches!(event, MapperEvent::CommitFailure { start: 0, count: 1, .. })));

    assert_eq!(logging::get_event_count(), events.len());
}
