//! OS-Backed Mapper Tests
//!
//! Drive mappers over real reserved address space and check the memory
//! itself: committed regions are writable, recommitted regions read zero,
//! pretouch reaches every page.

mod common;

use common::RecordingListener;
use fgc_mapper::storage::system_page_size;
use fgc_mapper::{
    CommitListener, MapperConfig, MemoryType, PretouchExecutor, RegionMapper, Storage,
    StrategyKind, VirtualSpace,
};
use std::sync::{Arc, Weak};

fn os_config(num_regions: usize, region_size: usize) -> MapperConfig {
    let reserved_size = num_regions * region_size;
    MapperConfig {
        reserved_size: reserved_size.max(system_page_size()),
        used_size: reserved_size.max(system_page_size()),
        page_size: system_page_size(),
        region_granularity: region_size,
        memory_type: MemoryType::Heap,
        ..Default::default()
    }
}

fn with_listener(config: &MapperConfig) -> (RegionMapper<VirtualSpace>, Arc<RecordingListener>) {
    let mut mapper = RegionMapper::reserve(config).unwrap();
    let listener = Arc::new(RecordingListener::default());
    let weak: Weak<dyn CommitListener> = Arc::downgrade(&listener) as Weak<dyn CommitListener>;
    mapper.set_listener(weak);
    (mapper, listener)
}

fn region_address(mapper: &RegionMapper<VirtualSpace>, region: usize) -> *mut u8 {
    (mapper.storage().base() + region * mapper.region_granularity()) as *mut u8
}

/// Test that committed regions are writable and come back zeroed
#[test]
fn test_large_regions_recommit_zeroed() {
    let page = system_page_size();
    let (mut mapper, listener) = with_listener(&os_config(8, 4 * page));
    assert_eq!(mapper.strategy_kind(), StrategyKind::LargeRegions);

    mapper.commit_regions(2, 2, None).unwrap();
    assert_eq!(mapper.storage().committed_size(), 8 * page);

    let address = region_address(&mapper, 3);
    // SAFETY: region 3 is committed read/write.
    unsafe {
        address.write_bytes(0x5A, 4 * page);
        assert_eq!(*address.add(4 * page - 1), 0x5A);
    }

    mapper.uncommit_regions(3, 1).unwrap();
    assert_eq!(mapper.storage().committed_size(), 4 * page);
    mapper.commit_regions(3, 1, None).unwrap();

    // SAFETY: recommitted read/write.
    unsafe {
        assert_eq!(*address, 0);
        assert_eq!(*address.add(4 * page - 1), 0);
    }
    assert_eq!(listener.events(), vec![(2, 2, true), (3, 1, true)]);
}

/// Test that regions sharing a page keep their data while a neighbour goes
#[test]
fn test_small_regions_share_page() {
    let page = system_page_size();
    let (mut mapper, listener) = with_listener(&os_config(16, page / 4));
    assert_eq!(mapper.strategy_kind(), StrategyKind::SmallRegions);

    mapper.commit_regions(0, 2, None).unwrap();
    let second = region_address(&mapper, 1);
    // SAFETY: region 1 is committed; its page is backed.
    unsafe { second.write(7) };

    mapper.uncommit_regions(0, 1).unwrap();
    assert!(mapper.storage().is_page_committed(0));
    // SAFETY: the page is still backed by region 1.
    unsafe { assert_eq!(second.read(), 7) };

    mapper.commit_regions(0, 1, None).unwrap();
    assert_eq!(listener.events(), vec![(0, 2, true), (0, 1, false)]);

    mapper.uncommit_regions(0, 2).unwrap();
    assert!(!mapper.storage().is_page_committed(0));
    assert_eq!(mapper.storage().committed_size(), 0);
}

/// Test that pinned memory is reported dirty once reused
#[test]
fn test_pre_committed_space_reports_dirty() {
    let page = system_page_size();
    let config = MapperConfig {
        pre_committed: true,
        ..os_config(4, page)
    };
    let (mut mapper, listener) = with_listener(&config);
    assert!(mapper.storage().is_special());

    mapper.commit_regions(0, 2, None).unwrap();
    mapper.uncommit_regions(0, 2).unwrap();
    mapper.commit_regions(0, 1, None).unwrap();
    mapper.commit_regions(2, 1, None).unwrap();

    assert_eq!(
        listener.events(),
        vec![(0, 2, true), (0, 1, false), (2, 1, true)]
    );
}

/// Test parallel pretouch over real pages
#[test]
fn test_pretouch_real_pages() {
    let page = system_page_size();
    let config = MapperConfig {
        always_pretouch: true,
        ..os_config(4, 16 * page)
    };
    let (mut mapper, _listener) = with_listener(&config);
    let executor = PretouchExecutor::with_chunk_size(4, 4 * page);

    mapper.commit_regions(0, 4, Some(&executor)).unwrap();

    assert_eq!(mapper.stats().snapshot().pretouched_pages, 64);
    assert_eq!(mapper.storage().committed_pages(), 64);
    // SAFETY: every region is committed.
    unsafe { assert_eq!(*region_address(&mapper, 3).add(16 * page - 1), 0) };
}

/// Test commit factor 2 over real memory
#[test]
fn test_commit_factor_halves_reservation() {
    let page = system_page_size();
    let config = MapperConfig {
        reserved_size: 4 * page,
        used_size: 4 * page,
        commit_factor: 2,
        region_granularity: 2 * page,
        ..os_config(1, page)
    };
    let (mut mapper, _listener) = with_listener(&config);

    assert_eq!(mapper.num_regions(), 4);
    assert_eq!(mapper.strategy_kind(), StrategyKind::LargeRegions);

    mapper.commit_regions(1, 2, None).unwrap();
    assert!(mapper.storage().is_page_committed(1));
    assert!(mapper.storage().is_page_committed(2));
    assert_eq!(mapper.storage().committed_pages(), 2);
    assert_eq!(mapper.storage().page_size(), page);
}
