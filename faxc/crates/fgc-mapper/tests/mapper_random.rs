//! Randomized Mapper Tests
//!
//! Long random sequences of commits and uncommits against a plain
//! `Vec<bool>` model. After every step the bitmap, the refcounts and the
//! storage pages must agree with the model and with each other.

mod common;

use common::{config, MapperFixture, PAGE_SIZE};
use fgc_mapper::{MapperConfig, PretouchExecutor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const STEPS: usize = 2_000;

fn run_sequence(cfg: &MapperConfig, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fixture = MapperFixture::new(cfg);
    let executor = PretouchExecutor::with_chunk_size(2, 2 * PAGE_SIZE);
    let num_regions = fixture.mapper.num_regions();
    let mut model = vec![false; num_regions];
    let mut commits = 0;

    for _ in 0..STEPS {
        let start = rng.gen_range(0..num_regions);
        let max_len = (num_regions - start).min(8);
        let count = rng.gen_range(1..=max_len);
        let range = start..start + count;

        if model[range.clone()].iter().all(|&committed| !committed) {
            let executor = rng.gen_bool(0.5).then_some(&executor);
            fixture.mapper.commit_regions(start, count, executor).unwrap();
            model[range].iter_mut().for_each(|bit| *bit = true);
            commits += 1;
        } else if model[range.clone()].iter().all(|&committed| committed) {
            fixture.mapper.uncommit_regions(start, count).unwrap();
            model[range].iter_mut().for_each(|bit| *bit = false);
        } else {
            continue;
        }

        for (region, &committed) in model.iter().enumerate() {
            assert_eq!(fixture.mapper.is_committed(region), committed, "region {}", region);
        }
        fixture.assert_consistent();
    }

    assert_eq!(fixture.listener.events().len(), commits);
    assert_eq!(
        fixture.mapper.committed_regions(),
        model.iter().filter(|&&committed| committed).count()
    );
}

#[test]
fn test_random_large_regions() {
    run_sequence(&config(64, 4 * PAGE_SIZE, 1), 0x5eed_0001);
}

#[test]
fn test_random_small_regions() {
    run_sequence(&config(128, PAGE_SIZE / 8, 1), 0x5eed_0002);
}

#[test]
fn test_random_small_regions_with_commit_factor() {
    run_sequence(&config(128, PAGE_SIZE / 4, 2), 0x5eed_0003);
}

#[test]
fn test_random_with_pretouch() {
    let cfg = MapperConfig {
        always_pretouch: true,
        ..config(64, PAGE_SIZE / 2, 1)
    };
    run_sequence(&cfg, 0x5eed_0004);
}
