//! Multi-rank duplicate-filter checks; run with `mpirun -n <p>`.
use mpi::traits::Communicator;

use dss::bloomfilter::{BloomFilter, FilterStrategy, GolombMode};
use dss::grid::Grid;
use dss::measure::MeasuringTool;
use dss::merge_sort::MergeSortConfig;
use dss::sort::sort_container;
use dss::space_efficient::{count_duplicate_ranks, PermutationKind};
use dss::strings::StringContainer;
use dss::SpaceEfficientSort;

/// A block of identical strings spread over all ranks must be classified
/// as duplicates at depth 1 already.
fn duplicate_block_scenario(world: &mpi::topology::SimpleCommunicator, golomb: GolombMode) {
    let mut cont = StringContainer::from_bytes(b"samesame\0samesame\0".to_vec());
    sort_container(&mut cont);

    let grid = Grid::new(world, &[]).unwrap();
    let mut filter = BloomFilter::new(cont.len(), FilterStrategy::SingleLevel, golomb);
    let mut results = vec![0u64; cont.len()];
    let candidates: Vec<usize> = (0..cont.len()).collect();

    let (duplicates, any) = filter.filter(&cont, 1, &candidates, &mut results, &grid);
    assert_eq!(any, world.size() > 1);
    assert_eq!(duplicates, vec![0, 1]);
    assert_eq!(results, vec![1, 1]);
}

/// Distinct strings across ranks must retire once their prefixes diverge.
fn distinct_strings_scenario(world: &mpi::topology::SimpleCommunicator) {
    let rank = world.rank() as u8;

    // unique per rank: a one-byte distinguishable head plus shared tail
    let mut bytes = Vec::new();
    bytes.push(b'a' + rank % 26);
    bytes.extend_from_slice(b"sharedtail\0");
    let mut cont = StringContainer::from_bytes(bytes);
    sort_container(&mut cont);

    let grid = Grid::new(world, &[]).unwrap();
    let mut filter = BloomFilter::new(cont.len(), FilterStrategy::SingleLevel, GolombMode::None);
    let mut results = vec![0u64; cont.len()];

    let mut candidates: Vec<usize> = (0..cont.len()).collect();
    let mut depth = 1;
    loop {
        let (next, any) = filter.filter(&cont, depth, &candidates, &mut results, &grid);
        candidates = next;
        depth *= 2;
        if !any {
            break;
        }
        assert!(depth <= 32, "filter failed to converge");
    }

    // ranks sharing a head letter collide, all prefixes stay small
    assert!(results[0] >= 1 && results[0] <= 16);
}

/// End to end: eight identical strings over four ranks collapse onto one
/// rank value in non-unique mode.
fn non_unique_scenario(world: &mpi::topology::SimpleCommunicator) {
    let mut tool = MeasuringTool::new();
    tool.disable();

    let input = StringContainer::from_bytes(b"duplicate\0duplicate\0".to_vec());
    let grid = Grid::new(world, &[]).unwrap();

    let config = MergeSortConfig {
        prefix_doubling: true,
        ..Default::default()
    };
    let sorter = SpaceEfficientSort::new(usize::MAX, PermutationKind::NonUnique, config);
    let global_ranks = sorter.sort(&input, &grid, &mut tool).unwrap();

    // every copy everywhere shares the head rank 0
    assert_eq!(global_ranks, vec![0, 0]);

    tool.enable();
    count_duplicate_ranks(&global_ranks, world, &mut tool);
}

fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();

    duplicate_block_scenario(&world, GolombMode::None);
    duplicate_block_scenario(&world, GolombMode::Sequential);
    distinct_strings_scenario(&world);
    non_unique_scenario(&world);

    if world.rank() == 0 {
        println!("mpi_test_bloomfilter passed on {} ranks", world.size());
    }
}
