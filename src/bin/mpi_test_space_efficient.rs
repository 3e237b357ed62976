//! Multi-rank space-efficient sorter checks; run with `mpirun -n <p>`.
use mpi::traits::Communicator;

use dss::exchange::allgatherv;
use dss::generate;
use dss::grid::Grid;
use dss::measure::MeasuringTool;
use dss::merge_sort::MergeSortConfig;
use dss::space_efficient::PermutationKind;
use dss::verify;
use dss::SpaceEfficientSort;

/// Bounded quantiles with prefix doubling must equal one unbounded
/// quantile without it, for every permutation kind.
fn quantile_equivalence_scenario(world: &mpi::topology::SimpleCommunicator) {
    let mut tool = MeasuringTool::new();
    tool.disable();

    let input = generate::dn_ratio_strings(2000 * world.size() as usize, 40, 0.5, 1337, world);
    let grid = Grid::new(world, &[]).unwrap();

    for kind in [PermutationKind::Simple, PermutationKind::MultiLevel] {
        let mut outputs = Vec::new();
        for (quantile_size, prefix_doubling) in [(usize::MAX, false), (16 * 1024, true)] {
            let config = MergeSortConfig {
                prefix_doubling,
                ..Default::default()
            };
            let sorter = SpaceEfficientSort::new(quantile_size, kind, config);
            let global_ranks = sorter.sort(&input, &grid, &mut tool).unwrap();

            assert!(verify::is_sorted_global_ranks(
                &global_ranks,
                &input,
                kind.is_unique(),
                world
            ));
            assert!(verify::is_complete_global_ranks(
                &global_ranks,
                input.len(),
                kind.is_unique(),
                world
            ));
            outputs.push(allgatherv(&global_ranks[..], world));
        }
        assert_eq!(outputs[0], outputs[1]);
    }
}

/// Simple and multi-level permutations must describe the same order.
fn kind_equivalence_scenario(world: &mpi::topology::SimpleCommunicator) {
    let size = world.size();
    let mut tool = MeasuringTool::new();
    tool.disable();

    let levels = if size >= 4 && size % 2 == 0 {
        vec![size as usize / 2]
    } else {
        vec![]
    };
    let grid = Grid::new(world, &levels).unwrap();
    let input = generate::dn_ratio_strings(1000 * size as usize, 25, 0.7, 99, world);

    let mut outputs = Vec::new();
    for kind in [PermutationKind::Simple, PermutationKind::MultiLevel] {
        let sorter = SpaceEfficientSort::new(64 * 1024, kind, MergeSortConfig::default());
        let global_ranks = sorter.sort(&input, &grid, &mut tool).unwrap();
        outputs.push(allgatherv(&global_ranks[..], world));
    }
    assert_eq!(outputs[0], outputs[1]);
}

/// Ranks with no local strings must not disturb the sort.
fn empty_rank_scenario(world: &mpi::topology::SimpleCommunicator) {
    let mut tool = MeasuringTool::new();
    tool.disable();

    let input = if world.rank() == 0 {
        dss::StringContainer::from_bytes(Vec::new())
    } else {
        generate::random_strings(100, 5, 15, world.rank() as u64)
    };
    let grid = Grid::new(world, &[]).unwrap();
    let sorter = SpaceEfficientSort::new(
        usize::MAX,
        PermutationKind::Simple,
        MergeSortConfig::default(),
    );
    let global_ranks = sorter.sort(&input, &grid, &mut tool).unwrap();

    assert!(verify::is_sorted_global_ranks(&global_ranks, &input, true, world));
    assert!(verify::is_complete_global_ranks(&global_ranks, input.len(), true, world));
}

fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();

    quantile_equivalence_scenario(&world);
    kind_equivalence_scenario(&world);
    empty_rank_scenario(&world);

    if world.rank() == 0 {
        println!("mpi_test_space_efficient passed on {} ranks", world.size());
    }
}
