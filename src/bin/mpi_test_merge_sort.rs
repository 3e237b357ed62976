//! Multi-rank merge-sort checks; run with `mpirun -n <p>`.
use mpi::traits::Communicator;

use dss::exchange::allgatherv;
use dss::generate;
use dss::grid::Grid;
use dss::measure::MeasuringTool;
use dss::merge_sort::{input_origins, MergeSortConfig};
use dss::partition::{SamplePolicy, SampleParams};
use dss::verify;
use dss::{DistributedMergeSort, StringContainer};

fn gather_strings<C: Communicator>(cont: &StringContainer, comm: &C) -> Vec<Vec<u8>> {
    let mut bytes = Vec::new();
    for i in 0..cont.len() {
        bytes.extend_from_slice(cont.get(i));
        bytes.push(0);
    }
    let all = allgatherv(&bytes[..], comm);
    let mut strings: Vec<Vec<u8>> = all.split(|&b| b == 0).map(|s| s.to_vec()).collect();
    strings.pop();
    strings
}

/// Fixed four-string input on two ranks with a known permutation.
fn fixed_input_scenario(world: &mpi::topology::SimpleCommunicator) {
    let rank = world.rank();
    let mut tool = MeasuringTool::new();
    tool.disable();

    let mut input = StringContainer::from_bytes(if rank == 0 {
        b"banana\0apple\0".to_vec()
    } else {
        b"cherry\0apricot\0".to_vec()
    });
    input
        .set_origins(input_origins(rank as u64, 0, input.len()))
        .unwrap();
    let original = input.clone();

    let grid = Grid::new(world, &[]).unwrap();
    let sorter = DistributedMergeSort::new(MergeSortConfig::default());
    let (sorted, permutation) = sorter.sort_to_permutation(input, &grid, &mut tool).unwrap();

    assert!(verify::is_sorted_permutation(&permutation, &original, world));
    assert!(verify::is_complete_permutation(&permutation, 2, true, world));

    let strings = gather_strings(&sorted, world);
    assert_eq!(strings, vec![b"apple".to_vec(), b"apricot".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);

    let pairs: Vec<u64> = permutation
        .iter()
        .flat_map(|(r, i)| [r, i])
        .collect();
    let all_pairs = allgatherv(&pairs[..], world);
    assert_eq!(all_pairs, vec![0, 1, 1, 1, 0, 0, 1, 0]);
}

/// Suffixes of "mississippi" must come out in suffix-array order.
fn suffix_scenario(world: &mpi::topology::SimpleCommunicator) {
    let mut tool = MeasuringTool::new();
    tool.disable();
    let text = b"mississippi";

    let input = generate::suffix_strings(text, 1, 99, world);
    let grid = Grid::new(world, &[]).unwrap();
    let sorter = DistributedMergeSort::new(MergeSortConfig::default());
    let sorted = sorter.sort(input, &grid, &mut tool).unwrap();

    let strings = gather_strings(&sorted, world);
    let order: Vec<usize> = strings.iter().map(|s| text.len() - s.len()).collect();
    assert_eq!(order, vec![10, 7, 4, 1, 0, 9, 8, 6, 3, 5, 2]);
}

/// Seeded runs must be reproducible, across all sampling policies.
fn determinism_scenario(world: &mpi::topology::SimpleCommunicator) {
    let mut tool = MeasuringTool::new();
    tool.disable();

    for policy in [
        SamplePolicy::Strings,
        SamplePolicy::Chars,
        SamplePolicy::IndexedStrings,
        SamplePolicy::IndexedChars,
    ] {
        let config = MergeSortConfig {
            sample: SampleParams { policy, factor: 2 },
            ..Default::default()
        };
        let sorter = DistributedMergeSort::new(config);
        let grid = Grid::new(world, &[]).unwrap();

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let num = 1000 * world.size() as usize;
            let mut input = generate::dn_ratio_strings(num, 20, 0.5, 4242, world);
            if policy.is_indexed() {
                input
                    .set_origins(input_origins(world.rank() as u64, 0, input.len()))
                    .unwrap();
            }
            let input_chars = input.sum_len();
            let input_strings = input.len();
            let sorted = sorter.sort(input, &grid, &mut tool).unwrap();
            assert!(verify::is_complete_and_sorted(
                &sorted,
                input_chars,
                input_strings,
                world
            ));
            outputs.push(gather_strings(&sorted, world));
        }
        assert_eq!(outputs[0], outputs[1]);
    }
}

/// Multi-level grids must produce the same sorted sequence as a flat sort.
fn multi_level_scenario(world: &mpi::topology::SimpleCommunicator) {
    let size = world.size();
    if size % 2 != 0 || size < 4 {
        return;
    }
    let mut tool = MeasuringTool::new();
    tool.disable();

    let sorter = DistributedMergeSort::new(MergeSortConfig::default());
    let mut outputs = Vec::new();
    for levels in [vec![], vec![size as usize / 2]] {
        let grid = Grid::new(world, &levels).unwrap();
        let input = generate::dn_ratio_strings(500 * size as usize, 30, 0.5, 7, world);
        let sorted = sorter.sort(input, &grid, &mut tool).unwrap();
        assert!(verify::is_sorted_container(&sorted, world));
        outputs.push(gather_strings(&sorted, world));
    }
    assert_eq!(outputs[0], outputs[1]);
}

fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();

    if world.size() == 2 {
        fixed_input_scenario(&world);
        suffix_scenario(&world);
    }
    determinism_scenario(&world);
    multi_level_scenario(&world);

    if world.rank() == 0 {
        println!("mpi_test_merge_sort passed on {} ranks", world.size());
    }
}
