//! Multi-rank string-exchange checks; run with `mpirun -n <p>`.
use mpi::traits::Communicator;

use dss::exchange::{exchange_strings, AlltoallRoutine, ExchangeConfig};
use dss::sort::fill_lcps;
use dss::strings::StringContainer;

/// LCP-compressed exchange of a shared-prefix batch must reproduce the
/// uncompressed bytes on the receiver.
fn prefix_compression_scenario(world: &mpi::topology::SimpleCommunicator) {
    let rank = world.rank();
    let size = world.size() as usize;

    let mut cont = if rank == 0 {
        StringContainer::from_bytes(b"aaaaab\0aaaaac\0aaaaad\0".to_vec())
    } else {
        StringContainer::from_bytes(Vec::new())
    };
    fill_lcps(&mut cont);
    assert_eq!(cont.lcps(), if rank == 0 { &[0, 5, 5][..] } else { &[] });

    // everything goes to the last rank
    let mut dest_counts = vec![0; size];
    dest_counts[size - 1] = cont.len();

    let config = ExchangeConfig {
        routine: AlltoallRoutine::Combined,
        lcp_compression: false,
        prefix_compression: true,
    };
    let result = exchange_strings(&cont, &dest_counts, &config, world).unwrap();

    if rank == size as i32 - 1 {
        assert_eq!(result.container.raw_bytes(), b"aaaaab\0aaaaac\0aaaaad\0");
        assert_eq!(result.runs.iter().sum::<usize>(), 3);
    } else {
        assert!(result.container.is_empty());
    }
}

/// All compression modes must agree with the plain exchange.
fn compression_equivalence_scenario(world: &mpi::topology::SimpleCommunicator) {
    let rank = world.rank() as usize;
    let size = world.size() as usize;

    // every rank spreads a sorted batch of shared-prefix strings evenly
    let mut bytes = Vec::new();
    for i in 0..4 * size {
        bytes.extend_from_slice(b"prefix");
        bytes.extend_from_slice(format!("{rank:02}{i:04}").as_bytes());
        bytes.push(0);
    }
    let mut cont = StringContainer::from_bytes(bytes);
    fill_lcps(&mut cont);
    let dest_counts = vec![4; size];

    let mut outputs = Vec::new();
    for (lcp_compression, prefix_compression) in
        [(false, false), (false, true), (true, false), (true, true)]
    {
        let config = ExchangeConfig {
            routine: AlltoallRoutine::Combined,
            lcp_compression,
            prefix_compression,
        };
        let result = exchange_strings(&cont, &dest_counts, &config, world).unwrap();
        assert_eq!(result.runs, vec![4; size]);
        assert_eq!(result.source_offsets, vec![4 * rank; size]);
        outputs.push(result.container.raw_bytes().to_vec());
    }
    for output in &outputs[1..] {
        assert_eq!(output, &outputs[0]);
    }
}

fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();

    prefix_compression_scenario(&world);
    compression_equivalence_scenario(&world);

    if world.rank() == 0 {
        println!("mpi_test_exchange passed on {} ranks", world.size());
    }
}
