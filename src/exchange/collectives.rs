//! Thin wrappers over the variable-count collectives.

use itertools::Itertools;
use mpi::datatype::{Partition, PartitionMut};
use mpi::traits::{Communicator, CommunicatorCollectives, Equivalence};
use mpi::Count;

/// Exclusive prefix sum of counts, as used for send/receive displacements.
pub fn exclusive_scan(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let tmp = *acc;
            *acc += x;
            Some(tmp)
        })
        .collect_vec()
}

/// Variable-count all-to-all. `send_counts` holds one entry per rank of
/// `comm`; the elements for each destination are consecutive in `send`.
/// Returns the received elements and the per-source counts.
pub fn alltoallv<T, C>(send: &[T], send_counts: &[Count], comm: &C) -> (Vec<T>, Vec<Count>)
where
    T: Equivalence + Default + Clone,
    C: Communicator,
{
    let size = comm.size() as usize;
    debug_assert_eq!(send_counts.len(), size);
    debug_assert_eq!(send_counts.iter().sum::<Count>() as usize, send.len());

    let mut recv_counts = vec![0 as Count; size];
    comm.all_to_all_into(send_counts, &mut recv_counts);

    let send_displs = exclusive_scan(send_counts);
    let recv_displs = exclusive_scan(&recv_counts);
    let total = recv_counts.iter().sum::<Count>();

    let mut received = vec![T::default(); total as usize];
    let partition_snd = Partition::new(send, send_counts, &send_displs[..]);
    let mut partition_recv =
        PartitionMut::new(&mut received[..], &recv_counts[..], &recv_displs[..]);
    comm.all_to_all_varcount_into(&partition_snd, &mut partition_recv);

    (received, recv_counts)
}

/// Variable-count allgather: every rank receives the concatenation of all
/// local contributions, in rank order.
pub fn allgatherv<T, C>(local: &[T], comm: &C) -> Vec<T>
where
    T: Equivalence + Default + Clone,
    C: Communicator,
{
    let size = comm.size() as usize;
    let local_count = local.len() as Count;
    let mut counts = vec![0 as Count; size];
    comm.all_gather_into(&local_count, &mut counts[..]);

    let displs = exclusive_scan(&counts);
    let total = counts.iter().sum::<Count>();

    let mut received = vec![T::default(); total as usize];
    let mut partition = PartitionMut::new(&mut received[..], &counts[..], &displs[..]);
    comm.all_gather_varcount_into(local, &mut partition);

    received
}

#[cfg(test)]
mod tests {
    use super::exclusive_scan;

    #[test]
    fn scan_produces_displacements() {
        assert_eq!(exclusive_scan(&[3, 0, 2, 5]), vec![0, 3, 3, 5]);
        assert_eq!(exclusive_scan(&[]), Vec::<i32>::new());
    }
}
