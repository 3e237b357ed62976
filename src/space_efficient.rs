//! Space-efficient sorting in bounded quantiles.
//!
//! The input may vastly exceed per-rank memory. The driver computes, from
//! the character budget, how many quantiles are needed, partitions the
//! locally sorted input into that many global value ranges with the sample
//! splitter engine, and sorts one quantile at a time with the distributed
//! merge sort. Concatenating the per-quantile outputs yields the global
//! sorted order; every input string learns its global rank. In non-unique
//! mode, runs of equal output strings collapse onto the rank of their
//! first member, across rank and quantile boundaries.

use mpi::collective::SystemOperation;
use mpi::traits::{Communicator, CommunicatorCollectives, Destination, Source};
use mpi::Count;
use rayon::slice::ParallelSliceMut;

use crate::error::Result;
use crate::exchange::collectives::alltoallv;
use crate::grid::Grid;
use crate::measure::MeasuringTool;
use crate::merge_sort::{input_origins, DistributedMergeSort, MergeSortConfig};
use crate::partition::{compute_partition, global_lcp_average, SampleParams};
use crate::permutation::{fetch_pairs, group_by_rank, resolve_levels, InputPermutation};
use crate::sort::sort_container;
use crate::strings::StringContainer;

/// How the output permutation is represented and produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermutationKind {
    /// Origins travel with the strings; one global rank per string.
    Simple,
    /// One `(rank, index)` pair per exchange level, resolved afterwards.
    MultiLevel,
    /// As `Simple`, but runs of equal strings share their head's rank.
    NonUnique,
}

impl PermutationKind {
    /// Decode the numeric CLI value.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Simple,
            2 => Self::NonUnique,
            _ => Self::MultiLevel,
        }
    }

    /// Whether equal strings keep distinct output ranks.
    pub fn is_unique(&self) -> bool {
        !matches!(self, Self::NonUnique)
    }
}

/// The space-efficient driver.
pub struct SpaceEfficientSort {
    /// Character budget of one quantile.
    pub quantile_size: usize,
    /// Output permutation variant.
    pub kind: PermutationKind,
    /// Configuration of the per-quantile merge sorts.
    pub merge: MergeSortConfig,
    /// Sampling used to cut the input into quantile value ranges.
    pub quantile_sample: SampleParams,
}

impl SpaceEfficientSort {
    /// A driver with the given quantile budget and permutation kind. The
    /// quantile boundaries use the merge sort's sampling policy.
    pub fn new(quantile_size: usize, kind: PermutationKind, merge: MergeSortConfig) -> Self {
        Self {
            quantile_size,
            kind,
            merge,
            quantile_sample: merge.sample,
        }
    }

    /// Use a separate sampling policy for the quantile boundaries.
    pub fn with_quantile_sampler(mut self, sample: SampleParams) -> Self {
        self.quantile_sample = sample;
        self
    }

    /// Sort the distributed container quantile by quantile. Returns, for
    /// every local input string, its global rank in the sorted order.
    pub fn sort(
        &self,
        cont: &StringContainer,
        grid: &Grid,
        tool: &mut MeasuringTool,
    ) -> Result<Vec<u64>> {
        let world = grid.world();
        let size = world.size() as usize;
        let world_rank = world.rank() as u64;
        let n_local = cont.len();
        let mut global_ranks = vec![0u64; n_local];

        // sorted working copy; origins or the sort order keep the input
        // identity of every string
        tool.start("local_sort");
        let mut work = cont.clone();
        if self.kind != PermutationKind::MultiLevel {
            work.set_origins(input_origins(world_rank, 0, n_local))
                .expect("origin count matches");
        }
        let order = sort_container(&mut work);
        tool.stop("local_sort");

        let sigma = (self.kind == PermutationKind::MultiLevel).then(|| {
            let mut sigma = InputPermutation::new();
            sigma.reserve(order.len());
            for &index in &order {
                sigma.push(world_rank, index as u64);
            }
            sigma
        });

        // cut the sorted input into globally aligned value ranges sized by
        // the character budget
        tool.start("compute_quantiles");
        let local_quantiles = cont
            .char_size()
            .div_ceil(self.quantile_size.max(1))
            .max(1) as u64;
        let mut num_quantiles = 0u64;
        world.all_reduce_into(&local_quantiles, &mut num_quantiles, SystemOperation::max());

        let lcp_avg = global_lcp_average(&work, world);
        let intervals = compute_partition(
            &work,
            lcp_avg,
            num_quantiles as usize,
            &self.quantile_sample,
            world,
        );
        tool.stop("compute_quantiles");
        tool.add(num_quantiles, "num_quantiles");

        let sorter = DistributedMergeSort::new(self.merge);
        let mut quantile_base = 0u64;
        let mut carry: Option<(Vec<u8>, u64)> = None;
        let mut start = 0;
        for (q, &count) in intervals.iter().enumerate() {
            tool.set_round(q as u64);
            log::debug!("sorting quantile {q} with {count} local strings");
            let slice = work.subset(start, count);

            let (sorted, pairs) = match self.kind {
                PermutationKind::Simple | PermutationKind::NonUnique => {
                    sorter.sort_to_permutation(slice, grid, tool)?
                }
                PermutationKind::MultiLevel => {
                    let (sorted, levels) =
                        sorter.sort_with_provenance(slice, grid, start as u64, tool)?;
                    tool.start("resolve_permutation");
                    let resolved = resolve_levels(&levels, world);
                    // one more hop through the local sort order
                    let pairs = fetch_pairs(&resolved, sigma.as_ref().unwrap(), world);
                    tool.stop("resolve_permutation");
                    (sorted, pairs)
                }
            };

            // global output positions of this quantile, ordered by rank
            let out_count = sorted.len() as u64;
            let mut counts = vec![0u64; size];
            world.all_gather_into(&out_count, &mut counts[..]);
            let my_start: u64 = counts[..world.rank() as usize].iter().sum();
            let total: u64 = counts.iter().sum();

            let mut values: Vec<u64> = (0..sorted.len())
                .map(|k| quantile_base + my_start + k as u64)
                .collect();
            if self.kind == PermutationKind::NonUnique {
                carry = collapse_equal_runs(&sorted, &mut values, carry.take(), world);
            }
            quantile_base += total;

            // hand every string's rank back to its origin
            tool.start("return_ranks");
            let (group_counts, grouped) = group_by_rank(pairs.ranks(), size);
            let payload: Vec<u64> = grouped
                .iter()
                .flat_map(|&k| [pairs.string(k), values[k]])
                .collect();
            let pair_counts: Vec<Count> = group_counts.iter().map(|&c| 2 * c).collect();
            let (received, _) = alltoallv(&payload, &pair_counts, world);
            for chunk in received.chunks_exact(2) {
                global_ranks[chunk[0] as usize] = chunk[1];
            }
            tool.stop("return_ranks");

            start += count;
        }

        Ok(global_ranks)
    }
}

/// Give every member of a run of equal strings the global rank of the run's
/// first member. Runs spanning rank boundaries inherit through a serialized
/// neighbor chain; ranks whose whole block is one run forward the inherited
/// state. `carry` seeds rank 0 with the final state of the previous
/// quantile and the updated state is returned to rank 0 for the next one.
fn collapse_equal_runs<C: Communicator>(
    sorted: &StringContainer,
    values: &mut [u64],
    carry: Option<(Vec<u8>, u64)>,
    comm: &C,
) -> Option<(Vec<u8>, u64)> {
    for k in 1..sorted.len() {
        if sorted.get(k) == sorted.get(k - 1) {
            values[k] = values[k - 1];
        }
    }

    let rank = comm.rank();
    let size = comm.size();

    let pred = if rank == 0 {
        carry
    } else {
        receive_state(comm, rank - 1)
    };

    if let Some((ref bytes, value)) = pred {
        let mut k = 0;
        while k < values.len() && sorted.get(k) == &bytes[..] {
            values[k] = value;
            k += 1;
        }
    }

    // my outgoing state: the head value of my last run, or pass-through
    let state = match values.len().checked_sub(1) {
        Some(last) => Some((sorted.get(last).to_vec(), values[last])),
        None => pred,
    };

    if size == 1 {
        return state;
    }
    if rank < size - 1 {
        send_state(comm, rank + 1, &state);
    }

    // the chain tail hands the final state back to the root
    if rank == size - 1 {
        send_state(comm, 0, &state);
        None
    } else if rank == 0 {
        receive_state(comm, size - 1)
    } else {
        None
    }
}

fn send_state<C: Communicator>(comm: &C, dest: i32, state: &Option<(Vec<u8>, u64)>) {
    const NONE: u64 = u64::MAX;
    let header = match state {
        Some((bytes, value)) => [*value, bytes.len() as u64],
        None => [0, NONE],
    };
    comm.process_at_rank(dest).send(&header[..]);
    if let Some((bytes, _)) = state {
        if !bytes.is_empty() {
            comm.process_at_rank(dest).send(&bytes[..]);
        }
    }
}

fn receive_state<C: Communicator>(comm: &C, source: i32) -> Option<(Vec<u8>, u64)> {
    const NONE: u64 = u64::MAX;
    let mut header = [0u64; 2];
    comm.process_at_rank(source).receive_into(&mut header[..]);
    if header[1] == NONE {
        return None;
    }
    let mut bytes = vec![0u8; header[1] as usize];
    if !bytes.is_empty() {
        comm.process_at_rank(source).receive_into(&mut bytes[..]);
    }
    Some((bytes, header[0]))
}

/// Redistribute rank values so each of the `p` ranks owns one contiguous
/// value interval.
fn distribute_ranks<C: Communicator>(global_ranks: &[u64], comm: &C) -> Vec<u64> {
    let local_upper = global_ranks.iter().max().map_or(0, |&m| m + 1);
    let mut upper = 0u64;
    comm.all_reduce_into(&local_upper, &mut upper, SystemOperation::max());
    let interval = upper.div_ceil(comm.size() as u64).max(1);

    let dests: Vec<u64> = global_ranks.iter().map(|&v| v / interval).collect();
    let (counts, grouped) = group_by_rank(&dests, comm.size() as usize);
    let send: Vec<u64> = grouped.iter().map(|&p| global_ranks[p]).collect();
    alltoallv(&send, &counts, comm).0
}

/// Count distinct and duplicated rank values over all ranks. A value is
/// duplicated if it occurs more than once; every occurrence counts.
pub fn count_duplicate_ranks<C: Communicator>(
    global_ranks: &[u64],
    comm: &C,
    tool: &mut MeasuringTool,
) {
    let mut dist = distribute_ranks(global_ranks, comm);
    let total = dist.len() as u64;
    let mut distinct = 0u64;
    let mut duplicate = 0u64;

    dist.par_sort_unstable();
    let mut i = 0;
    while i < dist.len() {
        let mut j = i + 1;
        while j < dist.len() && dist[j] == dist[i] {
            j += 1;
        }
        distinct += 1;
        if j - i > 1 {
            duplicate += (j - i) as u64;
        }
        i = j;
    }

    tool.add(total, "total_ranks");
    tool.add(distinct, "distinct_ranks");
    tool.add(duplicate, "duplicate_ranks");
    tool.add(total - distinct, "total_duplicates");
}
