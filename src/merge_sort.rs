//! Distributed merge sort.
//!
//! Per grid level, outermost to innermost: sort the local container, sample
//! splitters and compute intervals, redistribute the strings, and multiway
//! merge the received sorted runs. With prefix doubling enabled the driver
//! first shrinks every string to its distinguishing prefix, so only those
//! bytes take part in the exchanges, and the result is a permutation.

use mpi::collective::SystemOperation;
use mpi::traits::{Communicator, CommunicatorCollectives};

use crate::bloomfilter::{BloomFilter, FilterStrategy, GolombMode};
use crate::error::Result;
use crate::exchange::strings::{exchange_strings, ExchangeConfig, ExchangeResult};
use crate::grid::{comm_base_rank, Grid};
use crate::measure::MeasuringTool;
use crate::partition::{compute_partition, global_lcp_average, SampleParams};
use crate::permutation::InputPermutation;
use crate::sort::multikey::{fill_lcps, sort_container};
use crate::sort::multiway_merge;
use crate::strings::{StringContainer, StringOrigin};

/// Configuration of one distributed merge sort.
#[derive(Clone, Copy, Debug)]
pub struct MergeSortConfig {
    /// Splitter sampling.
    pub sample: SampleParams,
    /// String exchange compression.
    pub exchange: ExchangeConfig,
    /// Shrink strings to distinguishing prefixes before exchanging.
    pub prefix_doubling: bool,
    /// Filter exchange strategy for prefix doubling.
    pub filter_strategy: FilterStrategy,
    /// Hash-value compression for prefix doubling.
    pub golomb: GolombMode,
}

impl Default for MergeSortConfig {
    fn default() -> Self {
        Self {
            sample: SampleParams::default(),
            exchange: ExchangeConfig::default(),
            prefix_doubling: false,
            filter_strategy: FilterStrategy::SingleLevel,
            golomb: GolombMode::None,
        }
    }
}

/// The distributed merge-sort driver.
pub struct DistributedMergeSort {
    config: MergeSortConfig,
}

/// Largest string length anywhere on the communicator.
fn global_max_length<C: Communicator>(cont: &StringContainer, comm: &C) -> u64 {
    let local = (0..cont.len()).map(|i| cont.get(i).len()).max().unwrap_or(0) as u64;
    let mut global = 0u64;
    comm.all_reduce_into(&local, &mut global, SystemOperation::max());
    global
}

impl DistributedMergeSort {
    /// A driver with the given configuration.
    pub fn new(config: MergeSortConfig) -> Self {
        Self { config }
    }

    /// The configuration.
    pub fn config(&self) -> &MergeSortConfig {
        &self.config
    }

    /// Sort the distributed container. The result is locally sorted on
    /// every rank and globally ordered by rank. With prefix doubling
    /// enabled the returned strings are shrunk to distinguishing prefixes.
    pub fn sort(
        &self,
        cont: StringContainer,
        grid: &Grid,
        tool: &mut MeasuringTool,
    ) -> Result<StringContainer> {
        let (cont, _) = self.sort_impl(cont, grid, false, 0, tool)?;
        Ok(cont)
    }

    /// Sort and record, per grid level, where every output slot came from.
    /// Indices of the local input are offset by `index_offset`, so slices
    /// of a larger input resolve to their true local positions. The
    /// provenance chain resolves into an [`InputPermutation`] with
    /// [`crate::permutation::resolve_levels`].
    pub fn sort_with_provenance(
        &self,
        cont: StringContainer,
        grid: &Grid,
        index_offset: u64,
        tool: &mut MeasuringTool,
    ) -> Result<(StringContainer, Vec<InputPermutation>)> {
        self.sort_impl(cont, grid, true, index_offset, tool)
    }

    /// Sort a container whose strings carry origins, exchanging only
    /// distinguishing prefixes, and return the output permutation.
    pub fn sort_to_permutation(
        &self,
        mut cont: StringContainer,
        grid: &Grid,
        tool: &mut MeasuringTool,
    ) -> Result<(StringContainer, InputPermutation)> {
        debug_assert!(cont.origins().is_some());

        tool.start("local_sort");
        sort_container(&mut cont);
        tool.stop("local_sort");

        if self.config.prefix_doubling {
            tool.start("bloomfilter_overall");
            let prefixes = self.distinguishing_prefixes(&cont, grid, tool)?;
            cont = truncated(&cont, &prefixes);
            tool.stop("bloomfilter_overall");
        }

        let cont = self.sort_levels(cont, grid, None, tool)?;
        let permutation = InputPermutation::from_origins(cont.origins().expect("origins carried"));
        Ok((cont, permutation))
    }

    fn sort_impl(
        &self,
        mut cont: StringContainer,
        grid: &Grid,
        track_provenance: bool,
        index_offset: u64,
        tool: &mut MeasuringTool,
    ) -> Result<(StringContainer, Vec<InputPermutation>)> {
        tool.start("local_sort");
        let order = sort_container(&mut cont);
        tool.stop("local_sort");

        let mut levels = Vec::new();
        if track_provenance {
            let world_rank = grid.world().rank() as u64;
            let mut sigma = InputPermutation::new();
            sigma.reserve(order.len());
            for &index in &order {
                sigma.push(world_rank, index_offset + index as u64);
            }
            levels.push(sigma);
        }

        if self.config.prefix_doubling {
            tool.start("bloomfilter_overall");
            let prefixes = self.distinguishing_prefixes(&cont, grid, tool)?;
            cont = truncated(&cont, &prefixes);
            tool.stop("bloomfilter_overall");
        }

        let cont = self.sort_levels(
            cont,
            grid,
            track_provenance.then_some(&mut levels),
            tool,
        )?;
        Ok((cont, levels))
    }

    /// The per-level pipeline over an already locally sorted container.
    fn sort_levels(
        &self,
        mut cont: StringContainer,
        grid: &Grid,
        mut provenance: Option<&mut Vec<InputPermutation>>,
        tool: &mut MeasuringTool,
    ) -> Result<StringContainer> {
        for (round, level) in grid.sort_plan().into_iter().enumerate() {
            let comm = level.comm;
            let size = comm.size() as usize;
            let rank = comm.rank() as usize;
            tool.set_round(round as u64);

            tool.start("avg_lcp");
            let lcp_avg = global_lcp_average(&cont, comm);
            tool.stop("avg_lcp");

            tool.start("sample_splitters");
            let intervals = compute_partition(
                &cont,
                lcp_avg,
                level.num_partitions,
                &self.config.sample,
                comm,
            );
            tool.stop("sample_splitters");

            // partition j goes to the rank at our group-relative position
            // within the j-th group of the next level
            let mut dest_counts = vec![0; size];
            for (j, &count) in intervals.iter().enumerate() {
                let group_start = j * level.group_size;
                let group_len = level.group_size.min(size - group_start);
                dest_counts[group_start + rank % group_len] = count;
            }

            log::debug!(
                "level {round}: {} partitions over {size} ranks, {} strings",
                level.num_partitions,
                cont.len()
            );

            tool.start("string_exchange");
            let result = exchange_strings(&cont, &dest_counts, &self.config.exchange, comm)?;
            tool.stop("string_exchange");

            tool.start("merge_ranges");
            let ExchangeResult {
                container,
                runs,
                source_offsets,
            } = result;
            cont = container;
            let merged = multiway_merge(&cont, &runs);
            if let Some(ref mut levels) = provenance {
                levels.push(level_provenance(
                    &merged,
                    &runs,
                    &source_offsets,
                    comm_base_rank(comm, grid.world().rank()) as u64,
                ));
            }
            cont.reorder(&merged);
            fill_lcps(&mut cont);
            tool.stop("merge_ranges");

            tool.add(cont.len() as u64, "num_received_strings");
        }
        Ok(cont)
    }

    /// Distinguishing-prefix length of every local string, computed with
    /// the Bloom filter at doubling depths.
    pub fn distinguishing_prefixes(
        &self,
        cont: &StringContainer,
        grid: &Grid,
        tool: &mut MeasuringTool,
    ) -> Result<Vec<u64>> {
        let max_len = global_max_length(cont, grid.world());
        let mut filter = BloomFilter::new(
            cont.len(),
            self.config.filter_strategy,
            self.config.golomb,
        );
        let mut results = vec![0u64; cont.len()];
        let mut candidates: Vec<usize> = (0..cont.len()).collect();

        let world = grid.world();
        let mut depth = 1u64;
        loop {
            tool.start("bloomfilter_round");
            let (next, _) = filter.filter(cont, depth, &candidates, &mut results, grid);
            tool.stop("bloomfilter_round");
            tool.add(next.len() as u64, "bloomfilter_candidates");

            candidates = next;
            depth *= 2;

            // all ranks must agree on the number of rounds
            let local = candidates.len() as u64;
            let mut remaining = 0u64;
            world.all_reduce_into(&local, &mut remaining, SystemOperation::max());

            if remaining == 0 || depth > 2 * max_len.max(1) {
                // what is left cannot be distinguished at all
                for &candidate in &candidates {
                    results[candidate] = cont.get(candidate).len() as u64;
                }
                return Ok(results);
            }
        }
    }
}

/// Shrink every string to its distinguishing prefix, keeping origins.
fn truncated(cont: &StringContainer, prefixes: &[u64]) -> StringContainer {
    let mut bytes = Vec::new();
    for i in 0..cont.len() {
        let string = cont.get(i);
        bytes.extend_from_slice(&string[..string.len().min(prefixes[i] as usize)]);
        bytes.push(0);
    }
    let mut truncated = StringContainer::from_bytes(bytes);
    if let Some(origins) = cont.origins() {
        truncated
            .set_origins(origins.to_vec())
            .expect("origin count unchanged");
    }
    fill_lcps(&mut truncated);
    truncated
}

/// The provenance of one exchange level: output slot `k` of the merged
/// order came from world rank `base + source` at the source-local position
/// `source_offsets[source] + position within the run`.
fn level_provenance(
    merged: &[usize],
    runs: &[usize],
    source_offsets: &[usize],
    base_rank: u64,
) -> InputPermutation {
    let mut run_starts = Vec::with_capacity(runs.len());
    let mut offset = 0;
    for &run in runs {
        run_starts.push(offset);
        offset += run;
    }

    let mut level = InputPermutation::new();
    level.reserve(merged.len());
    for &idx in merged {
        let source = match run_starts.binary_search(&idx) {
            Ok(exact) => {
                // empty runs share a start position; take the last of them
                let mut source = exact;
                while source + 1 < runs.len() && run_starts[source + 1] == idx {
                    source += 1;
                }
                source
            }
            Err(after) => after - 1,
        };
        let position = source_offsets[source] + (idx - run_starts[source]);
        level.push(base_rank + source as u64, position as u64);
    }
    level
}

/// Origins for a rank's raw input, prior to any sorting. `offset` is the
/// local index of the first string, for slices of a larger input.
pub fn input_origins(world_rank: u64, offset: u64, count: usize) -> Vec<StringOrigin> {
    (0..count as u64)
        .map(|index| StringOrigin {
            rank: world_rank,
            index: offset + index,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_prefix_order() {
        let mut cont = StringContainer::from_bytes(b"ab\0abc\0abd\0b\0".to_vec());
        fill_lcps(&mut cont);
        let truncated = truncated(&cont, &[2, 3, 3, 1]);
        assert_eq!(truncated.get(0), b"ab");
        assert_eq!(truncated.get(1), b"abc");
        assert_eq!(truncated.get(2), b"abd");
        assert_eq!(truncated.get(3), b"b");
        for i in 1..truncated.len() {
            assert!(truncated.get(i - 1) <= truncated.get(i));
        }
    }

    #[test]
    fn provenance_maps_runs_to_sources() {
        // two runs of sizes 2 and 1 from sources at base rank 4
        let merged = vec![2, 0, 1];
        let level = level_provenance(&merged, &[2, 1], &[7, 0], 4);
        assert_eq!(
            level.iter().collect::<Vec<_>>(),
            vec![(5, 0), (4, 7), (4, 8)]
        );
    }

    #[test]
    fn provenance_skips_empty_runs() {
        let merged = vec![0, 1];
        let level = level_provenance(&merged, &[0, 0, 2], &[0, 0, 3], 0);
        assert_eq!(level.iter().collect::<Vec<_>>(), vec![(2, 3), (2, 4)]);
    }
}
