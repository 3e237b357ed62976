//! Distributed duplicate detection for prefix doubling.
//!
//! At every depth `d` the filter hashes the `d`-byte prefix of each
//! candidate string and decides, locally by hash or LCP and remotely by a
//! hash exchange, which candidates collide. Only colliding candidates
//! advance to depth `2 d`; all others have found their distinguishing
//! prefix. Hash collisions may report false positives, which merely survive
//! one extra doubling step.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use itertools::Itertools;
use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator, CommunicatorCollectives};
use mpi::Count;
use rayon::slice::ParallelSliceMut;

use crate::exchange::collectives::{alltoallv, exclusive_scan};
use crate::exchange::golomb::{golomb_decode_deltas, golomb_encode_deltas, golomb_parameter};
use crate::grid::Grid;
use crate::hash::{hash_extend, hash_prefix, FILTER_SIZE};
use crate::strings::StringContainer;

/// Per-string record while preparing a filter round.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashStringIndex {
    /// Hash of the current-depth prefix.
    pub hash: u64,
    /// Index of the string in the local container.
    pub string_index: usize,
    /// Shares its hash with another local string.
    pub is_local_duplicate: bool,
    /// First of a local run; sent anyway to learn of remote collisions.
    pub send_anyway: bool,
    /// Representative of a run of LCP-equivalent neighbors.
    pub is_lcp_local_root: bool,
}

/// Per-hash record on the receiving side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashPeIndex {
    /// The received hash.
    pub hash: u64,
    /// Rank it was received from.
    pub pe_index: usize,
}

/// Inclusive interval of the 64-bit hash space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashRange {
    /// Lowest hash of the range.
    pub lower: u64,
    /// Highest hash of the range.
    pub upper: u64,
}

impl HashRange {
    /// The full hash space.
    pub fn full() -> Self {
        Self {
            lower: 0,
            upper: FILTER_SIZE,
        }
    }

    fn bucket_width(&self, num_buckets: usize) -> u64 {
        (self.upper - self.lower) / num_buckets as u64
    }

    /// The `idx`-th of `num_buckets` equal sub-ranges; the last bucket
    /// absorbs the remainder.
    pub fn bucket(&self, idx: usize, num_buckets: usize) -> Self {
        let width = self.bucket_width(num_buckets);
        let lower = self.lower + idx as u64 * width;
        if idx + 1 == num_buckets {
            Self {
                lower,
                upper: self.upper,
            }
        } else {
            Self {
                lower,
                upper: lower + width - 1,
            }
        }
    }
}

/// Hash-value compression during the filter exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GolombMode {
    /// Send raw hashes.
    None,
    /// Golomb-code the sorted hash gaps of each interval.
    Sequential,
    /// Pipelined coding; behaves like `Sequential`.
    Pipelined,
}

impl GolombMode {
    /// Decode the numeric CLI value.
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => Self::Sequential,
            2 => Self::Pipelined,
            _ => Self::None,
        }
    }

    fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Single- or multi-level filter exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStrategy {
    /// One exchange over the world communicator.
    SingleLevel,
    /// Recursive exchanges over the whole grid.
    MultiLevel,
}

/// Everything received by one filter exchange.
struct RecvData {
    hashes: Vec<u64>,
    interval_sizes: Vec<usize>,
    global_offsets: Vec<usize>,
}

/// Interval sizes of the sorted `hashes` under the equal-width buckets of
/// `range`.
fn compute_interval_sizes(hashes: &[u64], range: HashRange, num_intervals: usize) -> Vec<usize> {
    let width = range.bucket_width(num_intervals);
    let mut intervals = Vec::with_capacity(num_intervals);
    let mut current = 0;
    for i in 0..num_intervals - 1 {
        let upper_limit = range.lower + (i as u64 + 1) * width - 1;
        let pos = current + hashes[current..].partition_point(|&h| h <= upper_limit);
        intervals.push(pos - current);
        current = pos;
    }
    intervals.push(hashes.len() - current);
    intervals
}

/// Partition the sorted hashes into the ranks of `comm` by hash range and
/// exchange them, together with the per-interval counts and the senders'
/// local offsets.
fn send_to_filter(
    hashes: &[u64],
    range: HashRange,
    golomb: GolombMode,
    comm: &SimpleCommunicator,
) -> RecvData {
    let size = comm.size() as usize;
    let interval_sizes = compute_interval_sizes(hashes, range, size);
    let offsets: Vec<usize> = {
        let counts: Vec<Count> = interval_sizes.iter().map(|&c| c as Count).collect();
        exclusive_scan(&counts).iter().map(|&o| o as usize).collect()
    };

    let send_sizes: Vec<u64> = interval_sizes.iter().map(|&c| c as u64).collect();
    let send_offsets: Vec<u64> = offsets.iter().map(|&o| o as u64).collect();
    let mut recv_sizes = vec![0u64; size];
    let mut recv_offsets = vec![0u64; size];
    comm.all_to_all_into(&send_sizes, &mut recv_sizes);
    comm.all_to_all_into(&send_offsets, &mut recv_offsets);

    let recv_hashes = if golomb.is_enabled() {
        // per interval: (encoded_len, b) then the packed words of the gaps
        let mut stream = Vec::new();
        let mut stream_counts = Vec::with_capacity(size);
        let mut start = 0;
        for (idx, &count) in interval_sizes.iter().enumerate() {
            let bucket = range.bucket(idx, size);
            let interval = &hashes[start..start + count];
            let b = golomb_parameter(bucket.upper - bucket.lower, count as u64);
            let words = golomb_encode_deltas(interval, bucket.lower, b);
            stream.push(words.len() as u64);
            stream.push(b);
            stream.extend_from_slice(&words);
            stream_counts.push((2 + words.len()) as Count);
            start += count;
        }
        let (recv_stream, _) = alltoallv(&stream, &stream_counts, comm);

        let my_bucket = range.bucket(comm.rank() as usize, size);
        let mut decoded = Vec::new();
        let mut cursor = 0;
        for &count in recv_sizes.iter() {
            let n_words = recv_stream[cursor] as usize;
            let b = recv_stream[cursor + 1];
            cursor += 2;
            decoded.extend(golomb_decode_deltas(
                &recv_stream[cursor..cursor + n_words],
                count as usize,
                my_bucket.lower,
                b,
            ));
            cursor += n_words;
        }
        decoded
    } else {
        let counts: Vec<Count> = interval_sizes.iter().map(|&c| c as Count).collect();
        alltoallv(hashes, &counts, comm).0
    };

    RecvData {
        hashes: recv_hashes,
        interval_sizes: recv_sizes.iter().map(|&c| c as usize).collect(),
        global_offsets: recv_offsets.iter().map(|&o| o as usize).collect(),
    }
}

/// Multiway-merge the received per-source sorted runs, annotating every
/// hash with its source rank.
fn merge_hash_rank_pairs(recv: &RecvData) -> Vec<HashPeIndex> {
    let mut starts = Vec::with_capacity(recv.interval_sizes.len());
    let mut offset = 0;
    for &size in &recv.interval_sizes {
        starts.push(offset);
        offset += size;
    }

    let mut heap = BinaryHeap::new();
    for (pe, (&start, &len)) in starts.iter().zip(&recv.interval_sizes).enumerate() {
        if len > 0 {
            heap.push(Reverse((recv.hashes[start], pe, 0usize)));
        }
    }

    let mut merged = Vec::with_capacity(recv.hashes.len());
    while let Some(Reverse((hash, pe, pos))) = heap.pop() {
        merged.push(HashPeIndex {
            hash,
            pe_index: pe,
        });
        let next = pos + 1;
        if next < recv.interval_sizes[pe] {
            heap.push(Reverse((recv.hashes[starts[pe] + next], pe, next)));
        }
    }
    merged
}

/// Scan the merged sequence for duplicates and send every duplicate's
/// position (in its sender's hash array) back to the sender. Returns the
/// positions of this rank's own remote duplicates, sorted, plus whether any
/// duplicate exists globally.
fn find_duplicates(
    hash_rank_pairs: &[HashPeIndex],
    recv: RecvData,
    comm: &SimpleCommunicator,
) -> (Vec<u64>, bool) {
    let size = comm.size() as usize;
    let mut result_sets: Vec<Vec<u64>> = vec![Vec::new(); size];
    let mut counters = recv.global_offsets;

    if !hash_rank_pairs.is_empty() {
        let mut duplicate = false;
        for window in hash_rank_pairs.windows(2) {
            let (prev, curr) = (window[0], window[1]);
            let idx = counters[prev.pe_index] as u64;
            counters[prev.pe_index] += 1;
            if prev.hash == curr.hash {
                result_sets[prev.pe_index].push(idx);
                duplicate = true;
            } else if duplicate {
                result_sets[prev.pe_index].push(idx);
                duplicate = false;
            }
        }
        if duplicate {
            let last = hash_rank_pairs.last().unwrap();
            result_sets[last.pe_index].push(counters[last.pe_index] as u64);
        }
    }

    let send_counts: Vec<Count> = result_sets.iter().map(|s| s.len() as Count).collect();
    let send_buf: Vec<u64> = result_sets.into_iter().flatten().collect();

    let local_any = !send_buf.is_empty() as u64;
    let mut global_any = 0u64;
    comm.all_reduce_into(&local_any, &mut global_any, SystemOperation::max());

    let duplicates = if global_any != 0 {
        alltoallv(&send_buf, &send_counts, comm).0
    } else {
        Vec::new()
    };
    (duplicates, global_any != 0)
}

/// Recursive filter exchange over the grid levels, innermost group first.
/// Returns sorted positions into the hash array passed in, plus the global
/// duplicate flag from the detection level.
fn find_remote_duplicates(
    comms: &[SimpleCommunicator],
    hashes: &[u64],
    range: HashRange,
    golomb: GolombMode,
) -> (Vec<u64>, bool) {
    let comm = &comms[0];
    let recv = send_to_filter(hashes, range, golomb, comm);
    let hash_rank_pairs = merge_hash_rank_pairs(&recv);

    if comms.len() == 1 {
        return find_duplicates(&hash_rank_pairs, recv, comm);
    }

    let sub_range = range.bucket(comm.rank() as usize, comm.size() as usize);
    let forwarded = hash_rank_pairs.iter().map(|p| p.hash).collect_vec();
    let (duplicates, any) = find_remote_duplicates(&comms[1..], &forwarded, sub_range, golomb);

    // translate the deeper level's positions back into every origin's array
    let mut send_counts = vec![0 as Count; recv.global_offsets.len()];
    for &dup in &duplicates {
        send_counts[hash_rank_pairs[dup as usize].pe_index] += 1;
    }
    let mut offsets = exclusive_scan(&send_counts);

    let mut counters = recv.global_offsets;
    let mut remote_idxs = vec![0u64; duplicates.len()];
    let mut walked = 0;
    for &dup in &duplicates {
        while walked < dup as usize {
            counters[hash_rank_pairs[walked].pe_index] += 1;
            walked += 1;
        }
        let pe = hash_rank_pairs[dup as usize].pe_index;
        remote_idxs[offsets[pe] as usize] = counters[pe] as u64;
        offsets[pe] += 1;
        counters[pe] += 1;
        walked += 1;
    }

    (alltoallv(&remote_idxs, &send_counts, comm).0, any)
}

/// Output of a hash-pair generation pass.
#[derive(Default)]
struct GeneratedHashPairs {
    hash_idx_pairs: Vec<HashStringIndex>,
    lcp_duplicates: Vec<usize>,
    eos_candidates: Vec<usize>,
}

/// The duplicate filter; holds the rolling per-string hashes between
/// doubling rounds.
pub struct BloomFilter {
    hash_values: Vec<u64>,
    hash_depths: Vec<u64>,
    strategy: FilterStrategy,
    golomb: GolombMode,
}

impl BloomFilter {
    /// A filter for `size` local strings.
    pub fn new(size: usize, strategy: FilterStrategy, golomb: GolombMode) -> Self {
        Self {
            hash_values: vec![0; size],
            hash_depths: vec![0; size],
            strategy,
            golomb,
        }
    }

    /// Run one filter round at `depth` over the candidate set. Marks the
    /// distinguishing prefix of every retiring candidate in `results` and
    /// returns the depth-`2 d` candidate set plus whether any duplicate
    /// exists globally.
    pub fn filter(
        &mut self,
        cont: &StringContainer,
        depth: u64,
        candidates: &[usize],
        results: &mut [u64],
        grid: &Grid,
    ) -> (Vec<usize>, bool) {
        let generated = self.generate_hash_pairs(cont, candidates, depth);
        let mut pairs = generated.hash_idx_pairs;

        pairs.par_sort_unstable_by_key(|p| (p.hash, p.string_index));
        let mut local_hash_dups = get_local_duplicates(&mut pairs);
        pairs.retain(|p| !p.is_local_duplicate || p.send_anyway);

        let levels = grid.filter_levels();
        let comms = match self.strategy {
            FilterStrategy::SingleLevel => &levels[levels.len() - 1..],
            FilterStrategy::MultiLevel => levels,
        };
        let hashes = pairs.iter().map(|p| p.hash).collect_vec();
        let (remote_dups, any) =
            find_remote_duplicates(comms, &hashes, HashRange::full(), self.golomb);

        local_hash_dups.par_sort_unstable();
        let duplicates = merge_duplicate_indices(
            local_hash_dups,
            generated.lcp_duplicates,
            &remote_dups,
            &pairs,
        );

        for &candidate in candidates {
            results[candidate] = depth;
        }
        for &candidate in &generated.eos_candidates {
            results[candidate] = cont.get(candidate).len() as u64;
        }

        (duplicates, any)
    }

    /// Classify every candidate: strings shorter than `depth` retire as EOS
    /// candidates, LCP-covered neighbors of the previous candidate become
    /// LCP-local duplicates, everything else is hashed.
    fn generate_hash_pairs(
        &mut self,
        cont: &StringContainer,
        candidates: &[usize],
        depth: u64,
    ) -> GeneratedHashPairs {
        if candidates.is_empty() {
            return GeneratedHashPairs::default();
        }

        let mut generated = GeneratedHashPairs::default();
        generated.hash_idx_pairs.reserve(candidates.len());

        let mut prev = candidates[0];
        for &curr in candidates {
            let string = cont.get(curr);
            if depth > string.len() as u64 {
                generated.eos_candidates.push(curr);
            } else if prev + 1 == curr && cont.lcps()[curr] >= depth {
                generated.lcp_duplicates.push(curr);
                if let Some(last) = generated.hash_idx_pairs.last_mut() {
                    if last.string_index + 1 == curr {
                        last.is_lcp_local_root = true;
                    }
                }
            } else {
                let hash = if depth > 1 && self.hash_depths[curr] * 2 == depth {
                    let half = (depth / 2) as usize;
                    hash_extend(self.hash_values[curr], &string[half..depth as usize])
                } else {
                    hash_prefix(string, depth as usize)
                };
                self.hash_values[curr] = hash;
                self.hash_depths[curr] = depth;
                generated.hash_idx_pairs.push(HashStringIndex {
                    hash,
                    string_index: curr,
                    ..Default::default()
                });
            }
            prev = curr;
        }
        generated
    }
}

/// Mark runs of equal hashes. The first of every run is sent anyway so its
/// rank learns of potential remote collisions; the rest are dropped from
/// the send set. Lone LCP-local roots are duplicates by proxy and likewise
/// sent. Returns the local duplicates' string indices.
fn get_local_duplicates(pairs: &mut [HashStringIndex]) -> Vec<usize> {
    let mut duplicates = Vec::new();
    if pairs.is_empty() {
        return duplicates;
    }

    let mut i = 0;
    while i + 1 < pairs.len() {
        if pairs[i + 1].hash == pairs[i].hash {
            let hash = pairs[i].hash;
            pairs[i].is_local_duplicate = true;
            pairs[i].send_anyway = true;
            duplicates.push(pairs[i].string_index);
            i += 1;
            while i < pairs.len() && pairs[i].hash == hash {
                pairs[i].is_local_duplicate = true;
                duplicates.push(pairs[i].string_index);
                i += 1;
            }
        } else {
            if pairs[i].is_lcp_local_root {
                pairs[i].is_local_duplicate = true;
                pairs[i].send_anyway = true;
                duplicates.push(pairs[i].string_index);
            }
            i += 1;
        }
    }
    if i < pairs.len() && pairs[i].is_lcp_local_root && !pairs[i].is_local_duplicate {
        pairs[i].is_local_duplicate = true;
        pairs[i].send_anyway = true;
        duplicates.push(pairs[i].string_index);
    }
    duplicates
}

/// Combine local hash duplicates, LCP-local duplicates and returned remote
/// duplicates into the sorted candidate set for the next depth. Remote
/// echoes of locally duplicate send-anyway pairs are dropped.
fn merge_duplicate_indices(
    local_hash_dups: Vec<usize>,
    lcp_dups: Vec<usize>,
    remote_dups: &[u64],
    sent_pairs: &[HashStringIndex],
) -> Vec<usize> {
    let mut remote: Vec<usize> = remote_dups
        .iter()
        .map(|&pos| sent_pairs[pos as usize])
        .filter(|pair| !pair.send_anyway)
        .map(|pair| pair.string_index)
        .collect();
    remote.par_sort_unstable();

    // three-way merge of sorted, mutually disjoint index lists
    let mut merged = Vec::with_capacity(local_hash_dups.len() + lcp_dups.len() + remote.len());
    let mut heads = [
        local_hash_dups.as_slice(),
        lcp_dups.as_slice(),
        remote.as_slice(),
    ];
    loop {
        let Some(which) = heads
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .min_by_key(|(_, h)| h[0])
            .map(|(i, _)| i)
        else {
            break;
        };
        merged.push(heads[which][0]);
        heads[which] = &heads[which][1..];
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_cover_the_range() {
        let range = HashRange { lower: 0, upper: 103 };
        let buckets: Vec<_> = (0..4).map(|i| range.bucket(i, 4)).collect();
        assert_eq!(buckets[0], HashRange { lower: 0, upper: 24 });
        assert_eq!(buckets[1], HashRange { lower: 25, upper: 49 });
        assert_eq!(buckets[3], HashRange { lower: 75, upper: 103 });
    }

    #[test]
    fn interval_sizes_partition_sorted_hashes() {
        let range = HashRange { lower: 0, upper: 99 };
        let hashes = [2, 3, 24, 25, 26, 75, 99];
        let intervals = compute_interval_sizes(&hashes, range, 4);
        assert_eq!(intervals, vec![3, 2, 0, 2]);
        assert_eq!(intervals.iter().sum::<usize>(), hashes.len());
    }

    fn pair(hash: u64, index: usize) -> HashStringIndex {
        HashStringIndex {
            hash,
            string_index: index,
            ..Default::default()
        }
    }

    #[test]
    fn local_runs_are_marked() {
        let mut pairs = vec![pair(10, 0), pair(10, 2), pair(10, 5), pair(20, 1), pair(30, 4)];
        let dups = get_local_duplicates(&mut pairs);
        assert_eq!(dups, vec![0, 2, 5]);
        assert!(pairs[0].send_anyway);
        assert!(pairs[1].is_local_duplicate && !pairs[1].send_anyway);
        assert!(!pairs[3].is_local_duplicate);
        let sent: Vec<usize> = pairs
            .iter()
            .filter(|p| !p.is_local_duplicate || p.send_anyway)
            .map(|p| p.string_index)
            .collect();
        assert_eq!(sent, vec![0, 1, 4]);
    }

    #[test]
    fn lone_lcp_root_is_sent_anyway() {
        let mut pairs = vec![pair(10, 0), pair(20, 3)];
        pairs[1].is_lcp_local_root = true;
        let dups = get_local_duplicates(&mut pairs);
        assert_eq!(dups, vec![3]);
        assert!(pairs[1].send_anyway);
    }

    #[test]
    fn remote_echoes_of_send_anyway_are_dropped() {
        let mut sent = vec![pair(10, 4), pair(20, 7)];
        sent[0].send_anyway = true;
        let merged = merge_duplicate_indices(vec![1, 4], vec![2], &[0, 1], &sent);
        assert_eq!(merged, vec![1, 2, 4, 7]);
    }
}
