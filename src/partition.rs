//! Sample splitter engine.
//!
//! Computes, for a locally sorted container, the `p` interval sizes of an
//! all-to-all exchange: every rank draws an oversampled splitter sample,
//! the sample is sorted globally so each rank holds the identical sorted
//! sequence, `p - 1` splitters are chosen at fixed positions, and the local
//! intervals fall out of a binary search per splitter.

use std::cmp::Ordering;

use mpi::collective::SystemOperation;
use mpi::traits::{Communicator, CommunicatorCollectives};

use crate::exchange::collectives::allgatherv;
use crate::sort::sort_container;
use crate::strings::{StringContainer, StringOrigin};

/// Average LCP over all strings of the communicator; bounds the sampled
/// splitter lengths.
pub fn global_lcp_average<C: Communicator>(cont: &StringContainer, comm: &C) -> u64 {
    let local = [cont.lcps().iter().sum::<u64>(), cont.len() as u64];
    let mut global = [0u64; 2];
    comm.all_reduce_into(&local[..], &mut global[..], SystemOperation::sum());
    global[0] / global[1].max(1)
}

/// Splitter sampling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplePolicy {
    /// Sample uniformly over strings.
    Strings,
    /// Sample weighted by characters.
    Chars,
    /// As `Strings`, attaching the `(rank, index)` origin for tie-breaking.
    IndexedStrings,
    /// As `Chars`, attaching the origin.
    IndexedChars,
}

impl SamplePolicy {
    /// Decode the numeric CLI value.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Strings,
            1 => Self::Chars,
            2 => Self::IndexedStrings,
            _ => Self::IndexedChars,
        }
    }

    /// Whether samples carry their origin.
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::IndexedStrings | Self::IndexedChars)
    }
}

/// Sampling policy plus oversampling factor.
#[derive(Clone, Copy, Debug)]
pub struct SampleParams {
    /// The policy.
    pub policy: SamplePolicy,
    /// Oversampling factor `k`: every rank draws `k * p` samples.
    pub factor: u64,
}

impl Default for SampleParams {
    fn default() -> Self {
        Self {
            policy: SamplePolicy::Strings,
            factor: 2,
        }
    }
}

/// Local splitter sample: packed zero-terminated bytes plus the origins for
/// indexed policies.
struct LocalSample {
    bytes: Vec<u8>,
    origins: Option<Vec<StringOrigin>>,
}

/// Draw the local sample. Sampled strings are clamped to `max_len` bytes to
/// bound traffic; positions are deterministic in the local sorted order.
fn sample_splitters<C: Communicator>(
    cont: &StringContainer,
    max_len: usize,
    num_partitions: usize,
    params: &SampleParams,
    comm: &C,
) -> LocalSample {
    let num_samples = (params.factor as usize * num_partitions).min(cont.len());
    let mut bytes = Vec::new();
    let mut origins = params.policy.is_indexed().then(Vec::new);

    let mut push = |cont: &StringContainer, index: usize| {
        let string = cont.get(index);
        bytes.extend_from_slice(&string[..string.len().min(max_len)]);
        bytes.push(0);
        if let Some(ref mut origins) = origins {
            origins.push(StringOrigin {
                rank: comm.rank() as u64,
                index: index as u64,
            });
        }
    };

    match params.policy {
        SamplePolicy::Strings | SamplePolicy::IndexedStrings => {
            // evenly spaced over the strings
            let stride = cont.len() as f64 / (num_samples + 1) as f64;
            for i in 1..=num_samples {
                push(cont, (i as f64 * stride) as usize);
            }
        }
        SamplePolicy::Chars | SamplePolicy::IndexedChars => {
            // evenly spaced over the characters
            let total_chars = cont.sum_len();
            let stride = total_chars as f64 / (num_samples + 1) as f64;
            let mut accumulated = 0;
            let mut next = stride;
            let mut taken = 0;
            for index in 0..cont.len() {
                if taken == num_samples || stride <= 0.0 {
                    break;
                }
                accumulated += cont.get(index).len();
                if accumulated as f64 >= next {
                    push(cont, index);
                    next += stride;
                    taken += 1;
                }
            }
        }
    }

    LocalSample { bytes, origins }
}

/// Sort the sample globally: gather every rank's sample everywhere and sort
/// with the shared comparator. All ranks end with the identical sequence.
fn sort_sample_global<C: Communicator>(sample: LocalSample, comm: &C) -> StringContainer {
    let bytes = allgatherv(&sample.bytes, comm);
    let mut cont = StringContainer::from_bytes(bytes);

    if let Some(origins) = sample.origins {
        let flat: Vec<u64> = origins.iter().flat_map(|o| [o.rank, o.index]).collect();
        let flat = allgatherv(&flat, comm);
        let origins = flat
            .chunks_exact(2)
            .map(|pair| StringOrigin {
                rank: pair[0],
                index: pair[1],
            })
            .collect();
        // gathered bytes and origins arrive in the same rank order
        cont.set_origins(origins).expect("sample origins match");
    }

    sort_container(&mut cont);
    cont
}

/// The `p - 1` splitters at positions `(i * |sample|) / p`.
fn choose_splitters(sample: &StringContainer, num_partitions: usize) -> Vec<usize> {
    (1..num_partitions)
        .map(|i| (i * sample.len()) / num_partitions)
        .collect()
}

// The splitter is a truncated sample, the container string is compared in
// full: a string extending the splitter orders after it, which keeps the
// partition predicate monotone over the sorted container.
fn compare_to_splitter(
    cont: &StringContainer,
    index: usize,
    splitter: &[u8],
    splitter_origin: Option<StringOrigin>,
) -> Ordering {
    match cont.get(index).cmp(splitter) {
        Ordering::Equal => match (cont.origins(), splitter_origin) {
            (Some(origins), Some(splitter_origin)) => origins[index].cmp(&splitter_origin),
            _ => Ordering::Equal,
        },
        order => order,
    }
}

/// Interval sizes for the locally sorted container: `intervals[j]` strings
/// fall between splitters `j - 1` and `j`. The sizes sum to the local count.
fn compute_intervals(
    cont: &StringContainer,
    sample: &StringContainer,
    splitters: &[usize],
) -> Vec<usize> {
    let mut boundaries = Vec::with_capacity(splitters.len() + 1);
    for &pos in splitters {
        let splitter = sample.get(pos);
        let origin = sample.origins().map(|o| o[pos]);
        let boundary = partition_point(cont.len(), |i| {
            compare_to_splitter(cont, i, splitter, origin) == Ordering::Less
        });
        boundaries.push(boundary);
    }
    boundaries.push(cont.len());

    let mut intervals = Vec::with_capacity(boundaries.len());
    let mut previous = 0;
    for boundary in boundaries {
        let boundary = boundary.max(previous);
        intervals.push(boundary - previous);
        previous = boundary;
    }
    intervals
}

fn partition_point(len: usize, mut pred: impl FnMut(usize) -> bool) -> usize {
    let mut low = 0;
    let mut high = len;
    while low < high {
        let mid = low + (high - low) / 2;
        if pred(mid) {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

/// Compute the send-interval sizes of a `num_partitions`-way exchange for a
/// locally sorted container. Every rank computes identical splitters; ranks
/// with no local strings contribute zero-sized intervals.
pub fn compute_partition<C: Communicator>(
    cont: &StringContainer,
    global_lcp_avg: u64,
    num_partitions: usize,
    params: &SampleParams,
    comm: &C,
) -> Vec<usize> {
    let max_len = 2 * global_lcp_avg as usize + 1;
    let sample = sample_splitters(cont, max_len, num_partitions, params, comm);
    let sample = sort_sample_global(sample, comm);

    if sample.is_empty() {
        let mut intervals = vec![0; num_partitions];
        intervals[0] = cont.len();
        return intervals;
    }

    let splitters = choose_splitters(&sample, num_partitions);
    compute_intervals(cont, &sample, &splitters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::sort_container;

    fn sorted(mut cont: StringContainer) -> StringContainer {
        sort_container(&mut cont);
        cont
    }

    #[test]
    fn splitter_positions_follow_the_formula() {
        let sample = StringContainer::from_bytes(b"a\0b\0c\0d\0e\0f\0g\0h\0".to_vec());
        assert_eq!(choose_splitters(&sample, 4), vec![2, 4, 6]);
        assert_eq!(choose_splitters(&sample, 3), vec![2, 5]);
    }

    #[test]
    fn intervals_sum_to_local_size() {
        let cont = sorted(StringContainer::from_bytes(
            b"ant\0bee\0cow\0dog\0eel\0fox\0".to_vec(),
        ));
        let sample = sorted(StringContainer::from_bytes(b"bat\0cat\0dot\0".to_vec()));
        let intervals = compute_intervals(&cont, &sample, &[0, 1, 2]);
        assert_eq!(intervals.iter().sum::<usize>(), cont.len());
        // ant | bee | cow dog | eel fox
        assert_eq!(intervals, vec![1, 1, 2, 2]);
    }

    #[test]
    fn empty_container_yields_zero_intervals() {
        let cont = StringContainer::new();
        let sample = sorted(StringContainer::from_bytes(b"m\0".to_vec()));
        let intervals = compute_intervals(&cont, &sample, &[0]);
        assert_eq!(intervals, vec![0, 0]);
    }

    #[test]
    fn indexed_splitters_split_equal_runs() {
        let mut cont = StringContainer::from_bytes(b"dup\0dup\0dup\0dup\0".to_vec());
        cont.set_origins(vec![
            StringOrigin { rank: 0, index: 0 },
            StringOrigin { rank: 0, index: 1 },
            StringOrigin { rank: 1, index: 0 },
            StringOrigin { rank: 1, index: 1 },
        ])
        .unwrap();

        let mut sample = StringContainer::from_bytes(b"dup\0".to_vec());
        sample
            .set_origins(vec![StringOrigin { rank: 1, index: 0 }])
            .unwrap();

        // equal strings are divided by origin at the splitter
        let intervals = compute_intervals(&cont, &sample, &[0]);
        assert_eq!(intervals, vec![2, 2]);
    }
}
