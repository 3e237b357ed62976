//! Output permutations.
//!
//! A permutation is stored as two parallel vectors of ranks and local
//! indices; applying it to the original input yields the sorted sequence.
//! Multi-level sorts record one `(rank, index)` pair per exchange level and
//! resolve them level by level into plain world pairs.

use mpi::traits::Communicator;
use mpi::Count;

use crate::exchange::collectives::alltoallv;
use crate::strings::StringOrigin;

/// A sequence of `(rank, local index)` pairs, kept as two parallel vectors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputPermutation {
    ranks: Vec<u64>,
    strings: Vec<u64>,
}

impl InputPermutation {
    /// An empty permutation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `count` pairs.
    pub fn reserve(&mut self, count: usize) {
        self.ranks.reserve(count);
        self.strings.reserve(count);
    }

    /// Build from per-string origins.
    pub fn from_origins(origins: &[StringOrigin]) -> Self {
        Self {
            ranks: origins.iter().map(|o| o.rank).collect(),
            strings: origins.iter().map(|o| o.index).collect(),
        }
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Whether the permutation holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// The rank of pair `n`.
    pub fn rank(&self, n: usize) -> u64 {
        self.ranks[n]
    }

    /// The local index of pair `n`.
    pub fn string(&self, n: usize) -> u64 {
        self.strings[n]
    }

    /// All ranks.
    pub fn ranks(&self) -> &[u64] {
        &self.ranks
    }

    /// All local indices.
    pub fn strings(&self) -> &[u64] {
        &self.strings
    }

    /// Append a pair.
    pub fn push(&mut self, rank: u64, string: u64) {
        self.ranks.push(rank);
        self.strings.push(string);
    }

    /// Concatenate another permutation.
    pub fn append(&mut self, other: &InputPermutation) {
        self.ranks.extend_from_slice(&other.ranks);
        self.strings.extend_from_slice(&other.strings);
    }

    /// Iterate over `(rank, index)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranks.iter().copied().zip(self.strings.iter().copied())
    }
}

/// Group the positions `0..n` by destination rank, stably. Returns the
/// per-destination counts and the grouped position list.
pub(crate) fn group_by_rank(dests: &[u64], num_ranks: usize) -> (Vec<Count>, Vec<usize>) {
    let mut counts = vec![0 as Count; num_ranks];
    for &dest in dests {
        counts[dest as usize] += 1;
    }
    let mut offsets: Vec<usize> = {
        let mut acc = 0;
        counts
            .iter()
            .map(|&c| {
                let tmp = acc;
                acc += c as usize;
                tmp
            })
            .collect()
    };
    let mut grouped = vec![0; dests.len()];
    for (pos, &dest) in dests.iter().enumerate() {
        grouped[offsets[dest as usize]] = pos;
        offsets[dest as usize] += 1;
    }
    (counts, grouped)
}

/// One lookup round: every pair `(r, i)` of `requests` is answered by rank
/// `r` with its local `table` entry `i`. Answers keep the request order.
pub fn fetch_pairs<C: Communicator>(
    requests: &InputPermutation,
    table: &InputPermutation,
    comm: &C,
) -> InputPermutation {
    let size = comm.size() as usize;
    let (counts, grouped) = group_by_rank(requests.ranks(), size);

    let send_idxs: Vec<u64> = grouped.iter().map(|&pos| requests.string(pos)).collect();
    let (recv_idxs, recv_counts) = alltoallv(&send_idxs, &counts, comm);

    let replies: Vec<u64> = recv_idxs
        .iter()
        .flat_map(|&idx| [table.rank(idx as usize), table.string(idx as usize)])
        .collect();
    let reply_counts: Vec<Count> = recv_counts.iter().map(|&c| 2 * c).collect();
    let (recv_replies, _) = alltoallv(&replies, &reply_counts, comm);

    // un-permute the grouped answers back into request order
    let mut ranks = vec![0; requests.len()];
    let mut strings = vec![0; requests.len()];
    for (slot, pair) in grouped.iter().zip(recv_replies.chunks_exact(2)) {
        ranks[*slot] = pair[0];
        strings[*slot] = pair[1];
    }
    InputPermutation { ranks, strings }
}

/// Resolve a chain of per-level permutations into plain world pairs. The
/// innermost level comes last; level `0` maps into the original local
/// order. All ranks are world ranks.
pub fn resolve_levels<C: Communicator>(levels: &[InputPermutation], comm: &C) -> InputPermutation {
    let mut resolved = levels.last().cloned().unwrap_or_default();
    for table in levels[..levels.len().saturating_sub(1)].iter().rev() {
        resolved = fetch_pairs(&resolved, table, comm);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_concatenates() {
        let mut perm = InputPermutation::new();
        perm.push(0, 1);
        let mut other = InputPermutation::new();
        other.push(1, 0);
        other.push(1, 1);
        perm.append(&other);
        assert_eq!(perm.len(), 3);
        assert_eq!(perm.iter().collect::<Vec<_>>(), vec![(0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn grouping_is_stable() {
        let dests = [2u64, 0, 2, 1, 0];
        let (counts, grouped) = group_by_rank(&dests, 3);
        assert_eq!(counts, vec![2, 1, 2]);
        assert_eq!(grouped, vec![1, 4, 3, 0, 2]);
    }

    #[test]
    fn origins_round_trip() {
        let origins = vec![
            StringOrigin { rank: 1, index: 4 },
            StringOrigin { rank: 0, index: 2 },
        ];
        let perm = InputPermutation::from_origins(&origins);
        assert_eq!(perm.rank(0), 1);
        assert_eq!(perm.string(1), 2);
    }
}
