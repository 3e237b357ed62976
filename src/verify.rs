//! Output verification.
//!
//! The checkers re-derive the sorted sequence from the original input and
//! the sorter's output and validate sortedness and completeness across all
//! ranks. They are collective: every rank must call them and receives the
//! combined verdict.

use mpi::collective::SystemOperation;
use mpi::request::WaitGuard;
use mpi::traits::{Communicator, CommunicatorCollectives, Destination, Source};
use mpi::Count;

use crate::exchange::collectives::{allgatherv, alltoallv};
use crate::grid::rank_shifted_cyclic;
use crate::permutation::{group_by_rank, InputPermutation};
use crate::strings::StringContainer;

/// Combine a local verdict into the global one.
fn all_agree<C: Communicator>(local_ok: bool, comm: &C) -> bool {
    let local = local_ok as u64;
    let mut global = 0u64;
    comm.all_reduce_into(&local, &mut global, SystemOperation::min());
    global != 0
}

/// Cyclically rotate a byte payload one rank to the right. A rank with
/// `skip_rank` set passes its predecessor's payload through unchanged; the
/// root must not skip.
pub fn rotate_strings_right<C: Communicator>(
    source: &[u8],
    skip_rank: bool,
    comm: &C,
) -> Vec<u8> {
    assert!(!(skip_rank && comm.rank() == 0));

    let pred = rank_shifted_cyclic(comm, -1);
    let succ = rank_shifted_cyclic(comm, 1);
    if comm.size() == 1 {
        return source.to_vec();
    }

    let mut recv_count = 0u64;
    if skip_rank {
        comm.process_at_rank(pred).receive_into(&mut recv_count);
        comm.process_at_rank(succ).send(&recv_count);
    } else {
        let send_count = source.len() as u64;
        mpi::request::scope(|scope| {
            let _sreq = WaitGuard::from(
                comm.process_at_rank(succ).immediate_send(scope, &send_count),
            );
            comm.process_at_rank(pred).receive_into(&mut recv_count);
        });
    }

    let mut received = vec![0u8; recv_count as usize];
    if skip_rank {
        if !received.is_empty() {
            comm.process_at_rank(pred).receive_into(&mut received[..]);
        }
        if recv_count > 0 {
            comm.process_at_rank(succ).send(&received[..]);
        }
    } else {
        mpi::request::scope(|scope| {
            let _sreq = if !source.is_empty() {
                Some(WaitGuard::from(
                    comm.process_at_rank(succ).immediate_send(scope, source),
                ))
            } else {
                None
            };
            if !received.is_empty() {
                comm.process_at_rank(pred).receive_into(&mut received[..]);
            }
        });
    }
    received
}

/// Whether the container is locally sorted and every rank boundary is
/// ordered: the last string of each rank precedes the first of the next.
pub fn is_sorted_container<C: Communicator>(cont: &StringContainer, comm: &C) -> bool {
    let locally_sorted = (1..cont.len()).all(|i| cont.get(i - 1) <= cont.get(i));

    let last = if cont.is_empty() {
        Vec::new()
    } else {
        cont.get(cont.len() - 1).to_vec()
    };
    let skip = cont.is_empty() && comm.rank() != 0;
    let previous = rotate_strings_right(&last, skip, comm);

    let boundary_ok =
        comm.rank() == 0 || cont.is_empty() || previous.as_slice() <= cont.get(0);
    all_agree(locally_sorted && boundary_ok, comm)
}

/// Fetch the original strings named by the permutation, in permutation
/// order. Every requested `(rank, index)` pair is answered by its origin
/// from `input`.
pub fn fetch_strings<C: Communicator>(
    permutation: &InputPermutation,
    input: &StringContainer,
    comm: &C,
) -> StringContainer {
    let size = comm.size() as usize;
    let (counts, grouped) = group_by_rank(permutation.ranks(), size);

    let send_idxs: Vec<u64> = grouped
        .iter()
        .map(|&pos| permutation.string(pos))
        .collect();
    let (recv_idxs, recv_counts) = alltoallv(&send_idxs, &counts, comm);

    // answer with zero-terminated bytes, in request order
    let mut reply = Vec::new();
    let mut reply_counts = Vec::with_capacity(size);
    let mut cursor = 0;
    for &count in &recv_counts {
        let before = reply.len();
        for &idx in &recv_idxs[cursor..cursor + count as usize] {
            reply.extend_from_slice(input.get(idx as usize));
            reply.push(0);
        }
        reply_counts.push((reply.len() - before) as Count);
        cursor += count as usize;
    }
    let (recv_reply, _) = alltoallv(&reply, &reply_counts, comm);

    // un-permute the grouped answers back into permutation order
    let mut fetched = StringContainer::from_bytes(recv_reply);
    let mut order = vec![0; grouped.len()];
    for (k, &slot) in grouped.iter().enumerate() {
        order[slot] = k;
    }
    fetched.reorder(&order);
    fetched.make_contiguous();
    fetched
}

/// Whether applying the permutation to the original input yields a globally
/// sorted sequence.
pub fn is_sorted_permutation<C: Communicator>(
    permutation: &InputPermutation,
    input: &StringContainer,
    comm: &C,
) -> bool {
    let fetched = fetch_strings(permutation, input, comm);
    is_sorted_container(&fetched, comm)
}

/// Whether the permutation's requested pairs cover every input pair of
/// every rank: exactly once in unique mode, at least once otherwise.
pub fn is_complete_permutation<C: Communicator>(
    permutation: &InputPermutation,
    local_size: usize,
    unique: bool,
    comm: &C,
) -> bool {
    let size = comm.size() as usize;
    let (counts, grouped) = group_by_rank(permutation.ranks(), size);
    let send_idxs: Vec<u64> = grouped
        .iter()
        .map(|&pos| permutation.string(pos))
        .collect();
    let (recv_idxs, _) = alltoallv(&send_idxs, &counts, comm);

    let mut seen = vec![0u64; local_size];
    let mut in_range = true;
    for &idx in &recv_idxs {
        if (idx as usize) < local_size {
            seen[idx as usize] += 1;
        } else {
            in_range = false;
        }
    }
    let covered = if unique {
        seen.iter().all(|&count| count == 1)
    } else {
        seen.iter().all(|&count| count >= 1)
    };
    all_agree(in_range && covered, comm)
}

/// Whether the space-efficient output ranks order the input correctly:
/// strings redistributed by rank value must arrive byte-sorted, and in
/// non-unique mode equal values must carry equal strings.
pub fn is_sorted_global_ranks<C: Communicator>(
    global_ranks: &[u64],
    input: &StringContainer,
    unique: bool,
    comm: &C,
) -> bool {
    debug_assert_eq!(global_ranks.len(), input.len());
    let size = comm.size() as usize;

    let local_upper = global_ranks.iter().max().map_or(0, |&m| m + 1);
    let mut upper = 0u64;
    comm.all_reduce_into(&local_upper, &mut upper, SystemOperation::max());
    let interval = upper.div_ceil(comm.size() as u64).max(1);

    let dests: Vec<u64> = global_ranks.iter().map(|&v| v / interval).collect();
    let (counts, grouped) = group_by_rank(&dests, size);

    let send_values: Vec<u64> = grouped.iter().map(|&p| global_ranks[p]).collect();
    let (recv_values, _) = alltoallv(&send_values, &counts, comm);

    let mut send_bytes = Vec::new();
    let mut byte_counts = Vec::with_capacity(size);
    let mut cursor = 0;
    for &count in &counts {
        let before = send_bytes.len();
        for &p in &grouped[cursor..cursor + count as usize] {
            send_bytes.extend_from_slice(input.get(p));
            send_bytes.push(0);
        }
        byte_counts.push((send_bytes.len() - before) as Count);
        cursor += count as usize;
    }
    let (recv_bytes, _) = alltoallv(&send_bytes, &byte_counts, comm);
    let received = StringContainer::from_bytes(recv_bytes);

    // order the received strings by (value, bytes)
    let mut order: Vec<usize> = (0..received.len()).collect();
    order.sort_by(|&a, &b| {
        recv_values[a]
            .cmp(&recv_values[b])
            .then_with(|| received.get(a).cmp(received.get(b)))
    });

    let mut ok = true;
    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        ok &= received.get(a) <= received.get(b);
        if recv_values[a] == recv_values[b] {
            // ranks may only tie on equal strings, and never in unique mode
            ok &= !unique && received.get(a) == received.get(b);
        }
    }

    // boundary between value intervals
    let mut ordered = StringContainer::from_bytes(Vec::new());
    if !order.is_empty() {
        let mut bytes = Vec::new();
        for &i in &order {
            bytes.extend_from_slice(received.get(i));
            bytes.push(0);
        }
        ordered = StringContainer::from_bytes(bytes);
    }
    ok & is_sorted_container(&ordered, comm)
}

/// Whether the output ranks are complete: in unique mode they form a
/// permutation of `0..N`, otherwise they at least stay within `0..N`.
pub fn is_complete_global_ranks<C: Communicator>(
    global_ranks: &[u64],
    local_size: usize,
    unique: bool,
    comm: &C,
) -> bool {
    debug_assert_eq!(global_ranks.len(), local_size);
    let local = local_size as u64;
    let mut total = 0u64;
    comm.all_reduce_into(&local, &mut total, SystemOperation::sum());

    let in_range = global_ranks.iter().all(|&v| v < total);
    if !unique {
        return all_agree(in_range, comm);
    }

    let mut dist = distribute(global_ranks, comm);
    dist.sort_unstable();
    let no_duplicates = dist.windows(2).all(|w| w[0] != w[1]);
    all_agree(in_range && no_duplicates, comm)
}

fn distribute<C: Communicator>(values: &[u64], comm: &C) -> Vec<u64> {
    let local_upper = values.iter().max().map_or(0, |&m| m + 1);
    let mut upper = 0u64;
    comm.all_reduce_into(&local_upper, &mut upper, SystemOperation::max());
    let interval = upper.div_ceil(comm.size() as u64).max(1);
    let dests: Vec<u64> = values.iter().map(|&v| v / interval).collect();
    let (counts, grouped) = group_by_rank(&dests, comm.size() as usize);
    let send: Vec<u64> = grouped.iter().map(|&p| values[p]).collect();
    alltoallv(&send, &counts, comm).0
}

/// Whether the sorted container conserves the input's global string and
/// character counts and is globally sorted.
pub fn is_complete_and_sorted<C: Communicator>(
    sorted: &StringContainer,
    input_chars: usize,
    input_strings: usize,
    comm: &C,
) -> bool {
    let local = [
        input_chars as u64,
        input_strings as u64,
        sorted.sum_len() as u64,
        sorted.len() as u64,
    ];
    let mut global = [0u64; 4];
    comm.all_reduce_into(&local[..], &mut global[..], SystemOperation::sum());

    let conserved = global[0] == global[2] && global[1] == global[3];
    conserved & is_sorted_container(sorted, comm)
}

/// Exhaustive check: the output multiset of strings equals the input's.
/// Gathers both multisets everywhere; intended for debugging runs.
pub fn exhaustive_check<C: Communicator>(
    input_bytes: &[u8],
    output: &StringContainer,
    comm: &C,
) -> bool {
    let all_input = allgatherv(input_bytes, comm);
    let mut output_bytes = Vec::with_capacity(output.char_size());
    for i in 0..output.len() {
        output_bytes.extend_from_slice(output.get(i));
        output_bytes.push(0);
    }
    let all_output = allgatherv(&output_bytes[..], comm);

    let mut input_strings: Vec<&[u8]> = all_input.split(|&b| b == 0).collect();
    let mut output_strings: Vec<&[u8]> = all_output.split(|&b| b == 0).collect();
    input_strings.sort_unstable();
    output_strings.sort_unstable();
    input_strings == output_strings
}
