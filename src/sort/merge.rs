//! Multiway merge of sorted string runs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::strings::{StringContainer, StringOrigin};

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Head<'a> {
    key: &'a [u8],
    origin: StringOrigin,
    run: usize,
    pos: usize,
}

/// Merge `runs.len()` consecutive sorted runs of the container (given by
/// their sizes, summing to the container length) into one sorted order.
/// Ties between equal strings fall back to origin, then to run index, so
/// the merge is deterministic. Returns the merged index order.
pub fn multiway_merge(cont: &StringContainer, runs: &[usize]) -> Vec<usize> {
    let default_origin = StringOrigin::default();
    let origin_of = |i: usize| cont.origins().map_or(default_origin, |o| o[i]);

    let mut starts = Vec::with_capacity(runs.len());
    let mut offset = 0;
    for &run in runs {
        starts.push(offset);
        offset += run;
    }
    debug_assert_eq!(offset, cont.len());

    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (run, (&start, &len)) in starts.iter().zip(runs).enumerate() {
        if len > 0 {
            heap.push(Reverse(Head {
                key: cont.get(start),
                origin: origin_of(start),
                run,
                pos: 0,
            }));
        }
    }

    let mut order = Vec::with_capacity(cont.len());
    while let Some(Reverse(head)) = heap.pop() {
        let idx = starts[head.run] + head.pos;
        order.push(idx);
        let next = head.pos + 1;
        if next < runs[head.run] {
            let idx = starts[head.run] + next;
            heap.push(Reverse(Head {
                key: cont.get(idx),
                origin: origin_of(idx),
                run: head.run,
                pos: next,
            }));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::multikey::fill_lcps;
    use crate::strings::StringContainer;

    #[test]
    fn merges_sorted_runs() {
        // two runs: [ant, bee, fly] and [ape, cow]
        let mut cont =
            StringContainer::from_bytes(b"ant\0bee\0fly\0ape\0cow\0".to_vec());
        let order = multiway_merge(&cont, &[3, 2]);
        cont.reorder(&order);
        fill_lcps(&mut cont);
        assert_eq!(cont.get(0), b"ant");
        assert_eq!(cont.get(1), b"ape");
        assert_eq!(cont.get(2), b"bee");
        assert_eq!(cont.get(3), b"cow");
        assert_eq!(cont.get(4), b"fly");
        assert_eq!(cont.lcps(), &[0, 1, 0, 0, 0]);
    }

    #[test]
    fn empty_runs_are_skipped() {
        let cont = StringContainer::from_bytes(b"b\0a\0".to_vec());
        let order = multiway_merge(&cont, &[0, 1, 0, 1, 0]);
        assert_eq!(order, vec![1, 0]);
    }
}
