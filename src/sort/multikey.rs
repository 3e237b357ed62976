//! Multikey quicksort for the leaf-level string sort.
//!
//! Bentley-Sedgewick three-way byte quicksort over index vectors, with an
//! insertion-sort base case. Sorting is by byte-lexicographic order; for
//! indexed containers runs of equal strings are ordered by origin.

use crate::strings::{lcp_len, StringContainer};

const INSERTION_THRESHOLD: usize = 24;

#[inline]
fn char_at(s: &[u8], depth: usize) -> i32 {
    if depth < s.len() {
        s[depth] as i32
    } else {
        -1
    }
}

fn insertion_sort(strings: &[&[u8]], idxs: &mut [usize], depth: usize) {
    for i in 1..idxs.len() {
        let mut j = i;
        while j > 0 && strings[idxs[j - 1]][depth.min(strings[idxs[j - 1]].len())..]
            > strings[idxs[j]][depth.min(strings[idxs[j]].len())..]
        {
            idxs.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn multikey_qsort(strings: &[&[u8]], idxs: &mut [usize], depth: usize) {
    if idxs.len() <= INSERTION_THRESHOLD {
        insertion_sort(strings, idxs, depth);
        return;
    }

    // median-of-three pivot on the byte at the current depth
    let a = char_at(strings[idxs[0]], depth);
    let b = char_at(strings[idxs[idxs.len() / 2]], depth);
    let c = char_at(strings[idxs[idxs.len() - 1]], depth);
    let pivot = {
        let (lo, hi) = if a < c { (a, c) } else { (c, a) };
        b.clamp(lo, hi)
    };

    // three-way partition by the pivot byte
    let mut lt = 0;
    let mut gt = idxs.len();
    let mut i = 0;
    while i < gt {
        let ch = char_at(strings[idxs[i]], depth);
        if ch < pivot {
            idxs.swap(lt, i);
            lt += 1;
            i += 1;
        } else if ch > pivot {
            gt -= 1;
            idxs.swap(i, gt);
        } else {
            i += 1;
        }
    }

    let (less, rest) = idxs.split_at_mut(lt);
    let (equal, greater) = rest.split_at_mut(gt - lt);
    multikey_qsort(strings, less, depth);
    if pivot >= 0 {
        multikey_qsort(strings, equal, depth + 1);
    }
    multikey_qsort(strings, greater, depth);
}

/// Sort the container's strings in place and fill its LCP array. Origins,
/// when present, ride along and break ties between equal strings. Returns
/// the applied order: position `k` of the sorted container held index
/// `order[k]` before the sort.
pub fn sort_container(cont: &mut StringContainer) -> Vec<usize> {
    let strings: Vec<&[u8]> = (0..cont.len()).map(|i| cont.get(i)).collect();
    let mut order: Vec<usize> = (0..cont.len()).collect();
    multikey_qsort(&strings, &mut order, 0);

    if let Some(origins) = cont.origins() {
        // order runs of equal strings by origin so ties are deterministic
        let mut start = 0;
        while start < order.len() {
            let mut end = start + 1;
            while end < order.len() && strings[order[end]] == strings[order[start]] {
                end += 1;
            }
            order[start..end].sort_unstable_by_key(|&i| origins[i]);
            start = end;
        }
    }

    cont.reorder(&order);
    fill_lcps(cont);
    order
}

/// Recompute the LCP array of an already sorted container.
pub fn fill_lcps(cont: &mut StringContainer) {
    for i in 0..cont.len() {
        let lcp = if i == 0 {
            0
        } else {
            lcp_len(cont.get(i - 1), cont.get(i)) as u64
        };
        cont.lcps_mut()[i] = lcp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::{StringContainer, StringOrigin};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn sorts_and_fills_lcps() {
        let mut cont = StringContainer::from_bytes(b"banana\0bandana\0apple\0band\0".to_vec());
        sort_container(&mut cont);
        assert_eq!(cont.get(0), b"apple");
        assert_eq!(cont.get(1), b"banana");
        assert_eq!(cont.get(2), b"band");
        assert_eq!(cont.get(3), b"bandana");
        assert_eq!(cont.lcps(), &[0, 0, 3, 4]);
    }

    #[test]
    fn matches_comparison_sort_on_random_input() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut bytes = Vec::new();
        for _ in 0..500 {
            let len = rng.gen_range(0..12);
            for _ in 0..len {
                bytes.push(rng.gen_range(b'a'..=b'c'));
            }
            bytes.push(0);
        }
        let mut cont = StringContainer::from_bytes(bytes);
        let mut expected: Vec<Vec<u8>> = (0..cont.len()).map(|i| cont.get(i).to_vec()).collect();
        expected.sort();

        sort_container(&mut cont);
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(cont.get(i), &want[..]);
        }
    }

    #[test]
    fn equal_strings_tie_break_by_origin() {
        let mut cont = StringContainer::from_bytes(b"dup\0dup\0dup\0".to_vec());
        cont.set_origins(vec![
            StringOrigin { rank: 2, index: 0 },
            StringOrigin { rank: 0, index: 1 },
            StringOrigin { rank: 1, index: 5 },
        ])
        .unwrap();
        sort_container(&mut cont);
        let origins = cont.origins().unwrap();
        assert_eq!(origins[0], StringOrigin { rank: 0, index: 1 });
        assert_eq!(origins[1], StringOrigin { rank: 1, index: 5 });
        assert_eq!(origins[2], StringOrigin { rank: 2, index: 0 });
    }
}
