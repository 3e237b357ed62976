//! Input generation.
//!
//! Free constructors returning plain [`StringContainer`]s. Generators that
//! partition a shared input across ranks run the identical seeded random
//! stream on every rank and keep only their own strings, so the global
//! input is independent of the rank count.

use std::fs;
use std::path::Path;

use mpi::traits::{Communicator, Root};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::strings::StringContainer;

const MIN_CHAR: u8 = 65;
const MAX_CHAR: u8 = 90;
const ALPHABET: u64 = (MAX_CHAR - MIN_CHAR + 1) as u64;

/// A seed shared by all ranks: drawn on the root and broadcast.
pub fn shared_seed<C: Communicator>(seed: Option<u64>, comm: &C) -> u64 {
    let mut value = seed.unwrap_or_else(|| {
        if comm.rank() == 0 {
            rand::thread_rng().gen()
        } else {
            0
        }
    });
    comm.process_at_rank(0).broadcast_into(&mut value);
    value
}

/// Uniform random strings of length `min_len..=max_len`, `num` per rank.
pub fn random_strings(num: usize, min_len: usize, max_len: usize, seed: u64) -> StringContainer {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = Vec::with_capacity(num * (max_len + 1));
    for _ in 0..num {
        let len = rng.gen_range(min_len..=max_len);
        for _ in 0..len {
            bytes.push(rng.gen_range(MIN_CHAR..=MAX_CHAR));
        }
        bytes.push(0);
    }
    StringContainer::from_bytes(bytes)
}

/// A shared random text of `num_chars` characters; identical on every rank
/// that uses the same seed.
pub fn random_text(num_chars: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num_chars)
        .map(|_| rng.gen_range(MIN_CHAR..=MAX_CHAR))
        .collect()
}

/// `num_strings` strings of (at least) `len` characters globally, sharing
/// prefixes so that a `dn_ratio` share of each string is significant: the
/// string number is written base-26 at the end of the significant block,
/// the rest is one fixed random filler character. Each string is kept by
/// exactly one uniformly chosen rank; the local set is shuffled.
pub fn dn_ratio_strings<C: Communicator>(
    num_strings: usize,
    len: usize,
    dn_ratio: f64,
    seed: u64,
    comm: &C,
) -> StringContainer {
    let size = comm.size() as u64;
    let rank = comm.rank() as u64;

    let digits = ((num_strings as f64).ln() / (ALPHABET as f64).ln()).ceil() as usize;
    let significant = ((len as f64 * dn_ratio) as usize).max(digits).max(1);
    let len = len.max(significant);

    let mut rng = StdRng::seed_from_u64(seed);
    let filler = MIN_CHAR + (rng.gen::<u64>() % ALPHABET) as u8;

    let mut bytes = Vec::new();
    for i in 0..num_strings {
        let owner = rng.gen_range(0..size);
        if owner != rank {
            continue;
        }
        let start = bytes.len();
        bytes.resize(start + significant, MIN_CHAR);
        let mut number = i;
        for j in 0..significant {
            if number == 0 {
                break;
            }
            bytes[start + significant - 1 - j] = MIN_CHAR + (number as u64 % ALPHABET) as u8;
            number /= ALPHABET as usize;
        }
        bytes.resize(start + len, filler);
        bytes.push(0);
    }

    let mut cont = StringContainer::from_bytes(bytes);
    shuffle(&mut cont, seed ^ (rank + 1));
    cont
}

/// Suffixes of a shared text at stride `step`, scattered uniformly over
/// the ranks by the shared seed.
pub fn suffix_strings<C: Communicator>(
    text: &[u8],
    step: usize,
    seed: u64,
    comm: &C,
) -> StringContainer {
    let size = comm.size() as u64;
    let rank = comm.rank() as u64;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut bytes = Vec::new();
    for start in (0..text.len()).step_by(step.max(1)) {
        let owner = rng.gen_range(0..size);
        if owner == rank {
            bytes.extend_from_slice(&text[start..]);
            bytes.push(0);
        }
    }
    StringContainer::from_bytes(bytes)
}

/// Sliding windows of `len` characters at stride `step`, distributed in
/// contiguous blocks.
pub fn window_strings<C: Communicator>(
    text: &[u8],
    len: usize,
    step: usize,
    comm: &C,
) -> StringContainer {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;

    let starts: Vec<usize> = (0..text.len()).step_by(step.max(1)).collect();
    let chunk = starts.len().div_ceil(size);
    let mine = starts.iter().skip(rank * chunk).take(chunk);

    let mut bytes = Vec::new();
    for &start in mine {
        let end = (start + len).min(text.len());
        bytes.extend_from_slice(&text[start..end]);
        bytes.push(0);
    }
    StringContainer::from_bytes(bytes)
}

/// The canonical difference covers used for sampled suffix sorting.
fn difference_cover(dc: usize) -> &'static [usize] {
    match dc {
        3 => &[1, 2],
        7 => &[0, 1, 3],
        13 => &[0, 1, 3, 9],
        21 => &[0, 1, 6, 8, 18],
        31 => &[0, 1, 3, 8, 12, 18],
        32 => &[0, 1, 2, 3, 4, 8, 12, 16, 20, 24, 28],
        _ => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 16, 24, 32, 40, 48, 56],
    }
}

/// Suffixes at the positions of a difference cover modulo `dc`,
/// distributed in contiguous blocks.
pub fn difference_cover_strings<C: Communicator>(
    text: &[u8],
    dc: usize,
    comm: &C,
) -> StringContainer {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let cover = difference_cover(dc);

    let starts: Vec<usize> = (0..text.len())
        .filter(|&i| cover.contains(&(i % dc.max(1))))
        .collect();
    let chunk = starts.len().div_ceil(size);
    let mine = starts.iter().skip(rank * chunk).take(chunk);

    let mut bytes = Vec::new();
    for &start in mine {
        bytes.extend_from_slice(&text[start..]);
        bytes.push(0);
    }
    StringContainer::from_bytes(bytes)
}

/// Newline-separated strings from a file, distributed in contiguous
/// blocks.
pub fn file_strings<C: Communicator>(path: &Path, comm: &C) -> Result<StringContainer> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;

    let content =
        fs::read(path).map_err(|err| Error::ConfigInvalid(format!("{}: {err}", path.display())))?;
    let lines: Vec<&[u8]> = content
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .collect();
    let chunk = lines.len().div_ceil(size);
    let mine = lines.iter().skip(rank * chunk).take(chunk);

    let mut bytes = Vec::new();
    for line in mine {
        bytes.extend_from_slice(line);
        bytes.push(0);
    }
    Ok(StringContainer::from_bytes(bytes))
}

/// Shuffle a container's strings with a seeded generator.
pub fn shuffle(cont: &mut StringContainer, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..cont.len()).collect();
    order.shuffle(&mut rng);
    cont.reorder(&order);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_strings_are_deterministic() {
        let a = random_strings(50, 5, 10, 11);
        let b = random_strings(50, 5, 10, 11);
        assert_eq!(a.raw_bytes(), b.raw_bytes());
        assert_eq!(a.len(), 50);
        for i in 0..a.len() {
            assert!(a.get(i).len() >= 5 && a.get(i).len() <= 10);
            assert!(a.get(i).iter().all(|&c| (MIN_CHAR..=MAX_CHAR).contains(&c)));
        }
    }

    #[test]
    fn difference_covers_are_covers() {
        // every residue difference is reachable, the defining property
        for &dc in &[3usize, 7, 13, 21, 31, 32, 64] {
            let cover = difference_cover(dc);
            for delta in 0..dc {
                let covered = cover
                    .iter()
                    .any(|&a| cover.iter().any(|&b| (a + dc - b) % dc == delta));
                assert!(covered, "delta {delta} not covered for dc {dc}");
            }
        }
    }

    #[test]
    fn shuffle_is_seeded() {
        let mut a = random_strings(100, 3, 6, 3);
        let mut b = random_strings(100, 3, 6, 3);
        shuffle(&mut a, 17);
        shuffle(&mut b, 17);
        for i in 0..a.len() {
            assert_eq!(a.get(i), b.get(i));
        }
    }
}
