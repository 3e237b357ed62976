//! Golomb coding of small integers.
//!
//! Used to compress LCP values and sorted hash gaps during the exchanges.
//! A value `v` is split by the parameter `b` into the quotient `v / b`,
//! written in unary, and the remainder `v % b`, written in truncated binary.
//! The bit stream is packed into `u64` words, least significant bit first.

/// Writes bits into a growing vector of `u64` words.
struct BitWriter {
    words: Vec<u64>,
    bit_len: usize,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            bit_len: 0,
        }
    }

    fn push_bit(&mut self, bit: bool) {
        let word = self.bit_len / 64;
        let shift = self.bit_len % 64;
        if word == self.words.len() {
            self.words.push(0);
        }
        if bit {
            self.words[word] |= 1u64 << shift;
        }
        self.bit_len += 1;
    }

    // remainders are written most significant bit first, so the decoder can
    // decide on the truncated bit after `k - 1` bits
    fn push_bits_msb(&mut self, value: u64, count: u32) {
        for i in (0..count).rev() {
            self.push_bit(value >> i & 1 == 1);
        }
    }
}

/// Reads bits back out of a packed word slice.
struct BitReader<'a> {
    words: &'a [u64],
    cursor: usize,
}

impl<'a> BitReader<'a> {
    fn new(words: &'a [u64]) -> Self {
        Self { words, cursor: 0 }
    }

    fn read_bit(&mut self) -> bool {
        let bit = self.words[self.cursor / 64] >> (self.cursor % 64) & 1 == 1;
        self.cursor += 1;
        bit
    }

    fn read_bits_msb(&mut self, count: u32) -> u64 {
        let mut value = 0;
        for _ in 0..count {
            value = value << 1 | self.read_bit() as u64;
        }
        value
    }
}

/// Golomb parameter for `n` values expected to be spread over `range`,
/// clamped below at 8. This follows the rule of thumb `b ~ 0.69 * mean gap`;
/// the arithmetic saturates instead of overflowing for sparse intervals.
pub fn golomb_parameter(range: u64, n: u64) -> u64 {
    let mean_gap = range / n.max(1);
    (mean_gap / 100).saturating_mul(69).max(8)
}

fn remainder_bits(b: u64) -> (u32, u64) {
    // truncated binary: the first `cutoff` remainders take `k - 1` bits
    let k = 64 - (b - 1).leading_zeros();
    let cutoff = (1u64 << k) - b;
    (k, cutoff)
}

/// Encode values with parameter `b >= 2`, returning packed words.
pub fn golomb_encode(values: &[u64], b: u64) -> Vec<u64> {
    debug_assert!(b >= 2);
    let (k, cutoff) = remainder_bits(b);

    let mut writer = BitWriter::new();
    for &value in values {
        let quotient = value / b;
        let remainder = value % b;
        for _ in 0..quotient {
            writer.push_bit(true);
        }
        writer.push_bit(false);
        if remainder < cutoff {
            writer.push_bits_msb(remainder, k - 1);
        } else {
            writer.push_bits_msb(remainder + cutoff, k);
        }
    }
    writer.words
}

/// Decode `count` values encoded with parameter `b`.
pub fn golomb_decode(words: &[u64], count: usize, b: u64) -> Vec<u64> {
    debug_assert!(b >= 2);
    let (k, cutoff) = remainder_bits(b);

    let mut reader = BitReader::new(words);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let mut quotient = 0u64;
        while reader.read_bit() {
            quotient += 1;
        }
        let mut remainder = reader.read_bits_msb(k - 1);
        if remainder >= cutoff {
            remainder = (remainder << 1 | reader.read_bit() as u64) - cutoff;
        }
        values.push(quotient * b + remainder);
    }
    values
}

/// Encode the gaps of an ascending sequence starting from `base`.
pub fn golomb_encode_deltas(values: &[u64], base: u64, b: u64) -> Vec<u64> {
    let mut prev = base;
    let deltas: Vec<u64> = values
        .iter()
        .map(|&v| {
            let delta = v - prev;
            prev = v;
            delta
        })
        .collect();
    golomb_encode(&deltas, b)
}

/// Inverse of [`golomb_encode_deltas`].
pub fn golomb_decode_deltas(words: &[u64], count: usize, base: u64, b: u64) -> Vec<u64> {
    let mut prev = base;
    golomb_decode(words, count, b)
        .into_iter()
        .map(|delta| {
            prev += delta;
            prev
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn round_trip_small_values() {
        let values = vec![0, 1, 2, 7, 8, 9, 63, 64, 100, 0];
        for b in [2, 5, 8, 13, 64] {
            let words = golomb_encode(&values, b);
            assert_eq!(golomb_decode(&words, values.len(), b), values);
        }
    }

    #[test]
    fn round_trip_random_values() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<u64> = (0..1000).map(|_| rng.gen_range(0..10_000)).collect();
        let b = golomb_parameter(10_000, values.len() as u64);
        let words = golomb_encode(&values, b);
        assert_eq!(golomb_decode(&words, values.len(), b), values);
    }

    #[test]
    fn round_trip_sorted_deltas() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut values: Vec<u64> = (0..500).map(|_| rng.gen()).collect();
        values.sort_unstable();
        let b = golomb_parameter(u64::MAX, values.len() as u64);
        let words = golomb_encode_deltas(&values, 0, b);
        assert_eq!(golomb_decode_deltas(&words, values.len(), 0, b), values);
    }

    #[test]
    fn parameter_is_clamped() {
        assert_eq!(golomb_parameter(100, 1000), 8);
        assert!(golomb_parameter(u64::MAX, 1) > 1 << 40);
    }

    #[test]
    fn empty_input() {
        assert!(golomb_encode(&[], 8).is_empty());
        assert!(golomb_decode(&[], 0, 8).is_empty());
    }
}
