//! All-to-all string exchange with optional prefix and LCP-value
//! compression.
//!
//! Wire formats, per destination:
//! * plain: concatenated zero-terminated strings, with a sibling `int32`
//!   count vector;
//! * prefix compression: per string one little-endian `u64` LCP, then the
//!   `len - lcp` distinct bytes, then the terminator; the receiver rebuilds
//!   the full strings with `extend_prefix`;
//! * LCP-value compression: LCP values travel in a separate Golomb-coded
//!   `u64` stream, each interval preceded by `(encoded_len, b)`.

use mpi::traits::{Communicator, CommunicatorCollectives};
use mpi::Count;

use crate::error::{Error, Result};
use crate::exchange::collectives::alltoallv;
use crate::exchange::golomb::{golomb_decode, golomb_encode, golomb_parameter};
use crate::strings::{StringContainer, StringOrigin};

/// Which all-to-all routine the exchange uses. The small-message and
/// direct-message variants fall back to the combined routine, which handles
/// both regimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlltoallRoutine {
    /// Optimized for many small messages.
    Small,
    /// One direct message per destination.
    Direct,
    /// Combined routine, the default.
    Combined,
}

impl AlltoallRoutine {
    /// Decode the numeric CLI value.
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Small,
            1 => Self::Direct,
            _ => Self::Combined,
        }
    }
}

/// Compression switches for the string exchange.
#[derive(Clone, Copy, Debug)]
pub struct ExchangeConfig {
    /// All-to-all routine selection.
    pub routine: AlltoallRoutine,
    /// Golomb-code the LCP values into a separate stream.
    pub lcp_compression: bool,
    /// Send only the bytes not covered by the LCP with the predecessor.
    pub prefix_compression: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            routine: AlltoallRoutine::Combined,
            lcp_compression: false,
            prefix_compression: false,
        }
    }
}

/// LCPs with the first entry of every interval zeroed, so no prefix refers
/// across an interval boundary.
fn interval_local_lcps(cont: &StringContainer, dest_counts: &[usize]) -> Vec<u64> {
    let mut lcps = cont.lcps().to_vec();
    let mut start = 0;
    for &count in dest_counts {
        if count > 0 {
            lcps[start] = 0;
        }
        start += count;
    }
    lcps
}

fn encode_lcp_stream(lcps: &[u64], dest_counts: &[usize]) -> (Vec<u64>, Vec<Count>) {
    let mut stream = Vec::new();
    let mut counts = Vec::with_capacity(dest_counts.len());
    let mut start = 0;
    for &count in dest_counts {
        let interval = &lcps[start..start + count];
        let b = golomb_parameter(interval.iter().sum(), count as u64);
        let words = golomb_encode(interval, b);
        stream.push(words.len() as u64);
        stream.push(b);
        stream.extend_from_slice(&words);
        counts.push((2 + words.len()) as Count);
        start += count;
    }
    (stream, counts)
}

fn decode_lcp_stream(stream: &[u64], recv_counts: &[usize]) -> Result<Vec<u64>> {
    let mut lcps = Vec::new();
    let mut cursor = 0;
    for &count in recv_counts {
        if cursor + 2 > stream.len() {
            return Err(Error::Malformed("truncated lcp stream header".into()));
        }
        let n_words = stream[cursor] as usize;
        let b = stream[cursor + 1];
        cursor += 2;
        if cursor + n_words > stream.len() {
            return Err(Error::Malformed("truncated lcp stream".into()));
        }
        lcps.extend(golomb_decode(&stream[cursor..cursor + n_words], count, b));
        cursor += n_words;
    }
    Ok(lcps)
}

/// Everything a receiver learns from one string exchange.
pub struct ExchangeResult {
    /// The received strings, origins preserved.
    pub container: StringContainer,
    /// Per-source string counts, delimiting the received sorted runs.
    pub runs: Vec<usize>,
    /// For every source, the position in its local order where the interval
    /// sent to this rank began.
    pub source_offsets: Vec<usize>,
}

/// Redistribute the container's strings: the first `dest_counts[0]` strings
/// go to rank 0 of `comm`, the next `dest_counts[1]` to rank 1, and so on.
/// The container must be locally sorted with a filled LCP array when either
/// compression is enabled.
pub fn exchange_strings<C: Communicator>(
    cont: &StringContainer,
    dest_counts: &[usize],
    config: &ExchangeConfig,
    comm: &C,
) -> Result<ExchangeResult> {
    debug_assert_eq!(dest_counts.len(), comm.size() as usize);
    debug_assert_eq!(dest_counts.iter().sum::<usize>(), cont.len());

    let lcps = interval_local_lcps(cont, dest_counts);

    // pack the payload for every destination
    let mut payload = Vec::with_capacity(cont.char_size());
    let mut byte_counts = Vec::with_capacity(dest_counts.len());
    let mut index = 0;
    for &count in dest_counts {
        let before = payload.len();
        for _ in 0..count {
            let string = cont.get(index);
            let cut = if config.prefix_compression {
                lcps[index] as usize
            } else {
                0
            };
            if config.prefix_compression && !config.lcp_compression {
                payload.extend_from_slice(&lcps[index].to_le_bytes());
            }
            payload.extend_from_slice(&string[cut..]);
            payload.push(0);
            index += 1;
        }
        byte_counts.push((payload.len() - before) as Count);
        debug_assert!(payload.len() - before <= Count::MAX as usize);
    }

    let string_counts: Vec<Count> = dest_counts.iter().map(|&c| c as Count).collect();
    let mut recv_string_counts = vec![0 as Count; dest_counts.len()];
    comm.all_to_all_into(&string_counts, &mut recv_string_counts);

    let send_offsets: Vec<u64> = {
        let mut acc = 0u64;
        dest_counts
            .iter()
            .map(|&c| {
                let tmp = acc;
                acc += c as u64;
                tmp
            })
            .collect()
    };
    let mut recv_source_offsets = vec![0u64; dest_counts.len()];
    comm.all_to_all_into(&send_offsets, &mut recv_source_offsets);

    let (recv_payload, _) = alltoallv(&payload, &byte_counts, comm);

    // LCP values as a separate, optionally mandatory, Golomb stream
    let recv_lcps = if config.lcp_compression {
        let (stream, stream_counts) = encode_lcp_stream(&lcps, dest_counts);
        let (recv_stream, _) = alltoallv(&stream, &stream_counts, comm);
        let counts: Vec<usize> = recv_string_counts.iter().map(|&c| c as usize).collect();
        Some(decode_lcp_stream(&recv_stream, &counts)?)
    } else {
        None
    };

    // origins ride along as flattened (rank, index) pairs
    let recv_origins = if let Some(origins) = cont.origins() {
        let flat: Vec<u64> = origins.iter().flat_map(|o| [o.rank, o.index]).collect();
        let pair_counts: Vec<Count> = dest_counts.iter().map(|&c| 2 * c as Count).collect();
        let (recv_flat, _) = alltoallv(&flat, &pair_counts, comm);
        Some(
            recv_flat
                .chunks_exact(2)
                .map(|pair| StringOrigin {
                    rank: pair[0],
                    index: pair[1],
                })
                .collect::<Vec<_>>(),
        )
    } else {
        None
    };

    let total_strings: usize = recv_string_counts.iter().map(|&c| c as usize).sum();
    let mut received = if config.prefix_compression && !config.lcp_compression {
        let (bytes, lcps) = parse_interleaved(&recv_payload, total_strings)?;
        let mut cont = StringContainer::from_parts(bytes, None, recv_origins)?;
        if cont.len() != total_strings {
            return Err(Error::Malformed("string count mismatch after exchange".into()));
        }
        cont.extend_prefix(&lcps)?;
        cont
    } else {
        let mut cont = StringContainer::from_parts(recv_payload, None, recv_origins)?;
        if cont.len() != total_strings {
            return Err(Error::Malformed("string count mismatch after exchange".into()));
        }
        if let Some(lcps) = recv_lcps {
            if config.prefix_compression {
                cont.extend_prefix(&lcps)?;
            } else {
                cont.lcps_mut().copy_from_slice(&lcps);
            }
        }
        cont
    };
    received.make_contiguous();

    Ok(ExchangeResult {
        container: received,
        runs: recv_string_counts.iter().map(|&c| c as usize).collect(),
        source_offsets: recv_source_offsets.iter().map(|&o| o as usize).collect(),
    })
}

/// Split an interleaved `(u64 lcp, suffix, 0)` stream into suffix bytes and
/// LCP values.
fn parse_interleaved(payload: &[u8], count: usize) -> Result<(Vec<u8>, Vec<u64>)> {
    let mut bytes = Vec::with_capacity(payload.len().saturating_sub(8 * count));
    let mut lcps = Vec::with_capacity(count);
    let mut cursor = 0;
    while cursor < payload.len() {
        if cursor + 8 > payload.len() {
            return Err(Error::Malformed("truncated lcp header".into()));
        }
        let lcp = u64::from_le_bytes(payload[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let end = payload[cursor..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Malformed("unterminated string".into()))?;
        bytes.extend_from_slice(&payload[cursor..cursor + end + 1]);
        lcps.push(lcp);
        cursor += end + 1;
    }
    if lcps.len() != count {
        return Err(Error::Malformed("string count mismatch after exchange".into()));
    }
    Ok((bytes, lcps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_stream_round_trips() {
        let mut payload = Vec::new();
        for (lcp, suffix) in [(0u64, &b"aaaaab"[..]), (5, b"c"), (5, b"d")] {
            payload.extend_from_slice(&lcp.to_le_bytes());
            payload.extend_from_slice(suffix);
            payload.push(0);
        }
        let (bytes, lcps) = parse_interleaved(&payload, 3).unwrap();
        assert_eq!(bytes, b"aaaaab\0c\0d\0");
        assert_eq!(lcps, vec![0, 5, 5]);

        let mut cont = StringContainer::from_bytes(bytes);
        cont.extend_prefix(&lcps).unwrap();
        assert_eq!(cont.raw_bytes(), b"aaaaab\0aaaaac\0aaaaad\0");
    }

    #[test]
    fn lcp_stream_round_trips() {
        let lcps = vec![0, 3, 3, 0, 7, 2, 0];
        let (stream, counts) = encode_lcp_stream(&lcps, &[3, 0, 4]);
        assert_eq!(counts.len(), 3);
        assert_eq!(decode_lcp_stream(&stream, &[3, 0, 4]).unwrap(), lcps);
    }

    #[test]
    fn interval_lcps_reset_at_boundaries() {
        let mut cont = StringContainer::from_bytes(b"ab\0abc\0abcd\0".to_vec());
        cont.lcps_mut().copy_from_slice(&[0, 2, 3]);
        assert_eq!(interval_local_lcps(&cont, &[1, 2, 0]), vec![0, 0, 3]);
    }
}
