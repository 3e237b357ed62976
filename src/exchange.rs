//! All-to-all exchange of strings, LCP values and hashes
pub mod collectives;
pub mod golomb;
pub mod strings;

pub use collectives::{allgatherv, alltoallv, exclusive_scan};
pub use strings::{exchange_strings, AlltoallRoutine, ExchangeConfig, ExchangeResult};
