//! # Distributed String Sorting (dss)
//!
//! A distributed sorter for large sets of byte-strings partitioned across MPI
//! ranks, designed for suffix-, window- and difference-cover-style inputs
//! whose strings share long common prefixes.
//!
//! Notable features of this library are:
//! * Multi-level sample sort with string-, char- and index-based splitter
//!   sampling and LCP-aware all-to-all string exchange.
//! * A distributed Bloom-filter duplicate detector driving prefix doubling,
//!   so that only hashes of undistinguished prefixes travel over the wire.
//! * A space-efficient driver that sorts bounded-memory quantiles of the
//!   input and stitches their outputs into a global permutation.
//!
//! The sort either redistributes the strings themselves or emits a
//! permutation of `(rank, local index)` pairs describing the sorted order,
//! which can be verified with the checkers in [`verify`].
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod bloomfilter;
pub mod error;
pub mod exchange;
pub mod generate;
pub mod grid;
pub mod hash;
pub mod measure;
pub mod merge_sort;
pub mod partition;
pub mod permutation;
pub mod sort;
pub mod space_efficient;
pub mod strings;
pub mod verify;

// Public API
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use merge_sort::DistributedMergeSort;
#[doc(inline)]
pub use permutation::InputPermutation;
#[doc(inline)]
pub use space_efficient::SpaceEfficientSort;
#[doc(inline)]
pub use strings::StringContainer;
