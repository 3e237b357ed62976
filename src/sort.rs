//! Rank-local string sorting
pub mod merge;
pub mod multikey;

pub use merge::multiway_merge;
pub use multikey::{fill_lcps, sort_container};
