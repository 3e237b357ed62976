//! Multi-level subcommunicator grid.
//!
//! The grid recursively partitions the world into contiguous groups of the
//! configured sizes, one communicator per level. Levels are stored innermost
//! group first and world last (`L0 .. L{k-1}`): each level is nested in the
//! next, and the level sizes are strictly decreasing as given on the command
//! line. The merge-sort driver walks the grid outermost to innermost, the
//! Bloom-filter recursion innermost to outermost.

use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::Communicator;
use mpi::Rank;

use crate::error::{Error, Result};

/// An ordered set of nested communicators, innermost group first, the full
/// world last.
pub struct Grid {
    comms: Vec<SimpleCommunicator>,
    // nominal level sizes, parallel to `comms`; the actual communicator of a
    // trailing partial group may be smaller
    sizes: Vec<usize>,
}

impl Grid {
    /// Split the world by the given group sizes. Sizes must be strictly
    /// decreasing; sizes not smaller than the world are skipped, matching
    /// the behavior of unused outer levels.
    pub fn new<C: Communicator>(world: &C, group_sizes: &[usize]) -> Result<Self> {
        if group_sizes.windows(2).any(|w| w[0] <= w[1]) {
            return Err(Error::ConfigInvalid(
                "group sizes must be strictly decreasing".into(),
            ));
        }
        if group_sizes.iter().any(|&g| g == 0) {
            return Err(Error::ConfigInvalid("group sizes must be positive".into()));
        }

        let world_size = world.size() as usize;
        let mut outer_first = vec![world.duplicate()];
        let mut sizes = vec![world_size];
        for &group in group_sizes.iter().filter(|&&g| g < world_size) {
            let parent = outer_first.last().unwrap();
            let color = Color::with_value(parent.rank() / group as Rank);
            let comm = parent
                .split_by_color(color)
                .ok_or_else(|| Error::Transport("communicator split failed".into()))?;
            outer_first.push(comm);
            sizes.push(group);
        }

        outer_first.reverse();
        sizes.reverse();
        Ok(Self {
            comms: outer_first,
            sizes,
        })
    }

    /// The world communicator.
    pub fn world(&self) -> &SimpleCommunicator {
        self.comms.last().unwrap()
    }

    /// Number of levels, counting the world.
    pub fn num_levels(&self) -> usize {
        self.comms.len()
    }

    /// Levels from the outermost (world) to the innermost group, the order
    /// in which the merge sort runs its exchanges. Each level carries its
    /// partition count and the nominal size of the groups it partitions
    /// into; the innermost level partitions down to single ranks.
    pub fn sort_plan(&self) -> Vec<SortLevel<'_>> {
        let mut plan = Vec::with_capacity(self.comms.len());
        for (i, comm) in self.comms.iter().enumerate().rev() {
            // partition counts derive from the actual communicator size, so
            // trailing partial groups stay consistent within their level
            let (num_partitions, group_size) = if i > 0 {
                let group = self.sizes[i - 1];
                ((comm.size() as usize).div_ceil(group), group)
            } else {
                (comm.size() as usize, 1)
            };
            plan.push(SortLevel {
                comm,
                num_partitions,
                group_size,
            });
        }
        plan
    }

    /// Levels from the innermost group to the world, the order in which the
    /// Bloom-filter recursion widens its exchanges.
    pub fn filter_levels(&self) -> &[SimpleCommunicator] {
        &self.comms
    }
}

/// One level of the merge-sort plan.
pub struct SortLevel<'a> {
    /// The communicator the exchange runs on.
    pub comm: &'a SimpleCommunicator,
    /// How many partitions this level splits into.
    pub num_partitions: usize,
    /// Nominal size of the groups receiving each partition.
    pub group_size: usize,
}

/// The rank `delta` steps away in cyclic order on `comm`.
pub fn rank_shifted_cyclic<C: Communicator>(comm: &C, delta: i32) -> Rank {
    let size = comm.size();
    (comm.rank() + delta).rem_euclid(size)
}

/// First world rank of the contiguous block `comm` occupies, given the world
/// rank of one of its members.
pub fn comm_base_rank<C: Communicator>(comm: &C, world_rank: Rank) -> Rank {
    world_rank - comm.rank()
}

#[cfg(test)]
mod tests {
    #[test]
    fn cyclic_shift_arithmetic() {
        // mirror of rank_shifted_cyclic without a communicator
        let shift = |rank: i32, delta: i32, size: i32| (rank + delta).rem_euclid(size);
        assert_eq!(shift(0, -1, 4), 3);
        assert_eq!(shift(3, 1, 4), 0);
        assert_eq!(shift(2, -7, 4), 3);
    }
}
