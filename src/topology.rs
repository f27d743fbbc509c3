//! Ring topology: who the neighbors of a rank are and who starts with which fork.

use crate::error::{Error, Result};
use crate::fork::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub rank: usize,
    pub size: usize,
    pub left: usize,
    pub right: usize,
}

impl Topology {
    /// Resolves the neighbors of `rank` in a ring of `size` philosophers.
    pub fn new(rank: usize, size: usize) -> Result<Self> {
        if size <= 1 {
            return Err(Error::GroupTooSmall { size });
        }
        if rank >= size {
            return Err(Error::RankOutOfRange { rank, size });
        }

        Ok(Self {
            rank,
            size,
            left: (rank + 1) % size,
            right: (rank + size - 1) % size,
        })
    }

    pub fn neighbor(&self, side: Side) -> usize {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Distinct neighbor ranks. A ring of two has a single neighbor on both sides.
    pub fn neighbors(&self) -> Vec<usize> {
        if self.left == self.right {
            vec![self.left]
        } else {
            vec![self.left, self.right]
        }
    }

    /// The fork of an edge starts with the endpoint of smaller rank.
    pub fn starts_with_fork(&self, side: Side) -> bool {
        self.rank < self.neighbor(side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_of_one_is_rejected() {
        assert!(matches!(
            Topology::new(0, 1),
            Err(Error::GroupTooSmall { size: 1 })
        ));
        assert!(matches!(
            Topology::new(0, 0),
            Err(Error::GroupTooSmall { size: 0 })
        ));
    }

    #[test]
    fn rank_must_be_in_group() {
        assert!(matches!(
            Topology::new(3, 3),
            Err(Error::RankOutOfRange { rank: 3, size: 3 })
        ));
    }

    #[test]
    fn neighbors_wrap_around() {
        let first = Topology::new(0, 5).unwrap();
        assert_eq!((first.left, first.right), (1, 4));

        let last = Topology::new(4, 5).unwrap();
        assert_eq!((last.left, last.right), (0, 3));
    }

    #[test]
    fn ring_of_three_ownership() {
        let owners: Vec<(bool, bool)> = (0..3)
            .map(|rank| {
                let t = Topology::new(rank, 3).unwrap();
                (t.starts_with_fork(Side::Left), t.starts_with_fork(Side::Right))
            })
            .collect();

        // rank 0 holds both of its forks, rank 1 holds the one shared with 2, rank 2 none
        assert_eq!(owners, vec![(true, true), (true, false), (false, false)]);
    }

    #[test]
    fn every_edge_has_exactly_one_initial_owner() {
        for size in 2..8 {
            for rank in 0..size {
                let me = Topology::new(rank, size).unwrap();
                let left = Topology::new(me.left, size).unwrap();
                // my left fork is my left neighbor's right fork
                assert_ne!(
                    me.starts_with_fork(Side::Left),
                    left.starts_with_fork(Side::Right)
                );
            }
        }
    }

    #[test]
    fn ring_of_two_has_one_neighbor() {
        let t = Topology::new(1, 2).unwrap();
        assert_eq!(t.neighbors(), vec![0]);
    }
}
