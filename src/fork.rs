//! Module that contains the local view a philosopher has of its two forks.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which of the two forks of a philosopher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// The side the same fork has at the neighbor sharing it.
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Struct that represents one fork as seen by one of its two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    pub possessed: bool,
    pub dirty: bool,
    /// A request for this fork is in flight.
    pub requested: bool,
}

/// A request that arrived while the fork was clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deferred {
    pub requester: usize,
    pub side: Side,
}

/// Signal that a fork was cleaned and must be sent to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandOver {
    pub to: usize,
    pub side: Side,
}

/// Both forks of a philosopher together with the requests it deferred.
#[derive(Debug, Clone)]
pub struct Forks {
    left: Fork,
    right: Fork,
    ledger: VecDeque<Deferred>,
}

impl Forks {
    /// Every fork starts dirty; only possession differs between the two endpoints.
    pub fn new(left_possessed: bool, right_possessed: bool) -> Self {
        let fork = |possessed| Fork {
            possessed,
            dirty: true,
            requested: false,
        };

        Self {
            left: fork(left_possessed),
            right: fork(right_possessed),
            ledger: VecDeque::new(),
        }
    }

    pub fn get(&self, side: Side) -> &Fork {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn get_mut(&mut self, side: Side) -> &mut Fork {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn needs_acquire(&self) -> bool {
        !self.left.possessed || !self.right.possessed
    }

    /// Whether a request for the fork on `side` should go out now.
    pub fn should_request(&self, side: Side) -> bool {
        let fork = self.get(side);
        !fork.possessed && !fork.requested
    }

    pub fn mark_requested(&mut self, side: Side) {
        self.get_mut(side).requested = true;
    }

    /// Takes possession of a fork handed over by a neighbor.
    pub fn receive(&mut self, side: Side, clean: bool) {
        let fork = self.get_mut(side);
        fork.possessed = true;
        fork.dirty = !clean;
        fork.requested = false;
    }

    /// Both forks were used and become dirty.
    pub fn mark_used(&mut self) {
        self.left.dirty = true;
        self.right.dirty = true;
    }

    /// Answers a request from `requester` for the fork on `side`.
    ///
    /// A dirty fork is cleaned and given away. A clean fork is kept and the request is
    /// put in the ledger until the next meal is over.
    pub fn try_hand_over(&mut self, requester: usize, side: Side) -> Option<HandOver> {
        let fork = self.get_mut(side);
        if fork.possessed && fork.dirty {
            fork.possessed = false;
            fork.dirty = false;
            fork.requested = false;
            return Some(HandOver { to: requester, side });
        }

        let deferred = Deferred { requester, side };
        if !self.ledger.contains(&deferred) {
            self.ledger.push_back(deferred);
        }
        None
    }

    /// Empties the ledger, oldest request first.
    pub fn drain_ledger(&mut self) -> Vec<Deferred> {
        self.ledger.drain(..).collect()
    }

    pub fn deferred(&self) -> usize {
        self.ledger.len()
    }
}
