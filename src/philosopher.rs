//! Module that contains the life of a philosopher: think, gather both forks, eat, answer
//! the neighbors that had to wait, and start over.
//!
//! A philosopher runs on a single task. It only ever learns about its neighbors through
//! the [`Channel`], and it only blocks in a receive after a probe said a message is there.

use crate::channel::Channel;
use crate::config::Timing;
use crate::error::Result;
use crate::fork::{Fork, Forks, HandOver, Side};
use crate::log;
use crate::message::{Envelope, MessageKind};
use crate::pacer::Pacer;
use crate::topology::Topology;
use color_print::cformat;
use rand::rngs::SmallRng;
use std::collections::HashSet;
use tokio::{
    sync::mpsc::UnboundedSender,
    time::{sleep, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Thinking,
    Acquiring,
    Eating,
    Releasing,
    /// Ate all its meals; only answers requests from now on.
    Finished,
}

/// Reported to an observer every time a philosopher changes phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub rank: usize,
    pub phase: Phase,
    pub left: Fork,
    pub right: Fork,
}

/// Returned by a philosopher that retired, with the forks it ended up holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub rank: usize,
    pub meals: u64,
    pub left: Fork,
    pub right: Fork,
}

pub struct Philosopher<C: Channel> {
    channel: C,
    topology: Topology,
    forks: Forks,
    timing: Timing,
    pacer: Pacer<SmallRng>,
    meals: u64,
    retired_neighbors: HashSet<usize>,
    observer: Option<UnboundedSender<Transition>>,
}

impl<C: Channel> Philosopher<C> {
    pub fn new(channel: C, timing: Timing) -> Result<Self> {
        timing.validate()?;
        let topology = Topology::new(channel.rank(), channel.size())?;
        let forks = Forks::new(
            topology.starts_with_fork(Side::Left),
            topology.starts_with_fork(Side::Right),
        );
        let pacer = Pacer::new(&timing, topology.rank);

        Ok(Self {
            channel,
            topology,
            forks,
            timing,
            pacer,
            meals: 0,
            retired_neighbors: HashSet::new(),
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: UnboundedSender<Transition>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn forks(&self) -> &Forks {
        &self.forks
    }

    /// Runs the philosopher. Only returns when a meal limit is configured and reached, once
    /// every neighbor has retired too.
    pub async fn run(mut self) -> Result<Report> {
        loop {
            self.think().await?;
            if self.forks.needs_acquire() {
                self.acquire().await?;
            }
            self.eat().await;
            self.release()?;

            self.meals += 1;
            if self.timing.meals.is_some_and(|meals| self.meals >= meals) {
                break;
            }
        }

        self.retire().await?;
        Ok(Report {
            rank: self.topology.rank,
            meals: self.meals,
            left: *self.forks.get(Side::Left),
            right: *self.forks.get(Side::Right),
        })
    }

    fn enter(&self, phase: Phase) {
        log::state(self.topology.rank, phase);
        if let Some(observer) = &self.observer {
            let _ = observer.send(Transition {
                rank: self.topology.rank,
                phase,
                left: *self.forks.get(Side::Left),
                right: *self.forks.get(Side::Right),
            });
        }
    }

    /// Sleeps for a think period, answering requests every poll interval.
    async fn think(&mut self) -> Result<()> {
        self.enter(Phase::Thinking);
        let deadline = Instant::now() + self.pacer.think_time();

        loop {
            self.answer_requests().await?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep(self.timing.poll_interval().min(deadline - now)).await;
        }
    }

    async fn answer_requests(&mut self) -> Result<()> {
        for neighbor in self.topology.neighbors() {
            for kind in MessageKind::REQUESTS {
                while let Some(envelope) = self.channel.probe(neighbor, Some(kind)) {
                    let payload = self.channel.receive(neighbor, kind).await?;
                    self.dispatch(envelope, payload)?;
                }
            }
        }
        Ok(())
    }

    /// Requests missing forks and handles everything the neighbors sent, until both forks
    /// are here.
    async fn acquire(&mut self) -> Result<()> {
        self.enter(Phase::Acquiring);

        loop {
            for side in Side::BOTH {
                if self.forks.should_request(side) {
                    let neighbor = self.topology.neighbor(side);
                    self.channel
                        .send(neighbor, MessageKind::request(side.opposite()), false)?;
                    self.forks.mark_requested(side);
                    tracing::debug!(rank = self.topology.rank, neighbor, ?side, "requested fork");
                }
            }

            self.handle_pending().await?;

            if !self.forks.needs_acquire() {
                return Ok(());
            }
            sleep(self.timing.backoff()).await;
        }
    }

    async fn handle_pending(&mut self) -> Result<()> {
        for neighbor in self.topology.neighbors() {
            while let Some(envelope) = self.channel.probe(neighbor, None) {
                let payload = self.channel.receive(neighbor, envelope.kind).await?;
                self.dispatch(envelope, payload)?;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, envelope: Envelope, payload: bool) -> Result<()> {
        let Envelope { source, kind } = envelope;
        match kind.side() {
            None => {
                self.retired_neighbors.insert(source);
            }
            Some(side) if kind.is_request() => match self.forks.try_hand_over(source, side) {
                Some(hand_over) => self.hand_over(hand_over)?,
                None => tracing::debug!(rank = self.topology.rank, source, ?side, "deferred request"),
            },
            Some(side) => self.take_fork(source, side, payload),
        }
        Ok(())
    }

    fn take_fork(&mut self, source: usize, side: Side, clean: bool) {
        if !self.forks.get(side).requested {
            log::warn(&cformat!(
                "Received the <bold>{side:?}</bold> fork from <bold>{source}</bold> without asking for it."
            ));
        }
        if !clean {
            log::warn(&cformat!(
                "The <bold>{side:?}</bold> fork from <bold>{source}</bold> arrived dirty."
            ));
        }
        self.forks.receive(side, clean);
        tracing::debug!(rank = self.topology.rank, source, ?side, "received fork");
    }

    fn hand_over(&mut self, hand_over: HandOver) -> Result<()> {
        let HandOver { to, side } = hand_over;
        self.channel
            .send(to, MessageKind::response(side.opposite()), true)?;
        tracing::debug!(rank = self.topology.rank, to, ?side, "handed over fork");
        Ok(())
    }

    async fn eat(&mut self) {
        self.enter(Phase::Eating);
        sleep(self.pacer.eat_time()).await;
        self.forks.mark_used();
    }

    /// Answers every request deferred while the forks were clean.
    fn release(&mut self) -> Result<()> {
        self.enter(Phase::Releasing);

        for deferred in self.forks.drain_ledger() {
            if let Some(hand_over) = self.forks.try_hand_over(deferred.requester, deferred.side) {
                self.hand_over(hand_over)?;
            }
        }
        Ok(())
    }

    /// Tells the neighbors no more requests will come, then keeps giving forks away until
    /// they retired as well.
    async fn retire(&mut self) -> Result<()> {
        self.enter(Phase::Finished);
        let neighbors = self.topology.neighbors();

        for &neighbor in &neighbors {
            self.channel.send(neighbor, MessageKind::Done, true)?;
        }

        loop {
            self.handle_pending().await?;
            if neighbors.iter().all(|n| self.retired_neighbors.contains(n)) {
                return Ok(());
            }
            sleep(self.timing.poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::local::{LocalChannel, LocalGroup};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn quick(meals: u64, seed: u64) -> Timing {
        Timing {
            think_ms: (5, 40),
            eat_ms: (5, 40),
            poll_interval_ms: 3,
            backoff_ms: 2,
            seed: Some(seed),
            meals: Some(meals),
        }
    }

    async fn dine(size: usize, timing: impl Fn(usize) -> Timing) -> (Vec<Report>, Vec<Transition>) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tasks: Vec<_> = LocalGroup::new(size)
            .into_iter()
            .enumerate()
            .map(|(rank, channel)| {
                let philosopher = Philosopher::new(channel, timing(rank))
                    .unwrap()
                    .with_observer(tx.clone());
                tokio::spawn(philosopher.run())
            })
            .collect();
        drop(tx);

        let mut reports = Vec::new();
        for task in tasks {
            reports.push(task.await.unwrap().unwrap());
        }

        let mut transitions = Vec::new();
        while let Some(transition) = rx.recv().await {
            transitions.push(transition);
        }
        (reports, transitions)
    }

    /// Replays the transitions in order and checks no two neighbors ever eat together.
    fn assert_exclusive(size: usize, transitions: &[Transition]) {
        let mut eating = vec![false; size];

        for t in transitions {
            let topology = Topology::new(t.rank, size).unwrap();
            match t.phase {
                Phase::Eating => {
                    assert!(t.left.possessed && t.right.possessed, "{t:?}");
                    assert!(!eating[topology.left] && !eating[topology.right], "{t:?}");
                    eating[t.rank] = true;
                }
                Phase::Releasing => {
                    assert!(t.left.dirty && t.right.dirty, "{t:?}");
                    eating[t.rank] = false;
                }
                _ => {}
            }
        }
    }

    /// Once the whole table retired, every fork is held by exactly one of its two ends.
    fn assert_one_holder_per_edge(reports: &[Report]) {
        let size = reports.len();
        for report in reports {
            let topology = Topology::new(report.rank, size).unwrap();
            let left = &reports[topology.left];
            assert_ne!(report.left.possessed, left.right.possessed, "{report:?} {left:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ring_of_three_shares_forks() {
        let (reports, transitions) = dine(3, |_| quick(6, 3)).await;

        assert!(reports.iter().all(|r| r.meals == 6));
        assert_exclusive(3, &transitions);
        assert_one_holder_per_edge(&reports);
    }

    #[tokio::test(start_paused = true)]
    async fn ring_of_two_both_hungry() {
        // both think for the same time and ask for the fork the other holds at once
        let timing = |_: usize| Timing {
            think_ms: (10, 10),
            ..quick(5, 11)
        };
        let (reports, transitions) = dine(2, timing).await;

        assert_eq!(reports.iter().map(|r| r.meals).sum::<u64>(), 10);
        assert_exclusive(2, &transitions);
        assert_one_holder_per_edge(&reports);
    }

    #[tokio::test(start_paused = true)]
    async fn larger_ring_makes_progress() {
        let (reports, transitions) = dine(7, |_| quick(10, 99)).await;

        assert!(reports.iter().all(|r| r.meals == 10));
        assert_exclusive(7, &transitions);
        assert_one_holder_per_edge(&reports);
        let meals = transitions.iter().filter(|t| t.phase == Phase::Eating).count();
        assert_eq!(meals, 70);
    }

    #[tokio::test(start_paused = true)]
    async fn lowest_rank_eats_first_without_asking() {
        let timing = |rank: usize| Timing {
            think_ms: if rank == 0 { (1, 1) } else { (50, 50) },
            ..quick(2, 5)
        };
        let (_, transitions) = dine(3, timing).await;

        let first_meal = transitions.iter().find(|t| t.phase == Phase::Eating).unwrap();
        assert_eq!(first_meal.rank, 0);

        let zero: Vec<Phase> = transitions
            .iter()
            .filter(|t| t.rank == 0)
            .map(|t| t.phase)
            .take(2)
            .collect();
        assert_eq!(zero, vec![Phase::Thinking, Phase::Eating]);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_served_every_meal_cycle() {
        // a greedy neighbor with no think time must not starve rank 1
        let timing = |rank: usize| Timing {
            think_ms: if rank == 0 { (0, 0) } else { (30, 30) },
            ..quick(8, 17)
        };
        let (reports, transitions) = dine(2, timing).await;

        assert!(reports.iter().all(|r| r.meals == 8));
        assert_exclusive(2, &transitions);
        assert_one_holder_per_edge(&reports);

        // once rank 1 is hungry, rank 0 starts at most one more meal before rank 1 eats
        let mut meals_while_hungry = None;
        for t in &transitions {
            match (t.rank, t.phase) {
                (1, Phase::Acquiring) => meals_while_hungry = Some(0),
                (1, Phase::Eating) => {
                    assert!(meals_while_hungry.unwrap_or(0) <= 1);
                    meals_while_hungry = None;
                }
                (0, Phase::Eating) => {
                    if let Some(meals) = meals_while_hungry.as_mut() {
                        *meals += 1;
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn group_of_one_is_a_configuration_error() {
        let channel = LocalGroup::new(1).remove(0);
        assert!(matches!(
            Philosopher::new(channel, Timing::default()),
            Err(Error::GroupTooSmall { size: 1 })
        ));
    }

    fn pair() -> (Philosopher<LocalChannel>, LocalChannel) {
        let mut group = LocalGroup::new(2);
        let neighbor = group.remove(1);
        let philosopher = Philosopher::new(group.remove(0), quick(1, 0)).unwrap();
        (philosopher, neighbor)
    }

    #[tokio::test(start_paused = true)]
    async fn thinking_hands_over_dirty_forks() {
        let (mut philosopher, neighbor) = pair();
        neighbor.send(0, MessageKind::LeftForkRequest, false).unwrap();

        let started = Instant::now();
        philosopher.think().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(5));
        assert!(!philosopher.forks().get(Side::Left).possessed);
        assert!(philosopher.forks().get(Side::Right).possessed);
        let envelope = neighbor.probe(0, None).unwrap();
        assert_eq!(envelope.kind, MessageKind::RightForkResponse);
        assert!(neighbor.receive(0, envelope.kind).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn clean_fork_requests_wait_for_the_meal() {
        let (mut philosopher, neighbor) = pair();
        neighbor.send(0, MessageKind::LeftForkRequest, false).unwrap();
        philosopher.answer_requests().await.unwrap();
        neighbor.receive(0, MessageKind::RightForkResponse).await.unwrap();

        // the fork comes back clean and the neighbor immediately wants it again
        neighbor.send(0, MessageKind::LeftForkResponse, true).unwrap();
        neighbor.send(0, MessageKind::LeftForkRequest, false).unwrap();
        philosopher.acquire().await.unwrap();

        assert!(!philosopher.forks().needs_acquire());
        assert_eq!(philosopher.forks().deferred(), 1);
        assert!(neighbor.probe(0, Some(MessageKind::RightForkRequest)).is_some());
        assert!(neighbor.probe(0, Some(MessageKind::RightForkResponse)).is_none());

        philosopher.eat().await;
        assert!(philosopher.forks().get(Side::Left).dirty);
        assert!(philosopher.forks().get(Side::Right).dirty);

        philosopher.release().unwrap();
        assert_eq!(philosopher.forks().deferred(), 0);
        assert!(!philosopher.forks().get(Side::Left).possessed);
        assert!(neighbor.probe(0, Some(MessageKind::RightForkResponse)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fork_claimed_dirty_is_given_up_on_request() {
        let (mut philosopher, neighbor) = pair();
        neighbor.send(0, MessageKind::LeftForkRequest, false).unwrap();
        philosopher.answer_requests().await.unwrap();
        neighbor.receive(0, MessageKind::RightForkResponse).await.unwrap();

        neighbor.send(0, MessageKind::LeftForkResponse, false).unwrap();
        philosopher.acquire().await.unwrap();

        let left = *philosopher.forks().get(Side::Left);
        assert!(left.possessed && left.dirty && !left.requested);

        neighbor.send(0, MessageKind::LeftForkRequest, false).unwrap();
        philosopher.answer_requests().await.unwrap();

        assert_eq!(philosopher.forks().deferred(), 0);
        assert!(!philosopher.forks().get(Side::Left).possessed);
        assert!(neighbor.probe(0, Some(MessageKind::RightForkResponse)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unrequested_fork_is_still_taken() {
        let (mut philosopher, neighbor) = pair();
        neighbor.send(0, MessageKind::RightForkRequest, false).unwrap();
        philosopher.answer_requests().await.unwrap();
        neighbor.receive(0, MessageKind::LeftForkResponse).await.unwrap();
        assert!(!philosopher.forks().get(Side::Right).possessed);

        // nothing was asked for, yet the fork comes back
        neighbor.send(0, MessageKind::RightForkResponse, true).unwrap();
        philosopher.handle_pending().await.unwrap();

        let right = *philosopher.forks().get(Side::Right);
        assert!(right.possessed && !right.dirty);
        assert!(!philosopher.forks().needs_acquire());
    }
}
