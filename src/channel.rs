//! Point-to-point messaging between the philosophers of a group.

use crate::error::{Error, Result};
use crate::message::{Envelope, Frame, MessageKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Notify;

/// Asynchronous channel addressed by rank and message kind.
///
/// Messages between an ordered pair of ranks are delivered reliably and in send order.
#[async_trait]
pub trait Channel: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Queues a message for `dest` and returns without waiting for delivery.
    fn send(&self, dest: usize, kind: MessageKind, payload: bool) -> Result<()>;

    /// Reports the oldest pending message from `source`, of `kind` when given. Never waits.
    fn probe(&self, source: usize, kind: Option<MessageKind>) -> Option<Envelope>;

    /// Takes the oldest message from `source` of `kind`, waiting for one if needed.
    async fn receive(&self, source: usize, kind: MessageKind) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Queues {
    pending: HashMap<usize, VecDeque<Frame>>,
    closed: HashSet<usize>,
}

/// Inbound messages of one philosopher, one FIFO queue per sender.
#[derive(Debug, Default)]
pub struct Mailbox {
    queues: Mutex<Queues>,
    arrived: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, frame: Frame) {
        self.queues
            .lock()
            .pending
            .entry(frame.source)
            .or_default()
            .push_back(frame);
        self.arrived.notify_waiters();
    }

    /// No more messages will come from `source`.
    pub fn close(&self, source: usize) {
        self.queues.lock().closed.insert(source);
        self.arrived.notify_waiters();
    }

    pub fn probe(&self, source: usize, kind: Option<MessageKind>) -> Option<Envelope> {
        let queues = self.queues.lock();
        queues
            .pending
            .get(&source)?
            .iter()
            .find(|frame| kind.is_none_or(|kind| frame.kind == kind))
            .map(Frame::envelope)
    }

    fn take(&self, source: usize, kind: MessageKind) -> Option<Frame> {
        let mut queues = self.queues.lock();
        let queue = queues.pending.get_mut(&source)?;
        let index = queue.iter().position(|frame| frame.kind == kind)?;
        queue.remove(index)
    }

    fn is_closed(&self, source: usize) -> bool {
        self.queues.lock().closed.contains(&source)
    }

    pub async fn receive(&self, source: usize, kind: MessageKind) -> Result<bool> {
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(frame) = self.take(source, kind) {
                return Ok(frame.payload);
            }
            if self.is_closed(source) {
                return Err(Error::Disconnected(source));
            }

            arrived.await;
        }
    }

    pub fn len(&self) -> usize {
        self.queues.lock().pending.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
