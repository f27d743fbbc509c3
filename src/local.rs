//! A whole group inside one process: every philosopher is a task and messages are moved
//! between in-memory mailboxes.

use crate::channel::{Channel, Mailbox};
use crate::error::{Error, Result};
use crate::message::{Envelope, Frame, MessageKind};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LocalGroup;

impl LocalGroup {
    /// Creates the endpoints of a group of `size`, indexed by rank.
    pub fn new(size: usize) -> Vec<LocalChannel> {
        let mailboxes: Arc<Vec<Mailbox>> = Arc::new((0..size).map(|_| Mailbox::new()).collect());

        (0..size)
            .map(|rank| LocalChannel {
                rank,
                mailboxes: Arc::clone(&mailboxes),
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct LocalChannel {
    rank: usize,
    mailboxes: Arc<Vec<Mailbox>>,
}

impl LocalChannel {
    fn own(&self) -> &Mailbox {
        &self.mailboxes[self.rank]
    }

    /// Messages queued for this rank and not received yet.
    pub fn pending(&self) -> usize {
        self.own().len()
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.mailboxes.len()
    }

    fn send(&self, dest: usize, kind: MessageKind, payload: bool) -> Result<()> {
        let mailbox = self.mailboxes.get(dest).ok_or(Error::UnknownPeer(dest))?;
        mailbox.deliver(Frame {
            source: self.rank,
            kind,
            payload,
        });
        Ok(())
    }

    fn probe(&self, source: usize, kind: Option<MessageKind>) -> Option<Envelope> {
        self.own().probe(source, kind)
    }

    async fn receive(&self, source: usize, kind: MessageKind) -> Result<bool> {
        self.own().receive(source, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_reach_the_addressed_rank() {
        let group = LocalGroup::new(3);

        group[0].send(2, MessageKind::RightForkRequest, false).unwrap();

        assert!(group[1].probe(0, None).is_none());
        let envelope = group[2].probe(0, None).unwrap();
        assert_eq!(envelope.kind, MessageKind::RightForkRequest);
        assert!(!group[2].receive(0, envelope.kind).await.unwrap());
        assert_eq!(group[2].pending(), 0);
    }

    #[test]
    fn sending_outside_the_group_fails() {
        let group = LocalGroup::new(2);
        assert!(matches!(
            group[0].send(9, MessageKind::Done, true),
            Err(Error::UnknownPeer(9))
        ));
    }
}
