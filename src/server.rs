//! The coordinator of a TCP group: hands out ranks, tells every peer where its neighbors
//! listen once the whole table is seated, and tears the group down if a peer aborts.

use crate::error::{Error, Result};
use crate::message::Control;
use crate::{log, peer::Lines};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{watch, Barrier, RwLock},
};
use tokio_util::codec::{Framed, LinesCodec};

/// What the coordinator knows about the seated peers.
pub struct Registry {
    pub addresses: BTreeMap<usize, String>,
    aborted: watch::Sender<Option<String>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            addresses: BTreeMap::new(),
            aborted: watch::channel(None).0,
        }
    }
}

impl Registry {
    /// Function that tears the group down. Only the first reason is kept.
    pub fn abort(&self, reason: String) {
        self.aborted.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.aborted.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.aborted.subscribe()
    }
}

/// Function that resolves once the group is aborted, with the reason.
async fn aborted(receiver: &mut watch::Receiver<Option<String>>) -> String {
    let reason = match receiver.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone(),
        Err(_) => None,
    };
    reason.unwrap_or_else(|| "the coordinator stopped".into())
}

#[derive(Clone)]
pub struct Server {
    pub own_address: String,
    pub number_of_peers: usize,
}

impl Server {
    pub fn new(own_address: String, number_of_peers: usize) -> Self {
        Self {
            own_address,
            number_of_peers,
        }
    }

    async fn handle(
        mut lines: Lines,
        rank: usize,
        size: usize,
        barrier: Arc<Barrier>,
        registry: Arc<RwLock<Registry>>,
    ) -> Result<()> {
        let mut abort = registry.read().await.subscribe();

        let address = match Self::next(&mut lines).await? {
            Some(Control::Register { address }) => address,
            Some(other) => {
                return Err(Error::Aborted(format!("expected a registration, got {other:?}")))
            }
            None => return Err(Error::Aborted(format!("peer {rank} left before registering"))),
        };
        registry.write().await.addresses.insert(rank, address);

        // wait for all participants to join, unless one of them gave up
        tokio::select! {
            _ = barrier.wait() => {}
            reason = aborted(&mut abort) => {
                lines.send(Control::Abort { reason }.to_json_string()?).await?;
                return Ok(());
            }
        }

        let addresses = registry.read().await.addresses.clone();
        log::info(&cformat!("Seating peer <bold>{rank}</bold>."));
        lines
            .send(
                Control::Start {
                    rank,
                    size,
                    addresses,
                }
                .to_json_string()?,
            )
            .await?;

        loop {
            tokio::select! {
                reason = aborted(&mut abort) => {
                    lines.send(Control::Abort { reason }.to_json_string()?).await?;
                    return Ok(());
                }
                line = Self::next(&mut lines) => match line? {
                    Some(Control::Abort { reason }) => {
                        log::error(&cformat!("Peer <bold>{rank}</bold> aborted: {reason}"));
                        registry.read().await.abort(reason);
                    }
                    Some(other) => log::warn(&format!("Ignored {other:?} from peer {rank}.")),
                    // the peer is done eating
                    None => return Ok(()),
                },
            }
        }
    }

    async fn next(lines: &mut Lines) -> Result<Option<Control>> {
        match lines.next().await {
            Some(line) => Ok(Some(Control::from_json_string(&line?)?)),
            None => Ok(None),
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        if self.number_of_peers <= 1 {
            return Err(Error::GroupTooSmall {
                size: self.number_of_peers,
            });
        }
        Ok(TcpListener::bind(&self.own_address).await?)
    }

    /// Seats `number_of_peers` peers from `listener` and waits until they all left.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let size = self.number_of_peers;
        let registry = Arc::new(RwLock::new(Registry::default()));
        let barrier = Arc::new(Barrier::new(size));
        let mut handles = Vec::with_capacity(size);

        // every seat is accepted even after an abort, so that each peer is told about it
        for rank in 0..size {
            let (peer_stream, peer_address): (_, SocketAddr) = listener.accept().await?;
            log::info(&cformat!(
                "Accepted a <bold>connection</bold> from {peer_address}."
            ));

            let lines = Framed::new(peer_stream, LinesCodec::new());
            let barrier = Arc::clone(&barrier);
            let registry = Arc::clone(&registry);

            handles.push(tokio::spawn(async move {
                if let Err(e) = Self::handle(lines, rank, size, barrier, Arc::clone(&registry)).await {
                    log::error(&format!("{e}"));
                    registry.read().await.abort(e.to_string());
                }
            }));
        }

        for handle in handles {
            if handle.await.is_err() {
                log::error("A peer connection task failed.");
            }
        }

        let reason = registry.read().await.abort_reason();
        match reason {
            Some(reason) => Err(Error::Aborted(reason)),
            None => Ok(()),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        log::info(&cformat!(
            "Waiting for <bold>{}</bold> philosophers on <bold>{}</bold>.",
            self.number_of_peers,
            self.own_address
        ));
        self.serve(listener).await
    }
}
