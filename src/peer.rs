//! A philosopher running in its own process and talking to its neighbors over TCP.
//!
//! Every peer dials each of its neighbors and only writes on the links it dialed; it only
//! reads on the links it accepted. A single stream per direction keeps the messages of an
//! ordered pair of ranks in send order.

use crate::channel::{Channel, Mailbox};
use crate::error::{Error, Result};
use crate::message::{Control, Envelope, Frame, Hello, MessageKind};
use crate::philosopher::{Philosopher, Report};
use crate::topology::Topology;
use crate::{config::Timing, log};
use async_trait::async_trait;
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LinesCodec};

pub type Lines = Framed<TcpStream, LinesCodec>;

/// Channel of a peer: inbound frames land in the mailbox, outbound frames go to one writer
/// task per neighbor.
pub struct PeerChannel {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    writers: HashMap<usize, UnboundedSender<Frame>>,
}

#[async_trait]
impl Channel for PeerChannel {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: usize, kind: MessageKind, payload: bool) -> Result<()> {
        let writer = self.writers.get(&dest).ok_or(Error::UnknownPeer(dest))?;
        writer
            .send(Frame {
                source: self.rank,
                kind,
                payload,
            })
            .map_err(|_| Error::Disconnected(dest))
    }

    fn probe(&self, source: usize, kind: Option<MessageKind>) -> Option<Envelope> {
        self.mailbox.probe(source, kind)
    }

    async fn receive(&self, source: usize, kind: MessageKind) -> Result<bool> {
        self.mailbox.receive(source, kind).await
    }
}

#[derive(Clone)]
pub struct Peer {
    pub address: String,
    pub server_address: String,
    pub timing: Timing,
}

impl Peer {
    pub fn new(address: String, server_address: String, timing: Timing) -> Self {
        Self {
            address,
            server_address,
            timing,
        }
    }

    /// Function that waits for the next control message from the coordinator.
    pub async fn next_control(server_lines: &mut Lines) -> Result<Control> {
        match server_lines.next().await {
            Some(line) => Control::from_json_string(&line?),
            None => Err(Error::Aborted("the coordinator closed the connection".into())),
        }
    }

    /// Function that opens the write half of the link to `neighbor`.
    async fn dial(
        rank: usize,
        neighbor: usize,
        address: &str,
    ) -> Result<(UnboundedSender<Frame>, JoinHandle<()>)> {
        let stream = TcpStream::connect(address).await?;
        let mut lines = Framed::new(stream, LinesCodec::new());
        lines.send(Hello { rank }.to_json_string()?).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let sent = match frame.to_json_string() {
                    Ok(line) => lines.send(line).await.map_err(Error::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    log::error(&cformat!("Couldn't send to neighbor <bold>{neighbor}</bold>: {e}"));
                    break;
                }
            }
        });

        Ok((tx, writer))
    }

    /// Function that accepts the read half of a link and feeds its frames to the mailbox.
    async fn accept(listener: &TcpListener, mailbox: Arc<Mailbox>) -> Result<usize> {
        let (stream, _address) = listener.accept().await?;
        let mut lines = Framed::new(stream, LinesCodec::new());

        let source = match lines.next().await {
            Some(line) => Hello::from_json_string(&line?)?.rank,
            None => return Err(Error::Aborted("a neighbor hung up before greeting".into())),
        };

        tokio::spawn(async move {
            while let Some(Ok(line)) = lines.next().await {
                match Frame::from_json_string(&line) {
                    Ok(frame) if frame.source == source => mailbox.deliver(frame),
                    Ok(frame) => log::warn(&cformat!(
                        "Dropped a frame claiming to come from <bold>{}</bold> on the link of <bold>{source}</bold>.",
                        frame.source
                    )),
                    Err(e) => log::warn(&format!("{e}")),
                }
            }
            mailbox.close(source);
        });

        Ok(source)
    }

    /// Function that builds the channel to both neighbors from the coordinator's address table.
    async fn connect(
        topology: &Topology,
        addresses: &BTreeMap<usize, String>,
        listener: &TcpListener,
    ) -> Result<(PeerChannel, Vec<JoinHandle<()>>)> {
        let mailbox = Arc::new(Mailbox::new());
        let neighbors = topology.neighbors();

        let mut writers = HashMap::new();
        let mut writer_tasks = Vec::new();
        for &neighbor in &neighbors {
            let address = addresses.get(&neighbor).ok_or(Error::UnknownPeer(neighbor))?;
            let (writer, task) = Self::dial(topology.rank, neighbor, address).await?;
            writers.insert(neighbor, writer);
            writer_tasks.push(task);
        }

        for _ in &neighbors {
            let source = Self::accept(listener, Arc::clone(&mailbox)).await?;
            if !neighbors.contains(&source) {
                return Err(Error::UnknownPeer(source));
            }
        }

        let channel = PeerChannel {
            rank: topology.rank,
            size: topology.size,
            mailbox,
            writers,
        };
        Ok((channel, writer_tasks))
    }

    pub async fn run(&self) -> Result<Report> {
        let server_stream = TcpStream::connect(&self.server_address).await?;
        let mut server_lines = Framed::new(server_stream, LinesCodec::new());

        // neighbors dial this listener as soon as the coordinator starts the group
        let listener = TcpListener::bind(&self.address).await?;
        let own_address = listener.local_addr()?.to_string();

        server_lines
            .send(Control::Register { address: own_address }.to_json_string()?)
            .await?;

        let (rank, size, addresses) = match Self::next_control(&mut server_lines).await? {
            Control::Start {
                rank,
                size,
                addresses,
            } => (rank, size, addresses),
            Control::Abort { reason } => return Err(Error::Aborted(reason)),
            Control::Register { .. } => {
                return Err(Error::Aborted("unexpected registration from the coordinator".into()))
            }
        };

        let topology = match Topology::new(rank, size) {
            Ok(topology) => topology,
            Err(e) => {
                let reason = e.to_string();
                server_lines.send(Control::Abort { reason }.to_json_string()?).await?;
                return Err(e);
            }
        };

        log::info(&cformat!(
            "Joined the table as <bold>{rank}</bold> of <bold>{size}</bold>."
        ));

        let (channel, writer_tasks) = Self::connect(&topology, &addresses, &listener).await?;
        let philosopher = Philosopher::new(channel, self.timing.clone())?;

        let report = tokio::select! {
            report = philosopher.run() => report?,
            control = Self::next_control(&mut server_lines) => match control? {
                Control::Abort { reason } => return Err(Error::Aborted(reason)),
                other => return Err(Error::Aborted(format!("unexpected control message {other:?}"))),
            },
        };

        // the channel is gone with the philosopher: let the writers flush the last frames
        for task in writer_tasks {
            let _ = task.await;
        }
        Ok(report)
    }
}
