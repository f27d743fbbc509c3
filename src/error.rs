//! Errors raised by the philosophers and the harness around them.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A ring of one would share both forks with itself.
    #[error("the group needs more than one philosopher, got {size}")]
    GroupTooSmall { size: usize },

    #[error("rank {rank} is outside a group of {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("rank {0} is not a neighbor of this philosopher")]
    UnknownPeer(usize),

    #[error("the link to rank {0} was closed")]
    Disconnected(usize),

    #[error("the group was aborted: {0}")]
    Aborted(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] LinesCodecError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
