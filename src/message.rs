//! Module that contains all the different message types sent in the group.
//!
//! Fork messages name the fork by the side it has at the *recipient*: a philosopher that
//! wants its right fork asks its right neighbor with a `LeftForkRequest`, and gets it back
//! as a `RightForkResponse`.

use crate::error::Result;
use crate::fork::Side;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    LeftForkRequest,
    RightForkRequest,
    LeftForkResponse,
    RightForkResponse,
    /// The sender ate all its meals and will not ask for forks again.
    Done,
}

impl MessageKind {
    pub const REQUESTS: [MessageKind; 2] =
        [MessageKind::LeftForkRequest, MessageKind::RightForkRequest];

    /// Request for the recipient's fork on `side`.
    pub fn request(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftForkRequest,
            Side::Right => Self::RightForkRequest,
        }
    }

    /// Response carrying the recipient's fork on `side`.
    pub fn response(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftForkResponse,
            Side::Right => Self::RightForkResponse,
        }
    }

    /// The recipient's side this message is about.
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::LeftForkRequest | Self::LeftForkResponse => Some(Side::Left),
            Self::RightForkRequest | Self::RightForkResponse => Some(Side::Right),
            Self::Done => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::LeftForkRequest | Self::RightForkRequest)
    }
}

/// What a probe reports about a pending message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub source: usize,
    pub kind: MessageKind,
}

/// Struct that represents a fork message on the wire between two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub source: usize,
    pub kind: MessageKind,
    /// For responses: the fork is clean. Unused by requests.
    pub payload: bool,
}

/// Enum that represents the messages between a peer and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    /// Sent by a peer once its listener is bound.
    Register { address: String },
    /// Sent by the coordinator when the whole group has registered.
    Start {
        rank: usize,
        size: usize,
        addresses: BTreeMap<usize, String>,
    },
    /// Tears the whole group down.
    Abort { reason: String },
}

/// Message sent first on a link between two peers so the acceptor knows who dialed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub rank: usize,
}

impl Frame {
    /// Function that returns the frame as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses a frame from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(line)?)
    }

    pub fn envelope(&self) -> Envelope {
        Envelope {
            source: self.source,
            kind: self.kind,
        }
    }
}

impl Control {
    /// Function that returns the control message as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses a control message from a JSON formatted `String`.
    pub fn from_json_string(line: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}

impl Hello {
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(line: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}
