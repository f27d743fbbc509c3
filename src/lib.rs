pub use crate::channel::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::philosopher::*;

pub mod channel;
pub mod config;
pub mod error;
pub mod fork;
pub mod local;
pub mod log;
pub mod message;
pub mod pacer;
pub mod peer;
pub mod philosopher;
pub mod server;
pub mod topology;
