//! Error types for request channels.

use std::time::Duration;

use thiserror::Error;

use crate::channel::{ChannelState, Operation};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("protocol violation: cannot {operation} while {state}")]
    ProtocolViolation {
        operation: Operation,
        state: ChannelState,
    },

    /// No reply arrived before the receive deadline. The channel is still
    /// awaiting that reply.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    ChannelClosed,

    #[error("reply carried {0} frames, expected exactly one")]
    UnexpectedFrames(usize),

    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    #[error("{0} channel(s) still open")]
    ChannelsOpen(usize),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to set up socket for {endpoint}: {source}")]
    Setup {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },

    #[error("failed to connect to {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },

    #[error("{endpoint} not reachable within {timeout:?}")]
    Unreachable { endpoint: String, timeout: Duration },
}

impl ConnectionError {
    pub(crate) fn invalid(endpoint: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Transport termination means the channel can no longer be used.
pub(crate) fn from_transport(err: zmq::Error) -> Error {
    match err {
        zmq::Error::ETERM => Error::ChannelClosed,
        other => Error::Transport(other),
    }
}
