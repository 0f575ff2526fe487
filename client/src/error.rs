use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The HTTP call could not be completed
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    /// The control plane answered with a body of the wrong shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream connect failed: {0}")]
    ConnectError(String),

    #[error("failed to send speak request: {0}")]
    SendError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("no message from engine within {0:?}")]
    ReceiveTimeout(Duration),

    /// Transport failure while streaming (not a close handshake)
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The engine reported a failure; `message` is the engine's own text.
    #[error("{message}")]
    EngineError {
        code: Option<String>,
        message: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

