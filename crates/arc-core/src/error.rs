use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class reported to the client in an `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Protocol,
    Connect,
    Channel,
    Capacity,
    Timeout,
    Shutdown,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Connect => "CONNECT",
            ErrorCode::Channel => "CHANNEL",
            ErrorCode::Capacity => "CAPACITY",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Shutdown => "SHUTDOWN",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the gateway.
///
/// Every variant is fatal to exactly one session; none of them may escape
/// the per-connection task.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing handshake frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The target rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Target unreachable, SSH negotiation failed, or host key rejected.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// I/O failure on an already active channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// The client went away. Not reported to anyone.
    #[error("client disconnected")]
    ClientDisconnect,

    #[error("session limit reached ({0} sessions)")]
    Capacity(usize),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Protocol(e.to_string())
    }
}

impl GatewayError {
    /// The code sent to the client for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Protocol(_) => ErrorCode::Protocol,
            GatewayError::AuthFailed(_) | GatewayError::ConnectFailed(_) => ErrorCode::Connect,
            GatewayError::Channel(_) => ErrorCode::Channel,
            GatewayError::Capacity(_) => ErrorCode::Capacity,
            GatewayError::Timeout(_) => ErrorCode::Timeout,
            GatewayError::ClientDisconnect
            | GatewayError::Transport(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_)
            | GatewayError::Other(_) => ErrorCode::Internal,
        }
    }

    /// Whether the peer is gone, so no frame can be delivered.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            GatewayError::ClientDisconnect | GatewayError::Transport(_)
        )
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
