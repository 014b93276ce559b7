use arc_core::GatewayError;
use thiserror::Error;

/// Failures inside the russh adapter before they are classified for the client.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("ssh protocol error: {0}")]
    Russh(#[from] russh::Error),

    #[error("key error: {0}")]
    Key(String),

    #[error("host key rejected for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("known hosts error: {0}")]
    KnownHosts(#[from] std::io::Error),
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::Key(err.to_string())
    }
}

/// Anything that goes wrong while establishing the connection is a connect failure.
impl From<SshError> for GatewayError {
    fn from(err: SshError) -> Self {
        GatewayError::ConnectFailed(err.to_string())
    }
}
