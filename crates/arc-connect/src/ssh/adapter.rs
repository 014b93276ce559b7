use arc_core::{AuthFrame, GatewayResult};
use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroizing;

/// Credentials for one connect attempt. Moved into [`ShellAdapter::connect`]
/// and dropped when it returns; the secret is wiped on drop.
pub struct AuthRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<Zeroizing<String>>,
}

impl AuthRequest {
    pub fn from_frame(frame: AuthFrame) -> Self {
        Self {
            host: frame.host,
            port: frame.port,
            username: frame.username,
            password: frame.password.map(Zeroizing::new),
        }
    }

    /// Identity used when the client never sends an `auth` frame.
    pub fn default_identity(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
        }
    }

    /// `user@host:port`, safe to log.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Result of a non-blocking read from the shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRead {
    Data(Vec<u8>),
    /// Nothing available right now.
    Empty,
    /// The channel reached EOF or was closed by the remote.
    Eof,
}

/// One SSH connection plus one interactive shell channel.
///
/// Driven by exactly one bridge task, so methods take `&mut self`.
#[async_trait]
pub trait ShellAdapter: Send {
    /// Connect, authenticate, then open a PTY shell channel.
    ///
    /// Rejected credentials are `AuthFailed`; every other failure before the
    /// shell is up is `ConnectFailed`.
    async fn connect(&mut self, auth: AuthRequest) -> GatewayResult<()>;

    /// Queue bytes for the remote shell.
    async fn send(&mut self, data: &[u8]) -> GatewayResult<()>;

    /// Take the next available output chunk without waiting.
    fn receive_non_blocking(&mut self) -> GatewayResult<ChannelRead>;

    /// Change the PTY geometry. A no-op before the channel exists.
    async fn resize(&mut self, cols: u16, rows: u16) -> GatewayResult<()>;

    /// Close the channel, then the connection. Idempotent.
    async fn close(&mut self);
}

/// Creates a fresh adapter for every session.
pub trait AdapterFactory: Send + Sync {
    fn create(&self) -> Box<dyn ShellAdapter>;
}
