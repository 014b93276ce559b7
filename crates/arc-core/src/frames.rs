//! JSON terminal frames exchanged over the WebSocket.
//!
//! Every frame is a JSON object tagged with `type`. The only exception is
//! shell output in [`OutputMode::Raw`], which is sent as a bare text message.

use crate::error::{ErrorCode, GatewayResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Port used when an `auth` frame does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Open a session against a target host.
    Auth(AuthFrame),
    /// Bytes for the remote shell.
    Input { data: String },
    /// PTY geometry change.
    Resize { cols: u16, rows: u16 },
    /// Any type this server does not know. Ignored.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Parse one text message.
    pub fn parse(text: &str) -> GatewayResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Frame type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Auth(_) => "auth",
            ClientFrame::Input { .. } => "input",
            ClientFrame::Resize { .. } => "resize",
            ClientFrame::Unknown => "unknown",
        }
    }
}

/// Payload of an `auth` frame.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AuthFrame {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for AuthFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFrame")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    AuthSuccess,
    AuthFailure,
    Output { data: String },
    Error { code: ErrorCode, message: String },
}

impl ServerFrame {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }

    /// Encode the frame as a text message.
    pub fn encode(&self, mode: OutputMode) -> GatewayResult<String> {
        match (self, mode) {
            (ServerFrame::Output { data }, OutputMode::Raw) => Ok(data.clone()),
            _ => Ok(serde_json::to_string(self)?),
        }
    }
}

/// How `output` frames are put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Bare text message carrying the shell bytes.
    #[default]
    Raw,
    /// `{"type":"output","data":...}`.
    Json,
}
