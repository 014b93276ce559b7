//! Handshake stage: turn the first client frame into a connected shell.

use crate::config::HandshakeConfig;
use crate::session::{SessionGuard, SessionState};
use crate::ssh::{AuthRequest, ShellAdapter};
use crate::transport::TerminalTransport;
use arc_core::{ClientFrame, GatewayError, GatewayResult};
use tokio::time::Instant;
use tracing::{debug, info};

/// Wait for the `auth` frame and build the request from it.
///
/// `resize` and unknown frames are skipped without extending the deadline.
/// With no frame before the deadline the default identity is used, if allowed.
pub async fn negotiate<T>(transport: &mut T, config: &HandshakeConfig) -> GatewayResult<AuthRequest>
where
    T: TerminalTransport + ?Sized,
{
    let deadline = Instant::now() + config.timeout;

    loop {
        let text = match tokio::time::timeout_at(deadline, transport.recv()).await {
            Err(_) => return default_identity(config),
            Ok(None) => return Err(GatewayError::ClientDisconnect),
            Ok(Some(message)) => message?,
        };

        match ClientFrame::parse(&text)? {
            ClientFrame::Auth(frame) => {
                if frame.host.trim().is_empty() {
                    return Err(GatewayError::Protocol("auth frame has an empty host".into()));
                }
                if frame.username.trim().is_empty() {
                    return Err(GatewayError::Protocol(
                        "auth frame has an empty username".into(),
                    ));
                }
                return Ok(AuthRequest::from_frame(frame));
            }
            ClientFrame::Input { .. } => {
                return Err(GatewayError::Protocol("input received before auth".into()));
            }
            other @ (ClientFrame::Resize { .. } | ClientFrame::Unknown) => {
                debug!(frame = other.kind(), "ignoring frame before auth");
            }
        }
    }
}

fn default_identity(config: &HandshakeConfig) -> GatewayResult<AuthRequest> {
    if !config.allow_default_identity {
        return Err(GatewayError::Timeout(format!(
            "no auth frame within {}ms",
            config.timeout.as_millis()
        )));
    }

    let username = config
        .default_username
        .clone()
        .unwrap_or_else(whoami::username);
    let auth = AuthRequest::default_identity(config.default_host.clone(), config.default_port, username);
    info!(
        target_host = %auth.target(),
        timeout_ms = config.timeout.as_millis() as u64,
        "no auth frame received, falling back to default identity"
    );
    Ok(auth)
}

/// Run the full handshake: negotiate, then connect the adapter.
///
/// On success the session is `ACTIVE`. Rejected credentials leave it in
/// `AUTH_FAILED`; the caller reports every failure to the client.
pub async fn perform<T>(
    transport: &mut T,
    adapter: &mut dyn ShellAdapter,
    session: &SessionGuard,
    config: &HandshakeConfig,
) -> GatewayResult<()>
where
    T: TerminalTransport + ?Sized,
{
    let auth = negotiate(transport, config).await?;
    let target = auth.target();
    session.set_target(target.clone());
    session.transition(SessionState::Authenticating);
    debug!(target_host = %target, "authenticating");

    match adapter.connect(auth).await {
        Ok(()) => {
            session.transition(SessionState::Active);
            info!(target_host = %target, "shell session established");
            Ok(())
        }
        Err(e @ GatewayError::AuthFailed(_)) => {
            session.transition(SessionState::AuthFailed);
            Err(e)
        }
        Err(e) => Err(e),
    }
}
