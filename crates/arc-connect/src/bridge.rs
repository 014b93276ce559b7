//! Bridge loop: relays bytes between a terminal transport and a shell adapter.
//!
//! Each iteration waits at most one poll tick for a client frame, then drains
//! whatever shell output is ready, then sleeps briefly if nothing moved. The
//! loop runs in the session's own task and is the only user of its adapter.

use crate::config::BridgeConfig;
use crate::session::SessionGuard;
use crate::ssh::{ChannelRead, ShellAdapter};
use crate::transport::TerminalTransport;
use arc_core::{ClientFrame, ErrorCode, GatewayResult, ServerFrame, Utf8Decoder};
use tracing::debug;

/// Upper bound on output chunks forwarded per tick, so input is never starved.
const MAX_CHUNKS_PER_TICK: usize = 64;

/// Why a bridge stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    ClientClosed,
    RemoteClosed,
    IdleTimeout,
    Shutdown,
}

impl BridgeExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeExit::ClientClosed => "client closed",
            BridgeExit::RemoteClosed => "remote closed",
            BridgeExit::IdleTimeout => "idle timeout",
            BridgeExit::Shutdown => "server shutdown",
        }
    }

    /// Error frame owed to the client, if any.
    pub fn notice(&self) -> Option<ServerFrame> {
        match self {
            BridgeExit::IdleTimeout => Some(ServerFrame::error(
                ErrorCode::Timeout,
                "session closed after inactivity",
            )),
            BridgeExit::Shutdown => Some(ServerFrame::error(
                ErrorCode::Shutdown,
                "server is shutting down",
            )),
            BridgeExit::ClientClosed | BridgeExit::RemoteClosed => None,
        }
    }
}

/// Relay until either side closes, the session idles out, or shutdown.
///
/// Channel failures and transport write failures end the loop with an error.
pub async fn run<T>(
    transport: &mut T,
    adapter: &mut dyn ShellAdapter,
    session: &SessionGuard,
    config: &BridgeConfig,
) -> GatewayResult<BridgeExit>
where
    T: TerminalTransport + ?Sized,
{
    let cancel = session.cancelled().clone();
    let mut decoder = Utf8Decoder::new();

    loop {
        let mut moved = false;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(BridgeExit::Shutdown),
            next = tokio::time::timeout(config.poll_tick, transport.recv()) => match next {
                Err(_) => {}
                Ok(None) => return Ok(BridgeExit::ClientClosed),
                Ok(Some(Err(e))) => debug!("ignoring unreadable frame: {e}"),
                Ok(Some(Ok(text))) => {
                    moved = handle_client_frame(&text, adapter, session).await?;
                }
            },
        }

        for _ in 0..MAX_CHUNKS_PER_TICK {
            match adapter.receive_non_blocking()? {
                ChannelRead::Data(bytes) => {
                    moved = true;
                    session.touch();
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        transport
                            .send_frame(&ServerFrame::Output { data: text }, config.output_mode)
                            .await?;
                    }
                }
                ChannelRead::Empty => break,
                ChannelRead::Eof => {
                    let rest = decoder.finish();
                    if !rest.is_empty() {
                        transport
                            .send_frame(&ServerFrame::Output { data: rest }, config.output_mode)
                            .await?;
                    }
                    return Ok(BridgeExit::RemoteClosed);
                }
            }
        }

        if !moved {
            if let Some(limit) = config.idle_timeout {
                if session.idle_for() >= limit {
                    return Ok(BridgeExit::IdleTimeout);
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(BridgeExit::Shutdown),
                _ = tokio::time::sleep(config.idle_sleep) => {}
            }
        }
    }
}

/// Apply one client frame. Returns whether bytes were sent to the shell.
async fn handle_client_frame(
    text: &str,
    adapter: &mut dyn ShellAdapter,
    session: &SessionGuard,
) -> GatewayResult<bool> {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("ignoring unparsable frame: {e}");
            return Ok(false);
        }
    };

    match frame {
        ClientFrame::Input { data } => {
            if data.is_empty() {
                return Ok(false);
            }
            adapter.send(data.as_bytes()).await?;
            session.touch();
            Ok(true)
        }
        ClientFrame::Resize { cols, rows } => {
            if cols == 0 || rows == 0 {
                debug!(cols, rows, "ignoring zero-sized resize");
            } else {
                adapter.resize(cols, rows).await?;
            }
            Ok(false)
        }
        other => {
            debug!(frame = other.kind(), "ignoring frame during bridge");
            Ok(false)
        }
    }
}
