//! WebSocket transport on top of axum's upgraded socket.
//!
//! Pings are answered by the underlying WebSocket implementation and never
//! surface here.

use super::TerminalTransport;
use arc_core::{GatewayError, GatewayResult};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use std::net::SocketAddr;
use tracing::debug;

pub struct WsTransport {
    socket: WebSocket,
    remote_addr: SocketAddr,
    closed: bool,
}

impl WsTransport {
    pub fn new(socket: WebSocket, remote_addr: SocketAddr) -> Self {
        Self {
            socket,
            remote_addr,
            closed: false,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

#[async_trait]
impl TerminalTransport for WsTransport {
    async fn recv(&mut self) -> Option<GatewayResult<String>> {
        if self.closed {
            return None;
        }
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(String::from_utf8(bytes).map_err(|_| {
                        GatewayError::Protocol("binary frame is not valid UTF-8".into())
                    }));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(remote = %self.remote_addr, ?frame, "client sent close");
                    self.closed = true;
                    return None;
                }
                Some(Err(e)) => {
                    debug!(remote = %self.remote_addr, "websocket read error: {e}");
                    self.closed = true;
                    return None;
                }
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> GatewayResult<()> {
        if self.closed {
            return Err(GatewayError::ClientDisconnect);
        }
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            debug!(remote = %self.remote_addr, "websocket close: {e}");
        }
    }
}
