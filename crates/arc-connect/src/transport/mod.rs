//! Client-facing transports carrying terminal frames.

mod websocket;

pub use websocket::WsTransport;

use arc_core::{GatewayResult, OutputMode, ServerFrame};
use async_trait::async_trait;

/// A message-oriented connection to one terminal client.
///
/// `recv` must be cancel-safe: the bridge races it against its poll tick.
#[async_trait]
pub trait TerminalTransport: Send {
    /// Next text message. `None` once the peer has closed or vanished.
    ///
    /// A message that is not valid UTF-8 yields a protocol error.
    async fn recv(&mut self) -> Option<GatewayResult<String>>;

    async fn send_text(&mut self, text: String) -> GatewayResult<()>;

    async fn send_frame(&mut self, frame: &ServerFrame, mode: OutputMode) -> GatewayResult<()> {
        let text = frame.encode(mode)?;
        self.send_text(text).await
    }

    /// Close the connection. Idempotent, never fails.
    async fn close(&mut self);
}
