//! arc-connect: browser terminal sessions over WebSocket, backed by SSH.
//!
//! A client upgrades to a WebSocket, sends one `auth` frame naming the target
//! host, and is then bridged to an interactive PTY shell on that host. Small
//! JSON routes expose system metrics and the live session list.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod metrics;
pub mod server;
pub mod session;
pub mod ssh;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConfigOverrides, ServerConfig};
pub use server::GatewayServer;
