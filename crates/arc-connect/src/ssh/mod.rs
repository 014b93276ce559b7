//! SSH side of a session: the adapter contract and its russh implementation.

mod adapter;
mod client;
mod error;
mod host_key;
mod known_hosts;
#[cfg(test)]
mod test_server;

pub use adapter::{AdapterFactory, AuthRequest, ChannelRead, ShellAdapter};
pub use client::{RusshAdapter, RusshAdapterFactory};
pub use error::SshError;
pub use host_key::{HostKeyDecision, HostKeyPolicy};
pub use known_hosts::{fingerprint, HostStatus, KnownHosts};
