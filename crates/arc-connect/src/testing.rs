//! In-memory transport and adapter used by unit tests.

use crate::ssh::{AuthRequest, ChannelRead, ShellAdapter};
use crate::transport::TerminalTransport;
use arc_core::{GatewayError, GatewayResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

enum Incoming {
    Text(String),
    InvalidBinary,
    Close,
}

#[derive(Default)]
struct Outgoing {
    sent: Vec<String>,
    closed: bool,
}

pub struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    outgoing: Arc<Mutex<Outgoing>>,
    peer_gone: bool,
}

/// The test's end of a [`FakeTransport`].
pub struct FakeClient {
    tx: mpsc::UnboundedSender<Incoming>,
    outgoing: Arc<Mutex<Outgoing>>,
}

pub fn fake_transport() -> (FakeTransport, FakeClient) {
    let (tx, rx) = mpsc::unbounded_channel();
    let outgoing = Arc::new(Mutex::new(Outgoing::default()));
    (
        FakeTransport {
            incoming: rx,
            outgoing: Arc::clone(&outgoing),
            peer_gone: false,
        },
        FakeClient { tx, outgoing },
    )
}

impl FakeClient {
    pub fn send(&self, text: &str) {
        let _ = self.tx.send(Incoming::Text(text.to_string()));
    }

    pub fn send_invalid_binary(&self) {
        let _ = self.tx.send(Incoming::InvalidBinary);
    }

    pub fn close(&self) {
        let _ = self.tx.send(Incoming::Close);
    }

    /// Everything the server sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.outgoing.lock().sent.clone()
    }

    /// Whether the server closed its side.
    pub fn server_closed(&self) -> bool {
        self.outgoing.lock().closed
    }
}

#[async_trait]
impl TerminalTransport for FakeTransport {
    async fn recv(&mut self) -> Option<GatewayResult<String>> {
        if self.peer_gone {
            return None;
        }
        match self.incoming.recv().await {
            Some(Incoming::Text(text)) => Some(Ok(text)),
            Some(Incoming::InvalidBinary) => Some(Err(GatewayError::Protocol(
                "binary frame is not valid UTF-8".into(),
            ))),
            Some(Incoming::Close) | None => {
                self.peer_gone = true;
                None
            }
        }
    }

    async fn send_text(&mut self, text: String) -> GatewayResult<()> {
        if self.peer_gone {
            return Err(GatewayError::ClientDisconnect);
        }
        self.outgoing.lock().sent.push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.outgoing.lock().closed = true;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConnectBehavior {
    Accept,
    RejectAuth,
    Unreachable,
}

/// What a [`ScriptedAdapter`] observed, plus output waiting to be read.
#[derive(Default)]
pub struct AdapterLog {
    pub connects: Vec<String>,
    pub sent: Vec<u8>,
    pub resizes: Vec<(u16, u16)>,
    pub closes: usize,
    pub output: VecDeque<GatewayResult<ChannelRead>>,
    /// Echo sent bytes back as output.
    pub echo: bool,
}

pub struct ScriptedAdapter {
    behavior: ConnectBehavior,
    connected: bool,
    log: Arc<Mutex<AdapterLog>>,
}

impl ScriptedAdapter {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            connected: false,
            log: Arc::new(Mutex::new(AdapterLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<AdapterLog>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl ShellAdapter for ScriptedAdapter {
    async fn connect(&mut self, auth: AuthRequest) -> GatewayResult<()> {
        self.log.lock().connects.push(auth.target());
        match self.behavior {
            ConnectBehavior::Accept => {
                self.connected = true;
                Ok(())
            }
            ConnectBehavior::RejectAuth => Err(GatewayError::AuthFailed("rejected".into())),
            ConnectBehavior::Unreachable => {
                Err(GatewayError::ConnectFailed("connection refused".into()))
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> GatewayResult<()> {
        let mut log = self.log.lock();
        log.sent.extend_from_slice(data);
        if log.echo {
            log.output.push_back(Ok(ChannelRead::Data(data.to_vec())));
        }
        Ok(())
    }

    fn receive_non_blocking(&mut self) -> GatewayResult<ChannelRead> {
        self.log
            .lock()
            .output
            .pop_front()
            .unwrap_or(Ok(ChannelRead::Empty))
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> GatewayResult<()> {
        if self.connected {
            self.log.lock().resizes.push((cols, rows));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
        self.log.lock().closes += 1;
    }
}
