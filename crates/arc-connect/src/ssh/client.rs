//! russh-backed [`ShellAdapter`].
//!
//! russh is fully async while the bridge polls the adapter, so the shell
//! channel lives in a dedicated worker task. Commands reach the worker through
//! a bounded queue and output comes back through another; the adapter itself
//! only touches the queue ends.
//!
//! The browser side gets no backpressure from the SSH channel. A stalled
//! remote fills the outbound queue, and once a send has waited
//! `write_timeout` the session fails with a channel error.

use super::adapter::{AdapterFactory, AuthRequest, ChannelRead, ShellAdapter};
use super::error::SshError;
use super::host_key::{HostKeyDecision, HostKeyPolicy};
use super::known_hosts::{fingerprint, HostStatus, KnownHosts};
use crate::config::SshConfig;
use arc_core::{GatewayError, GatewayResult};
use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg, Disconnect};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `close` waits for the worker to flush EOF/close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// russh callbacks. Only host key verification matters here.
pub struct GatewayHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHosts>,
}

impl client::Handler for GatewayHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fp = fingerprint(server_public_key);
        let status = if self.policy.uses_store() {
            self.known_hosts.verify(&self.host, self.port, &fp)?
        } else {
            HostStatus::Unknown
        };

        match self.policy.decide(&status) {
            HostKeyDecision::Accept => {
                debug!(host = %self.host, port = self.port, fingerprint = %fp, "host key accepted");
                Ok(true)
            }
            HostKeyDecision::Record => {
                info!(host = %self.host, port = self.port, fingerprint = %fp, "recording new host key");
                if let Err(e) = self.known_hosts.add(&self.host, self.port, &fp) {
                    warn!(path = %self.known_hosts.path().display(), "failed to save host key: {e}");
                }
                Ok(true)
            }
            HostKeyDecision::Reject(reason) => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    fingerprint = %fp,
                    policy = %self.policy,
                    "host key rejected: {reason}"
                );
                Err(SshError::HostKeyRejected {
                    host: format!("{}:{}", self.host, self.port),
                    reason,
                })
            }
        }
    }
}

enum WorkerCommand {
    Data(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    Close,
}

enum WorkerEvent {
    Data(Vec<u8>),
    Eof,
    Failed(String),
}

struct WorkerLink {
    commands: mpsc::Sender<WorkerCommand>,
    events: mpsc::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

/// One SSH connection with one PTY shell channel.
pub struct RusshAdapter {
    config: Arc<SshConfig>,
    known_hosts: Arc<KnownHosts>,
    handle: Option<client::Handle<GatewayHandler>>,
    worker: Option<WorkerLink>,
    closed: bool,
}

impl RusshAdapter {
    pub fn new(config: Arc<SshConfig>, known_hosts: Arc<KnownHosts>) -> Self {
        Self {
            config,
            known_hosts,
            handle: None,
            worker: None,
            closed: false,
        }
    }

    fn worker(&mut self) -> GatewayResult<&mut WorkerLink> {
        self.worker
            .as_mut()
            .ok_or_else(|| GatewayError::Channel("shell channel is not open".into()))
    }
}

#[async_trait]
impl ShellAdapter for RusshAdapter {
    async fn connect(&mut self, auth: AuthRequest) -> GatewayResult<()> {
        if self.closed || self.handle.is_some() {
            return Err(GatewayError::Channel("adapter already used".into()));
        }

        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        });
        let handler = GatewayHandler {
            host: auth.host.clone(),
            port: auth.port,
            policy: self.config.host_key_policy,
            known_hosts: Arc::clone(&self.known_hosts),
        };

        debug!(target_host = %auth.target(), "opening ssh connection");
        let mut handle = tokio::time::timeout(
            self.config.connect_timeout,
            client::connect(ssh_config, (auth.host.as_str(), auth.port), handler),
        )
        .await
        .map_err(|_| {
            GatewayError::ConnectFailed(format!(
                "timed out after {}s connecting to {}:{}",
                self.config.connect_timeout.as_secs(),
                auth.host,
                auth.port
            ))
        })??;

        match authenticate(&mut handle, &auth, self.config.identity_file.as_deref()).await {
            Ok(true) => {}
            Ok(false) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(GatewayError::AuthFailed(format!(
                    "credentials rejected for {}",
                    auth.target()
                )));
            }
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(e.into());
            }
        }
        drop(auth);

        let channel = handle
            .channel_open_session()
            .await
            .map_err(SshError::from)?;
        // From here on `close` can tear the connection down.
        self.handle = Some(handle);

        channel
            .request_pty(
                false,
                &self.config.term,
                u32::from(self.config.cols),
                u32::from(self.config.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| GatewayError::ConnectFailed(format!("pty request failed: {e}")))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| GatewayError::ConnectFailed(format!("shell request failed: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.outbound_queue_frames);
        let (event_tx, event_rx) = mpsc::channel(self.config.output_queue_frames);
        let task = tokio::spawn(run_channel_worker(channel, cmd_rx, event_tx));
        self.worker = Some(WorkerLink {
            commands: cmd_tx,
            events: event_rx,
            task,
        });

        Ok(())
    }

    /// Input sent after the worker has stopped is dropped; the next
    /// `receive_non_blocking` reports why it stopped.
    async fn send(&mut self, data: &[u8]) -> GatewayResult<()> {
        let write_timeout = self.config.write_timeout;
        let worker = self.worker()?;
        match worker
            .commands
            .send_timeout(WorkerCommand::Data(data.to_vec()), write_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(GatewayError::Channel(format!(
                "remote not draining input (waited {}ms)",
                write_timeout.as_millis()
            ))),
            Err(SendTimeoutError::Closed(_)) => {
                debug!(bytes = data.len(), "shell already gone, dropping input");
                Ok(())
            }
        }
    }

    fn receive_non_blocking(&mut self) -> GatewayResult<ChannelRead> {
        let worker = self.worker()?;
        match worker.events.try_recv() {
            Ok(WorkerEvent::Data(bytes)) => Ok(ChannelRead::Data(bytes)),
            Ok(WorkerEvent::Eof) => Ok(ChannelRead::Eof),
            Ok(WorkerEvent::Failed(message)) => Err(GatewayError::Channel(message)),
            Err(TryRecvError::Empty) => Ok(ChannelRead::Empty),
            Err(TryRecvError::Disconnected) => Ok(ChannelRead::Eof),
        }
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> GatewayResult<()> {
        let write_timeout = self.config.write_timeout;
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        match worker
            .commands
            .send_timeout(WorkerCommand::Resize { cols, rows }, write_timeout)
            .await
        {
            Ok(()) | Err(SendTimeoutError::Closed(_)) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                Err(GatewayError::Channel("resize could not be queued".into()))
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(WorkerLink {
            commands,
            events,
            mut task,
        }) = self.worker.take()
        {
            // Unblocks a worker stuck on a full output queue.
            drop(events);
            let _ = commands.try_send(WorkerCommand::Close);
            drop(commands);
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("channel worker did not stop in time, aborting");
                task.abort();
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("ssh disconnect: {e}");
            }
        }
    }
}

impl Drop for RusshAdapter {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.task.abort();
        }
    }
}

/// Password if one was given; otherwise `none`, then the identity file.
async fn authenticate(
    handle: &mut client::Handle<GatewayHandler>,
    auth: &AuthRequest,
    identity_file: Option<&Path>,
) -> Result<bool, SshError> {
    let user = auth.username.as_str();

    if let Some(password) = &auth.password {
        let result = handle.authenticate_password(user, password.as_str()).await?;
        return Ok(result.success());
    }

    if handle.authenticate_none(user).await?.success() {
        return Ok(true);
    }

    if let Some(path) = identity_file {
        let key = russh::keys::load_secret_key(path, None)?;
        let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        let result = handle.authenticate_publickey(user, key).await?;
        return Ok(result.success());
    }

    Ok(false)
}

/// Owns the channel until the bridge closes it or the remote ends it.
async fn run_channel_worker(
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(WorkerCommand::Data(bytes)) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        let _ = events.send(WorkerEvent::Failed(format!("write failed: {e}"))).await;
                        break;
                    }
                }
                Some(WorkerCommand::Resize { cols, rows }) => {
                    if let Err(e) = channel
                        .window_change(u32::from(cols), u32::from(rows), 0, 0)
                        .await
                    {
                        debug!("window change failed: {e}");
                    }
                }
                Some(WorkerCommand::Close) | None => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if events.send(WorkerEvent::Data(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                // stderr shares the terminal
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    if events.send(WorkerEvent::Data(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    let _ = events.send(WorkerEvent::Eof).await;
                    break;
                }
                Some(_) => {}
            },
        }
    }
    debug!("channel worker stopped");
}

/// Builds one [`RusshAdapter`] per session, sharing config and the host key store.
pub struct RusshAdapterFactory {
    config: Arc<SshConfig>,
    known_hosts: Arc<KnownHosts>,
}

impl RusshAdapterFactory {
    pub fn new(config: SshConfig) -> Self {
        let known_hosts = Arc::new(KnownHosts::new(config.known_hosts.clone()));
        Self {
            config: Arc::new(config),
            known_hosts,
        }
    }
}

impl AdapterFactory for RusshAdapterFactory {
    fn create(&self) -> Box<dyn ShellAdapter> {
        Box::new(RusshAdapter::new(
            Arc::clone(&self.config),
            Arc::clone(&self.known_hosts),
        ))
    }
}
