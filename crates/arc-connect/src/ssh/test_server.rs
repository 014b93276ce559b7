//! Loopback russh server with a scripted shell, for driving [`super::RusshAdapter`].
//!
//! The shell echoes input back, answers `err\n` on stderr, and exits on `exit\n`.

use parking_lot::Mutex;
use russh::keys::{Algorithm, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet, Pty};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USER: &str = "pi";
pub const PASSWORD: &str = "raspberry";
pub const PROMPT: &str = "pi@arc:~$ ";

#[derive(Debug, Default)]
pub struct ServerLog {
    pub password_attempts: usize,
    pub pty: Option<(String, u32, u32)>,
    pub window_changes: Vec<(u32, u32)>,
    pub received: Vec<u8>,
}

pub struct EchoSshServer {
    pub port: u16,
    pub host_key: PublicKey,
    pub log: Arc<Mutex<ServerLog>>,
    task: JoinHandle<()>,
}

impl EchoSshServer {
    pub async fn start() -> Self {
        let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).unwrap();
        let host_key = key.public_key().clone();
        let config = Arc::new(server::Config {
            keys: vec![key],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(ServerLog::default()));

        let accept_log = Arc::clone(&log);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = EchoHandler {
                    log: Arc::clone(&accept_log),
                };
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, stream, handler).await {
                        let _ = session.await;
                    }
                });
            }
        });

        Self {
            port,
            host_key,
            log,
            task,
        }
    }
}

impl Drop for EchoSshServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct EchoHandler {
    log: Arc<Mutex<ServerLog>>,
}

fn password_only() -> Auth {
    Auth::Reject {
        proceed_with_methods: Some(MethodSet::from([MethodKind::Password].as_slice())),
        partial_success: false,
    }
}

impl server::Handler for EchoHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(password_only())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.log.lock().password_attempts += 1;
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(password_only())
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.log.lock().pty = Some((term.to_string(), col_width, row_height));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.data(channel, CryptoVec::from_slice(PROMPT.as_bytes()));
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.log.lock().window_changes.push((col_width, row_height));
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.log.lock().received.extend_from_slice(data);
        match data {
            b"exit\n" => {
                let _ = session.exit_status_request(channel, 0);
                let _ = session.eof(channel);
                let _ = session.close(channel);
            }
            b"err\n" => {
                let _ = session.extended_data(channel, 1, CryptoVec::from_slice(b"oops"));
            }
            _ => {
                let _ = session.data(channel, CryptoVec::from_slice(data));
            }
        }
        Ok(())
    }
}
