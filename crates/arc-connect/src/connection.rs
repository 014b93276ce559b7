//! One client connection from accept to cleanup.

use crate::bridge::{self, BridgeExit};
use crate::config::ServerConfig;
use crate::handshake;
use crate::session::{SessionGuard, SessionRegistry, SessionState};
use crate::ssh::{AdapterFactory, ShellAdapter};
use crate::transport::TerminalTransport;
use arc_core::{GatewayError, GatewayResult, ServerFrame};
use std::net::SocketAddr;
use tracing::{debug, info, info_span, warn, Instrument};

/// Serve a freshly upgraded connection until it ends.
///
/// Never fails: every outcome is reported to the client (when it is still
/// there) and logged. The adapter and transport are always closed and the
/// registry entry is always removed.
pub async fn serve<T>(
    mut transport: T,
    remote: SocketAddr,
    config: &ServerConfig,
    registry: &SessionRegistry,
    adapters: &dyn AdapterFactory,
) where
    T: TerminalTransport,
{
    let mode = config.bridge.output_mode;

    let session = match registry.reserve(remote) {
        Ok(session) => session,
        Err(e) => {
            warn!(%remote, "rejecting connection: {e}");
            let frame = ServerFrame::error(e.code(), e.to_string());
            if let Err(e) = transport.send_frame(&frame, mode).await {
                debug!(%remote, "could not deliver rejection: {e}");
            }
            transport.close().await;
            return;
        }
    };

    let span = info_span!("session", id = %session.id(), %remote);
    async move {
        info!("session opened");
        let mut adapter = adapters.create();

        let result = run(&mut transport, adapter.as_mut(), &session, config).await;
        report(&mut transport, &result, config).await;

        if session.state().is_some_and(|s| !s.is_terminal()) {
            session.transition(SessionState::Closing);
        }
        adapter.close().await;
        transport.close().await;
        if session.state() == Some(SessionState::Closing) {
            session.transition(SessionState::Closed);
        }
        info!("session closed");
    }
    .instrument(span)
    .await
}

async fn run<T>(
    transport: &mut T,
    adapter: &mut dyn ShellAdapter,
    session: &SessionGuard,
    config: &ServerConfig,
) -> GatewayResult<BridgeExit>
where
    T: TerminalTransport,
{
    let cancel = session.cancelled().clone();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(BridgeExit::Shutdown),
        result = handshake::perform(transport, adapter, session, &config.handshake) => result?,
    }

    transport
        .send_frame(&ServerFrame::AuthSuccess, config.bridge.output_mode)
        .await?;

    bridge::run(transport, adapter, session, &config.bridge).await
}

/// Tell the client how the session ended.
async fn report<T>(transport: &mut T, result: &GatewayResult<BridgeExit>, config: &ServerConfig)
where
    T: TerminalTransport,
{
    let frame = match result {
        Ok(exit) => {
            info!(reason = exit.as_str(), "session ended");
            exit.notice()
        }
        Err(e) if e.is_disconnect() => {
            debug!("client went away: {e}");
            None
        }
        Err(GatewayError::AuthFailed(reason)) => {
            warn!("authentication failed: {reason}");
            Some(ServerFrame::AuthFailure)
        }
        Err(e) => {
            warn!(code = %e.code(), "session failed: {e}");
            Some(ServerFrame::error(e.code(), e.to_string()))
        }
    };

    if let Some(frame) = frame {
        if let Err(e) = transport.send_frame(&frame, config.bridge.output_mode).await {
            debug!("could not deliver final frame: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_transport, ConnectBehavior, ScriptedAdapter};
    use arc_core::{ErrorCode, OutputMode};
    use std::time::Duration;

    struct OneShot(parking_lot::Mutex<Option<ScriptedAdapter>>);

    impl AdapterFactory for OneShot {
        fn create(&self) -> Box<dyn ShellAdapter> {
            let adapter = self.0.lock().take().expect("adapter already taken");
            Box::new(adapter)
        }
    }

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.handshake.timeout = Duration::from_millis(200);
        config.handshake.default_username = Some("arc".into());
        config.bridge.poll_tick = Duration::from_millis(10);
        config.bridge.idle_sleep = Duration::from_millis(5);
        config
    }

    fn remote() -> SocketAddr {
        "10.0.0.7:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn successful_session_lifecycle() {
        let registry = SessionRegistry::new(2);
        let adapter = ScriptedAdapter::new(ConnectBehavior::Accept);
        let log = adapter.log();
        log.lock().echo = true;
        let factory = OneShot(parking_lot::Mutex::new(Some(adapter)));

        let (transport, client) = fake_transport();
        client.send(r#"{"type":"auth","host":"localhost","username":"pi","password":"pw"}"#);
        client.send(r#"{"type":"input","data":"hi"}"#);

        let config = test_config();
        let task = serve(transport, remote(), &config, &registry, &factory);
        let closer = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.close();
        };
        tokio::join!(task, closer);

        assert_eq!(client.sent()[0], r#"{"type":"auth-success"}"#);
        assert_eq!(client.sent()[1], "hi");
        assert!(client.server_closed());
        assert_eq!(log.lock().closes, 1);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn auth_failure_sends_single_frame() {
        let registry = SessionRegistry::new(2);
        let factory = OneShot(parking_lot::Mutex::new(Some(ScriptedAdapter::new(
            ConnectBehavior::RejectAuth,
        ))));
        let (transport, client) = fake_transport();
        client.send(r#"{"type":"auth","host":"localhost","username":"pi","password":"nope"}"#);
        client.send(r#"{"type":"input","data":"should never arrive"}"#);

        serve(transport, remote(), &test_config(), &registry, &factory).await;

        assert_eq!(client.sent(), vec![r#"{"type":"auth-failure"}"#.to_string()]);
        assert!(client.server_closed());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let registry = SessionRegistry::new(2);
        let adapter = ScriptedAdapter::new(ConnectBehavior::Unreachable);
        let log = adapter.log();
        let factory = OneShot(parking_lot::Mutex::new(Some(adapter)));
        let (transport, client) = fake_transport();
        client.send(r#"{"type":"auth","host":"nowhere","username":"pi"}"#);

        serve(transport, remote(), &test_config(), &registry, &factory).await;

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#""code":"CONNECT""#), "{}", sent[0]);
        assert_eq!(log.lock().closes, 1);
    }

    #[tokio::test]
    async fn protocol_error_never_connects() {
        let registry = SessionRegistry::new(2);
        let adapter = ScriptedAdapter::new(ConnectBehavior::Accept);
        let log = adapter.log();
        let factory = OneShot(parking_lot::Mutex::new(Some(adapter)));
        let (transport, client) = fake_transport();
        client.send("{{{{");

        serve(transport, remote(), &test_config(), &registry, &factory).await;

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], ErrorCode::Protocol.as_str());
        assert!(log.lock().connects.is_empty());
    }

    #[tokio::test]
    async fn over_capacity_gets_error_frame() {
        let registry = SessionRegistry::new(1);
        let _held = registry.reserve(remote()).unwrap();
        let factory = OneShot(parking_lot::Mutex::new(None));
        let (transport, client) = fake_transport();

        serve(transport, remote(), &test_config(), &registry, &factory).await;

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#""code":"CAPACITY""#));
        assert!(client.server_closed());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn json_output_mode_applies_to_session() {
        let registry = SessionRegistry::new(1);
        let adapter = ScriptedAdapter::new(ConnectBehavior::Accept);
        adapter.log().lock().echo = true;
        let factory = OneShot(parking_lot::Mutex::new(Some(adapter)));
        let (transport, client) = fake_transport();
        client.send(r#"{"type":"auth","host":"localhost","username":"pi"}"#);
        client.send(r#"{"type":"input","data":"ok"}"#);

        let mut config = test_config();
        config.bridge.output_mode = OutputMode::Json;
        let closer = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.close();
        };
        tokio::join!(serve(transport, remote(), &config, &registry, &factory), closer);

        assert_eq!(client.sent()[1], r#"{"type":"output","data":"ok"}"#);
    }
}
