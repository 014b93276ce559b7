//! HTTP listener: WebSocket terminal endpoint plus the JSON side routes.

use crate::config::ServerConfig;
use crate::connection;
use crate::metrics::MetricsCollector;
use crate::session::{SessionInfo, SessionRegistry};
use crate::ssh::{AdapterFactory, RusshAdapterFactory};
use crate::transport::WsTransport;
use arc_core::{GatewayError, GatewayResult, MetricsSnapshot, SystemInfo};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

#[derive(Clone)]
struct AppState {
    config: Arc<ServerConfig>,
    registry: SessionRegistry,
    adapters: Arc<dyn AdapterFactory>,
    metrics: MetricsCollector,
}

/// The gateway: owns the session registry and the adapter factory.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Server backed by real SSH connections.
    pub fn new(config: ServerConfig) -> Self {
        let adapters = Arc::new(RusshAdapterFactory::new(config.ssh.clone()));
        Self::with_adapters(config, adapters)
    }

    /// Server with a custom adapter factory.
    pub fn with_adapters(config: ServerConfig, adapters: Arc<dyn AdapterFactory>) -> Self {
        let registry = SessionRegistry::new(config.max_sessions);
        let metrics = MetricsCollector::new(&config.metrics);
        Self {
            state: AppState {
                config: Arc::new(config),
                registry,
                adapters,
                metrics,
            },
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.state.registry
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route(&self.state.config.ws_path, get(terminal))
            .route("/metrics", get(metrics))
            .route("/system/info", get(system_info))
            .route("/health", get(health))
            .route("/sessions", get(sessions))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn bind(&self) -> GatewayResult<TcpListener> {
        let addr = self.state.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Transport(format!("bind {addr} failed: {e}")))
    }

    /// Serve on `listener` until `shutdown` resolves, then cancel every session
    /// and wait up to `shutdown_timeout` for them to close.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let registry = self.state.registry.clone();
        let shutdown_timeout = self.state.config.shutdown_timeout;
        let app = self.router();

        info!(
            addr = %local_addr,
            ws_path = %self.state.config.ws_path,
            max_sessions = self.state.config.max_sessions,
            host_key_policy = %self.state.config.ssh.host_key_policy,
            "ARC Connect listening"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown({
            let registry = registry.clone();
            async move {
                shutdown.await;
                registry.shutdown_all();
            }
        })
        .await
        .map_err(|e| GatewayError::Transport(format!("server error: {e}")))?;

        info!("listener stopped");

        // axum stops tracking a connection once it is upgraded.
        registry.drain(shutdown_timeout).await;
        Ok(())
    }

    pub async fn run<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

async fn terminal(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    debug!(%remote, "websocket upgrade");
    ws.on_upgrade(move |socket| async move {
        let transport = WsTransport::new(socket, remote);
        connection::serve(
            transport,
            remote,
            &state.config,
            &state.registry,
            state.adapters.as_ref(),
        )
        .await;
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}

async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(state.metrics.system_info().await)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct SessionList {
    count: usize,
    max_sessions: usize,
    sessions: Vec<SessionInfo>,
}

async fn sessions(State(state): State<AppState>) -> Json<SessionList> {
    let sessions = state.registry.list();
    Json(SessionList {
        count: sessions.len(),
        max_sessions: state.registry.max_sessions(),
        sessions,
    })
}

async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "arc-connect",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "terminal": state.config.ws_path,
            "metrics": "/metrics",
            "system": "/system/info",
            "health": "/health",
            "sessions": "/sessions",
        }
    }))
}
