//! arc-connect: ARC Connect gateway.
//!
//! Serves browser terminals over WebSocket, each bridged to an SSH shell,
//! plus the metrics routes used by the mobile dashboard.

use arc_connect::ssh::HostKeyPolicy;
use arc_connect::{ConfigOverrides, GatewayServer, ServerConfig};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// arc-connect: ARC Connect terminal gateway
#[derive(Parser, Debug)]
#[command(name = "arc-connect", version, about = "ARC Connect terminal gateway")]
struct Cli {
    /// Listen address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.arc/connect.toml")]
    config: String,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// How long to wait for the auth frame, in milliseconds
    #[arg(long)]
    handshake_timeout_ms: Option<u64>,

    /// Bridge poll tick, in milliseconds
    #[arg(long)]
    poll_tick_ms: Option<u64>,

    /// Host key policy (strict, trust-on-first-use, accept-all)
    #[arg(long)]
    host_key_policy: Option<HostKeyPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting arc-connect");

    let overrides = ConfigOverrides {
        bind: cli.bind,
        port: cli.port,
        max_sessions: cli.max_sessions,
        handshake_timeout_ms: cli.handshake_timeout_ms,
        poll_tick_ms: cli.poll_tick_ms,
        host_key_policy: cli.host_key_policy,
    };
    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if config.ssh.host_key_policy == HostKeyPolicy::AcceptAll {
        warn!("host key verification disabled (accept-all)");
    }

    let server = GatewayServer::new(config);
    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("arc-connect stopped");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    info!("received shutdown signal");
}
