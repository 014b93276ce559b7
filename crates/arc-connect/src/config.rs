//! Server configuration: TOML file + CLI overrides.

use crate::ssh::HostKeyPolicy;
use arc_core::{GatewayError, GatewayResult, OutputMode};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Paths served by the HTTP side routes; the WebSocket path may not shadow them.
const RESERVED_PATHS: [&str; 5] = ["/", "/metrics", "/system/info", "/health", "/sessions"];

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub handshake: HandshakeSection,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// How long shutdown waits for live sessions to close.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_sessions: default_max_sessions(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// `[handshake]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeSection {
    #[serde(default = "default_handshake_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub allow_default_identity: bool,
    #[serde(default = "default_host")]
    pub default_host: String,
    #[serde(default = "default_ssh_port")]
    pub default_port: u16,
    #[serde(default)]
    pub default_username: Option<String>,
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_handshake_timeout_ms(),
            allow_default_identity: true,
            default_host: default_host(),
            default_port: default_ssh_port(),
            default_username: None,
        }
    }
}

/// `[bridge]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_poll_tick_ms")]
    pub poll_tick_ms: u64,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// 0 disables the idle timeout.
    #[serde(default)]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub output_mode: OutputMode,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            poll_tick_ms: default_poll_tick_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            idle_timeout_secs: 0,
            output_mode: OutputMode::default(),
        }
    }
}

/// `[ssh]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default = "default_known_hosts")]
    pub known_hosts: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_outbound_queue_frames")]
    pub outbound_queue_frames: usize,
    #[serde(default = "default_output_queue_frames")]
    pub output_queue_frames: usize,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::default(),
            known_hosts: default_known_hosts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            identity_file: None,
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            write_timeout_ms: default_write_timeout_ms(),
            outbound_queue_frames: default_outbound_queue_frames(),
            output_queue_frames: default_output_queue_frames(),
        }
    }
}

/// `[metrics]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_thermal_zone")]
    pub thermal_zone: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            thermal_zone: default_thermal_zone(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_ws_path() -> String {
    "/ws/ssh".to_string()
}
fn default_max_sessions() -> usize {
    10
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
fn default_handshake_timeout_ms() -> u64 {
    2_000
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_ssh_port() -> u16 {
    arc_core::DEFAULT_SSH_PORT
}
fn default_poll_tick_ms() -> u64 {
    100
}
fn default_idle_sleep_ms() -> u64 {
    50
}
fn default_known_hosts() -> String {
    "~/.arc/known_hosts".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_cols() -> u16 {
    120
}
fn default_rows() -> u16 {
    40
}
fn default_write_timeout_ms() -> u64 {
    500
}
fn default_outbound_queue_frames() -> usize {
    256
}
fn default_output_queue_frames() -> usize {
    1024
}
fn default_thermal_zone() -> String {
    "/sys/class/thermal/thermal_zone0/temp".to_string()
}
fn default_true() -> bool {
    true
}

/// CLI flags that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub max_sessions: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub poll_tick_ms: Option<u64>,
    pub host_key_policy: Option<HostKeyPolicy>,
}

/// Handshake stage settings.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub timeout: Duration,
    pub allow_default_identity: bool,
    pub default_host: String,
    pub default_port: u16,
    /// `None` means the user owning this process.
    pub default_username: Option<String>,
}

/// Bridge loop settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub poll_tick: Duration,
    pub idle_sleep: Duration,
    pub idle_timeout: Option<Duration>,
    pub output_mode: OutputMode,
}

/// SSH adapter settings.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts: PathBuf,
    pub connect_timeout: Duration,
    pub identity_file: Option<PathBuf>,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    pub write_timeout: Duration,
    pub outbound_queue_frames: usize,
    pub output_queue_frames: usize,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub thermal_zone: PathBuf,
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub ws_path: String,
    pub max_sessions: usize,
    pub shutdown_timeout: Duration,
    pub handshake: HandshakeConfig,
    pub bridge: BridgeConfig,
    pub ssh: SshConfig,
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let file = ConfigFile::default();
        let bind_ip = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self::assemble(file, &ConfigOverrides::default(), bind_ip)
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file means built-in defaults.
    pub fn load(config_path: Option<&Path>, overrides: &ConfigOverrides) -> GatewayResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                Self::parse(&content)?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Self::resolve(file_config, overrides)
    }

    /// Parse a TOML config document.
    pub fn parse(content: &str) -> GatewayResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| GatewayError::Config(format!("config parse error: {e}")))
    }

    /// Merge CLI overrides into a parsed file and validate the result.
    pub fn resolve(file: ConfigFile, overrides: &ConfigOverrides) -> GatewayResult<Self> {
        let bind_ip: IpAddr = match overrides.bind {
            Some(ip) => ip,
            None => file.server.bind.parse().map_err(|e| {
                GatewayError::Config(format!("invalid bind address {:?}: {e}", file.server.bind))
            })?,
        };
        let max_sessions = overrides.max_sessions.unwrap_or(file.server.max_sessions);
        let poll_tick_ms = overrides.poll_tick_ms.unwrap_or(file.bridge.poll_tick_ms);

        if max_sessions == 0 {
            return Err(GatewayError::Config("max_sessions must be at least 1".into()));
        }
        if poll_tick_ms == 0 {
            return Err(GatewayError::Config("poll_tick_ms must be at least 1".into()));
        }
        if file.ssh.cols == 0 || file.ssh.rows == 0 {
            return Err(GatewayError::Config("ssh cols/rows must be non-zero".into()));
        }
        if file.ssh.outbound_queue_frames == 0 || file.ssh.output_queue_frames == 0 {
            return Err(GatewayError::Config("ssh queue sizes must be non-zero".into()));
        }
        if !file.server.ws_path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "ws_path must start with '/': {}",
                file.server.ws_path
            )));
        }
        if RESERVED_PATHS.contains(&file.server.ws_path.as_str()) {
            return Err(GatewayError::Config(format!(
                "ws_path {} collides with a built-in route",
                file.server.ws_path
            )));
        }

        Ok(Self::assemble(file, overrides, bind_ip))
    }

    fn assemble(file: ConfigFile, overrides: &ConfigOverrides, bind_ip: IpAddr) -> Self {
        let port = overrides.port.unwrap_or(file.server.port);
        let max_sessions = overrides.max_sessions.unwrap_or(file.server.max_sessions);
        let handshake_timeout_ms = overrides
            .handshake_timeout_ms
            .unwrap_or(file.handshake.timeout_ms);
        let poll_tick_ms = overrides.poll_tick_ms.unwrap_or(file.bridge.poll_tick_ms);
        let host_key_policy = overrides
            .host_key_policy
            .unwrap_or(file.ssh.host_key_policy);

        Self {
            bind_addr: SocketAddr::new(bind_ip, port),
            ws_path: file.server.ws_path,
            max_sessions,
            shutdown_timeout: Duration::from_secs(file.server.shutdown_timeout_secs),
            handshake: HandshakeConfig {
                timeout: Duration::from_millis(handshake_timeout_ms),
                allow_default_identity: file.handshake.allow_default_identity,
                default_host: file.handshake.default_host,
                default_port: file.handshake.default_port,
                default_username: file.handshake.default_username,
            },
            bridge: BridgeConfig {
                poll_tick: Duration::from_millis(poll_tick_ms),
                idle_sleep: Duration::from_millis(file.bridge.idle_sleep_ms),
                idle_timeout: (file.bridge.idle_timeout_secs > 0)
                    .then(|| Duration::from_secs(file.bridge.idle_timeout_secs)),
                output_mode: file.bridge.output_mode,
            },
            ssh: SshConfig {
                host_key_policy,
                known_hosts: expand_tilde_str(&file.ssh.known_hosts),
                connect_timeout: Duration::from_secs(file.ssh.connect_timeout_secs),
                identity_file: file.ssh.identity_file.as_deref().map(expand_tilde_str),
                term: file.ssh.term,
                cols: file.ssh.cols,
                rows: file.ssh.rows,
                write_timeout: Duration::from_millis(file.ssh.write_timeout_ms),
                outbound_queue_frames: file.ssh.outbound_queue_frames,
                output_queue_frames: file.ssh.output_queue_frames,
            },
            metrics: MetricsConfig {
                thermal_zone: PathBuf::from(file.metrics.thermal_zone),
            },
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
