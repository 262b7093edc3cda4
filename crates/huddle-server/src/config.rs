//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - The first `huddle.toml` found in the search paths
//! - Environment variables (`HUDDLE__PORT`, `HUDDLE__AUTH__JWT_SECRET`, ...)

use ::config::{Environment, File, FileFormat};
use anyhow::{Context, Result};
use huddle_protocol::{RoomId, RoomKind, UserId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Credential verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Video room handed out by `/api/video/room`.
    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Rooms created at startup.
    #[serde(default = "default_rooms")]
    pub rooms: Vec<RoomConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound event size in bytes.
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,

    /// Largest history page a client may request.
    #[serde(default = "default_history_page_limit")]
    pub history_page_limit: usize,
}

/// JWT settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for HS256 tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Clock skew tolerated when checking expiry, in seconds.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_video_name")]
    pub name: String,

    #[serde(default = "default_video_url")]
    pub url: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A room seeded into the in-memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub kind: RoomKind,
    /// Users granted membership at startup.
    #[serde(default)]
    pub members: Vec<UserId>,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_event_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_history_page_limit() -> usize {
    100
}

fn default_jwt_secret() -> String {
    "huddle-dev-secret".to_string()
}

fn default_leeway() -> u64 {
    30
}

fn default_video_name() -> String {
    "chatapp-demo-room".to_string()
}

fn default_video_url() -> String {
    "https://chattyfy.daily.co/chatapp-demo-room".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_rooms() -> Vec<RoomConfig> {
    vec![RoomConfig {
        id: RoomId::from("general"),
        name: "General".to_string(),
        kind: RoomKind::Group,
        members: Vec::new(),
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            video: VideoConfig::default(),
            metrics: MetricsConfig::default(),
            rooms: default_rooms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_event_size: default_max_event_size(),
            history_page_limit: default_history_page_limit(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            leeway_secs: default_leeway(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            name: default_video_name(),
            url: default_video_url(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the search paths and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file or variable cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = CONFIG_PATHS
            .iter()
            .map(|p| shellexpand::tilde(p).into_owned())
            .find(|p| Path::new(p).exists())
        {
            tracing::info!(path = %path, "Loading config file");
            builder = builder.add_source(File::new(&path, FileFormat::Toml));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("HUDDLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
