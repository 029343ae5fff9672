//! Process configuration.
//!
//! Follows the teacher's nested-section-with-defaults pattern
//! (`turn-server/src/config.rs`): each concern gets its own `Deserialize`
//! struct with `#[serde(default = "...")]` fields, a `Default` impl built
//! from the same functions, and the whole thing is optionally overridden by
//! a TOML file named on the command line.

use std::net::SocketAddr;
use std::time::Duration;
use std::{collections::HashMap, fs::read_to_string};

use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Tcp {
    /// chat port clients LOGIN to (§6, default 8081).
    #[serde(default = "Tcp::listen")]
    pub listen: SocketAddr,

    /// fatal bound on an unterminated decode buffer (§4.4).
    #[serde(default = "Tcp::max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Tcp {
    fn listen() -> SocketAddr {
        "0.0.0.0:8081".parse().unwrap()
    }

    fn max_line_bytes() -> usize {
        1024 * 1024
    }
}

impl Default for Tcp {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            max_line_bytes: Self::max_line_bytes(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Http {
    /// HTTP/WS bridge bind address (§6, default 8080).
    #[serde(default = "Http::listen")]
    pub listen: SocketAddr,

    /// value of the Access-Control-Allow-Origin header.
    #[serde(default = "Http::allow_origin")]
    pub allow_origin: String,
}

impl Http {
    fn listen() -> SocketAddr {
        "0.0.0.0:8080".parse().unwrap()
    }

    fn allow_origin() -> String {
        "*".to_string()
    }
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            allow_origin: Self::allow_origin(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Stun {
    #[serde(default = "Stun::listen")]
    pub listen: SocketAddr,
    #[serde(default = "Stun::enabled")]
    pub enabled: bool,
}

impl Stun {
    fn listen() -> SocketAddr {
        "0.0.0.0:3478".parse().unwrap()
    }

    fn enabled() -> bool {
        true
    }
}

impl Default for Stun {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            enabled: Self::enabled(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Discovery {
    #[serde(default = "Discovery::listen")]
    pub listen: SocketAddr,
    #[serde(default = "Discovery::enabled")]
    pub enabled: bool,
    /// username this node answers `NEXUS_DISCOVER` with (§4.12).
    #[serde(default = "Discovery::local_username")]
    pub local_username: String,
}

impl Discovery {
    fn listen() -> SocketAddr {
        "0.0.0.0:9876".parse().unwrap()
    }

    fn enabled() -> bool {
        true
    }

    fn local_username() -> String {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "nexus-server".to_string())
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            enabled: Self::enabled(),
            local_username: Self::local_username(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Auth {
    /// HMAC signing key for bearer tokens.
    #[serde(default = "Auth::jwt_secret")]
    pub jwt_secret: String,

    /// token lifetime in seconds.
    #[serde(default = "Auth::token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Auth {
    fn jwt_secret() -> String {
        "nexusconnect-dev-secret-change-me".to_string()
    }

    fn token_ttl_secs() -> u64 {
        24 * 3600
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            jwt_secret: Self::jwt_secret(),
            token_ttl_secs: Self::token_ttl_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Sessions {
    /// voice session idle timeout (§4.7, §5 — 30 min).
    #[serde(default = "Sessions::voice_timeout_secs")]
    pub voice_timeout_secs: u64,
    /// whiteboard session idle timeout (§4.8, §5 — 60 min).
    #[serde(default = "Sessions::whiteboard_timeout_secs")]
    pub whiteboard_timeout_secs: u64,
    /// discovery peer staleness horizon (§4.12 — 120 s).
    #[serde(default = "Sessions::discovery_stale_secs")]
    pub discovery_stale_secs: u64,
}

impl Sessions {
    fn voice_timeout_secs() -> u64 {
        30 * 60
    }

    fn whiteboard_timeout_secs() -> u64 {
        60 * 60
    }

    fn discovery_stale_secs() -> u64 {
        120
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Self {
            voice_timeout_secs: Self::voice_timeout_secs(),
            whiteboard_timeout_secs: Self::whiteboard_timeout_secs(),
            discovery_stale_secs: Self::discovery_stale_secs(),
        }
    }
}

impl Sessions {
    pub fn voice_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_timeout_secs)
    }

    pub fn whiteboard_timeout(&self) -> Duration {
        Duration::from_secs(self.whiteboard_timeout_secs)
    }

    pub fn discovery_stale(&self) -> Duration {
        Duration::from_secs(self.discovery_stale_secs)
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub tcp: Tcp,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub stun: Stun,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub sessions: Sessions,
    #[serde(default)]
    pub log: Log,

    /// downloads sink directory for C6 (§6 "File layout").
    #[serde(default = "Config::downloads_dir")]
    pub downloads_dir: String,

    /// static username:password pairs accepted by the credential gate in
    /// addition to registered accounts, useful for local development.
    #[serde(default)]
    pub static_users: HashMap<String, String>,
}

impl Config {
    fn downloads_dir() -> String {
        "./nexus_downloads".to_string()
    }
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Loads command line parameters; if a config file path is given, reads
    /// configuration from it, otherwise falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let cfg_str = Cli::parse()
            .config
            .map(|path| read_to_string(path))
            .transpose()?
            .unwrap_or_default();

        Ok(toml::from_str(&cfg_str)?)
    }
}
