use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// RideLink realtime hub
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "ridelink-server", version, about = "RideLink realtime location hub")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RIDELINK_PORT", default_value = "4015")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RIDELINK_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./ridelink.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RIDELINK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Hub timing configuration (loaded from [realtime] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Device-side tracking defaults (loaded from [tracking] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Timing knobs for the hub's liveness and staleness machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Age in seconds after which a driver location record is evicted (default: 300)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Interval in seconds between staleness reaper runs (default: 60)
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Interval in seconds between WebSocket pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            reap_interval_secs: 60,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl RealtimeConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reap_interval_secs)
    }

    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pong_timeout_secs)
    }
}

/// Defaults handed to device-side capture agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Backup re-emit interval in milliseconds (default: 5000)
    #[serde(default = "default_tracking_interval")]
    pub interval_ms: u64,

    /// Minimum movement in meters before a sample is forwarded (default: 10)
    #[serde(default = "default_min_distance")]
    pub min_distance_m: f64,

    /// Backoff in seconds before restarting tracking after a transient
    /// positioning error (default: 5)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Delay in seconds between transport reconnection attempts (default: 2)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            min_distance_m: 10.0,
            retry_backoff_secs: 5,
            reconnect_delay_secs: 2,
        }
    }
}

fn default_stale_after() -> u64 {
    300
}

fn default_reap_interval() -> u64 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_tracking_interval() -> u64 {
    5000
}

fn default_min_distance() -> f64 {
    10.0
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_reconnect_delay() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4015,
            bind_address: "0.0.0.0".to_string(),
            config: "./ridelink.toml".to_string(),
            json_logs: false,
            generate_config: false,
            realtime: RealtimeConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RIDELINK_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RIDELINK_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# RideLink Realtime Hub Configuration
# Place this file at ./ridelink.toml or specify with --config <path>
# All settings can be overridden via environment variables (RIDELINK_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4015)
# port = 4015

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Hub Timing ----
# [realtime]

# Driver location records older than this many seconds are evicted
# stale_after_secs = 300

# How often the staleness reaper runs, in seconds
# reap_interval_secs = 60

# WebSocket ping cadence and pong deadline, in seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Device Tracking Defaults ----
# [tracking]

# Backup re-emit interval while a driver is stationary, in milliseconds
# interval_ms = 5000

# Minimum movement in meters before a GPS sample is forwarded
# min_distance_m = 10.0

# Backoff before restarting tracking after a transient GPS error, in seconds
# retry_backoff_secs = 5

# Delay between transport reconnection attempts, in seconds
# reconnect_delay_secs = 2
"#
    .to_string()
}
