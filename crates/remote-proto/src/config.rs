use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Rendezvous directory for the command, status and log channels.
    /// `MPV_REMOTE_DIR` wins over this when set.
    #[serde(default = "default_channel_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Preset options for every mpv session the display process starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_true")]
    pub fullscreen: bool,
    #[serde(default = "default_hwdec")]
    pub hwdec: String,
    #[serde(default = "default_true")]
    pub osc: bool,
    /// Passed verbatim after the preset options.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// All waits are in seconds except the poll interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Display side: how long a local file may take to report loaded.
    #[serde(default = "default_load_local")]
    pub load_local_secs: f64,
    /// Display side: same for network URLs.
    #[serde(default = "default_load_http")]
    pub load_http_secs: f64,
    /// Remote side: pause, move, seek and stop.
    #[serde(default = "default_response")]
    pub response_secs: f64,
    #[serde(default = "default_kill")]
    pub kill_secs: f64,
    #[serde(default = "default_open_local")]
    pub open_local_secs: f64,
    #[serde(default = "default_open_http")]
    pub open_http_secs: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl TimeoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            dir: default_channel_dir(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            fullscreen: true,
            hwdec: default_hwdec(),
            osc: true,
            extra_args: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            load_local_secs: default_load_local(),
            load_http_secs: default_load_http(),
            response_secs: default_response(),
            kill_secs: default_kill(),
            open_local_secs: default_open_local(),
            open_http_secs: default_open_http(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_channel_dir() -> PathBuf {
    platform::temp_dir()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_true() -> bool {
    true
}

fn default_hwdec() -> String {
    "auto".to_string()
}

fn default_load_local() -> f64 {
    5.0
}

fn default_load_http() -> f64 {
    30.0
}

fn default_response() -> f64 {
    1.0
}

fn default_kill() -> f64 {
    1.5
}

fn default_open_local() -> f64 {
    6.0
}

fn default_open_http() -> f64 {
    31.0
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Effective channel directory: the environment override, else the file.
    pub fn channel_dir(&self) -> PathBuf {
        match std::env::var_os(platform::CHANNEL_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.channels.dir.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: ChannelsConfig::default(),
            http: HttpConfig::default(),
            mpv: MpvConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}
