use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::Endpoint;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Total ports tried during the initial probe (base port included).
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,
    #[serde(default = "default_port_probe_delay_ms")]
    pub port_probe_delay_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    8765
}

fn default_max_port_attempts() -> u16 {
    5
}

fn default_port_probe_delay_ms() -> u64 {
    1000
}

fn default_reconnect_interval_ms() -> u64 {
    2000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            base_port: default_base_port(),
            max_port_attempts: default_max_port_attempts(),
            port_probe_delay_ms: default_port_probe_delay_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn base_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.base_port)
    }

    /// Candidate endpoints in probe order.
    pub fn candidates(&self) -> Vec<Endpoint> {
        (0..self.max_port_attempts.max(1))
            .filter_map(|offset| self.base_port.checked_add(offset))
            .map(|port| Endpoint::new(self.host.clone(), port))
            .collect()
    }

    pub fn port_probe_delay(&self) -> Duration {
        Duration::from_millis(self.port_probe_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConfig {
    #[serde(default = "default_dedup_retention_secs")]
    pub dedup_retention_secs: u64,
    #[serde(default = "default_navigate_debounce_ms")]
    pub navigate_debounce_ms: u64,
    #[serde(default = "default_ready_probe_interval_ms")]
    pub ready_probe_interval_ms: u64,
    #[serde(default = "default_ready_probe_attempts")]
    pub ready_probe_attempts: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

fn default_dedup_retention_secs() -> u64 {
    60
}

fn default_navigate_debounce_ms() -> u64 {
    500
}

fn default_ready_probe_interval_ms() -> u64 {
    200
}

fn default_ready_probe_attempts() -> u32 {
    10
}

fn default_message_timeout_ms() -> u64 {
    5000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dedup_retention_secs: default_dedup_retention_secs(),
            navigate_debounce_ms: default_navigate_debounce_ms(),
            ready_probe_interval_ms: default_ready_probe_interval_ms(),
            ready_probe_attempts: default_ready_probe_attempts(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    pub fn navigate_debounce(&self) -> Duration {
        Duration::from_millis(self.navigate_debounce_ms)
    }

    pub fn ready_probe_interval(&self) -> Duration {
        Duration::from_millis(self.ready_probe_interval_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    #[serde(default = "default_max_html_length")]
    pub max_html_length: usize,
}

fn default_max_text_length() -> usize {
    200
}

fn default_max_html_length() -> usize {
    200_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_text_length: default_max_text_length(),
            max_html_length: default_max_html_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_user_agent() -> String {
    format!("tabrelay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fetch_timeout_ms() -> u64 {
    15_000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl BrowserConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.host.trim().is_empty() {
            return Err(Error::Config("transport.host must not be empty".into()));
        }
        if self.transport.max_port_attempts == 0 {
            return Err(Error::Config("transport.maxPortAttempts must be at least 1".into()));
        }
        if self.transport.reconnect_interval_ms == 0 {
            return Err(Error::Config("transport.reconnectIntervalMs must be positive".into()));
        }
        if self.dispatcher.ready_probe_attempts == 0 {
            return Err(Error::Config("dispatcher.readyProbeAttempts must be at least 1".into()));
        }
        Ok(())
    }
}
