use config::{Config, ConfigError, Environment, File};
use register_map::{builtin, MapError, RegisterMap, WordOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: u64 = 2000;
pub const DEFAULT_TCP_PORT: u16 = 502;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtuConfig {
    pub tty_path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: Parity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Rtu(RtuConfig),
    Tcp(TcpConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub unit_id: u8,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub error_backoff_ms: u64,
    #[serde(default)]
    pub once: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            error_backoff_ms: 5000,
            once: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapVariant {
    /// Single-register inverter telemetry.
    #[default]
    Basic,
    /// PM2120 multi-channel meter.
    Extended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMapConfig {
    /// Built-in table, ignored when `file` is set.
    #[serde(default)]
    pub variant: MapVariant,
    /// JSON register map used instead of the built-in variant.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub word_order: Option<WordOrder>,
    #[serde(default)]
    pub scale_overrides: HashMap<String, f64>,
}

impl RegisterMapConfig {
    pub fn build(&self) -> Result<RegisterMap, MapError> {
        let map = match &self.file {
            Some(path) => RegisterMap::from_json_file(path)?,
            None => match self.variant {
                MapVariant::Basic => builtin::inverter_basic()?,
                MapVariant::Extended => builtin::pm2120()?,
            },
        };
        let map = match self.word_order {
            Some(order) => map.with_word_order(order),
            None => map,
        };
        map.with_scale_overrides(&self.scale_overrides)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub poll: PollConfig,
    pub register_map: RegisterMapConfig,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::None
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

pub fn load_config(config_file: &str) -> Result<AppConfig, ConfigError> {
    Config::builder()
        .add_source(File::with_name(config_file))
        .add_source(Environment::with_prefix("app").separator("__"))
        .build()?
        .try_deserialize()
}

pub fn read_config() -> AppConfig {
    let config_file: String = env::var("CONFIGFILE").unwrap_or_else(|_| "src/config.toml".into());
    load_config(&config_file).unwrap_or_else(|e| {
        log::error!(target: "config", "Error reading config file {}: {}", config_file, e);
        std::process::exit(1);
    })
}
