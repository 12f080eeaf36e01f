use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::modbus::constants::DEFAULT_PORT;
use crate::registers::BankSizes;
use crate::utils::error::ServerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    // Listening endpoint
    #[serde(default)]
    pub server: ServerSettings,

    // Register map layout and contents
    pub banks: BankSizes,
    pub defaults: DefaultValues,

    // Simulated sensor feed
    #[serde(default)]
    pub updater: UpdaterSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(default = "default_ip_addr")]
    pub ip_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

/// Initial bank contents; bit banks take 0 or 1 per entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultValues {
    pub coils: Vec<u8>,
    pub discrete_inputs: Vec<u8>,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdaterSettings {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Input register that receives each reading
    #[serde(default)]
    pub register: u16,
    #[serde(default)]
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SensorConfig {
    Script {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Ramp {
        #[serde(default)]
        start: u16,
        #[serde(default = "default_ramp_step")]
        step: u16,
        #[serde(default)]
        min: u16,
        #[serde(default = "default_ramp_max")]
        max: u16,
    },
    Random {
        #[serde(default)]
        min: u16,
        #[serde(default = "default_ramp_max")]
        max: u16,
    },
}

fn default_ip_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> u32 {
    5
}

fn default_interval_seconds() -> u64 {
    5
}

fn default_ramp_step() -> u16 {
    1
}

fn default_ramp_max() -> u16 {
    u16::MAX
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ip_addr: default_ip_addr(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            register: 0,
            sensor: SensorConfig::default(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig::Ramp {
            start: 0,
            step: default_ramp_step(),
            min: 0,
            max: default_ramp_max(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            banks: BankSizes::new(10, 10, 10, 10),
            defaults: DefaultValues {
                coils: vec![1, 0, 1, 0, 0, 0, 0, 0, 0, 0],
                discrete_inputs: vec![0, 1, 0, 0, 0, 0, 0, 0, 0, 0],
                holding_registers: vec![100, 200, 300, 0, 0, 0, 0, 0, 0, 0],
                input_registers: vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90],
            },
            updater: UpdaterSettings::default(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip: IpAddr = self.ip_addr.parse().map_err(|_| {
            ServerError::ConfigError(format!("invalid server.ip_addr {:?}", self.ip_addr))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ServerError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        debug!("Configuration parsed: {:?}", config);
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("📋 Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ServerError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks that serde cannot express
    pub fn validate(&self) -> Result<(), ServerError> {
        self.server.socket_addr()?;
        if self.updater.interval_seconds == 0 {
            return Err(ServerError::ConfigError(
                "updater.interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.updater.register as usize >= self.banks.input_registers {
            return Err(ServerError::ConfigError(format!(
                "updater.register {} is outside the input register bank (size {})",
                self.updater.register, self.banks.input_registers
            )));
        }
        Ok(())
    }
}
