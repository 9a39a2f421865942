//! Configuration file support for CD-1.1 consumer sessions

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-station consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station name; also the frameset name sent in acknacks
    pub station_name: String,
    /// Local address to listen on for the provider connection
    pub listen: SocketAddr,
    /// IP address the provider is expected to connect from
    pub expected_provider: IpAddr,
    /// Reject connections from addresses other than `expected_provider`
    #[serde(default = "default_reject_unexpected")]
    pub reject_unexpected_provider: bool,
    /// Interval between outbound acknacks in seconds
    #[serde(default = "default_acknack_interval")]
    pub acknack_interval_secs: u64,
    /// Seconds without provider contact before the connection is expired
    #[serde(default = "default_connection_expiry")]
    pub connection_expiry_secs: u64,
    /// Interval between gap state persistence runs in seconds
    #[serde(default = "default_gap_persist_interval")]
    pub gap_persist_interval_secs: u64,
    /// Interval between expired-gap sweeps in seconds
    #[serde(default = "default_gap_sweep_interval")]
    pub gap_sweep_interval_secs: u64,
    /// Gaps unmodified for this many days are dropped; 0 disables expiry
    #[serde(default = "default_gap_expiry_days")]
    pub gap_expiry_days: u32,
    /// Directory holding persisted gap state, one JSON file per station
    #[serde(default = "default_gap_storage_dir")]
    pub gap_storage_dir: PathBuf,
}

fn default_reject_unexpected() -> bool {
    true
}

fn default_acknack_interval() -> u64 {
    55
}

fn default_connection_expiry() -> u64 {
    120
}

fn default_gap_persist_interval() -> u64 {
    300
}

fn default_gap_sweep_interval() -> u64 {
    3600
}

fn default_gap_expiry_days() -> u32 {
    30
}

fn default_gap_storage_dir() -> PathBuf {
    PathBuf::from("gap-state")
}

impl StationConfig {
    /// Get acknack interval as Duration
    pub fn acknack_interval(&self) -> Duration {
        Duration::from_secs(self.acknack_interval_secs)
    }

    /// Get connection expiry limit as Duration
    pub fn connection_expiry(&self) -> Duration {
        Duration::from_secs(self.connection_expiry_secs)
    }

    /// Get gap persistence interval as Duration
    pub fn gap_persist_interval(&self) -> Duration {
        Duration::from_secs(self.gap_persist_interval_secs)
    }

    /// Get expired-gap sweep interval as Duration
    pub fn gap_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.gap_sweep_interval_secs)
    }

    /// Validate field values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station_name.trim().is_empty() {
            return Err(ConfigError::Invalid("station_name must not be blank".into()));
        }
        if self.acknack_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "acknack_interval_secs must be at least 1".into(),
            ));
        }
        if self.connection_expiry_secs == 0 {
            return Err(ConfigError::Invalid(
                "connection_expiry_secs must be at least 1".into(),
            ));
        }
        if self.gap_persist_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "gap_persist_interval_secs must be at least 1".into(),
            ));
        }
        if self.gap_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "gap_sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Combined configuration: one consumer per station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stations: Vec<StationConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example configuration
    pub fn example() -> Self {
        Config {
            stations: vec![StationConfig {
                station_name: "STA01".to_string(),
                listen: "0.0.0.0:8100".parse().unwrap(),
                expected_provider: "192.0.2.10".parse().unwrap(),
                reject_unexpected_provider: true,
                acknack_interval_secs: 55,
                connection_expiry_secs: 120,
                gap_persist_interval_secs: 300,
                gap_sweep_interval_secs: 3600,
                gap_expiry_days: 30,
                gap_storage_dir: PathBuf::from("gap-state"),
            }],
        }
    }

    /// Validate every station entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stations.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[stations]] entry is required".into(),
            ));
        }
        for station in &self.stations {
            station.validate()?;
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
