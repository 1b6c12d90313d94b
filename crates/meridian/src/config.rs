//! Configuration management for the Meridian game server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use meridian_server::{AdmissionConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Default receive buffer size for serde deserialization
fn default_recv_buffer_size() -> usize {
    8 * 1024
}

/// Default diagnostics directory
fn default_diagnostics_dir() -> String {
    "diagnostics".to_string()
}

/// Default for max_connections
fn default_max_connections() -> usize {
    300
}

/// Default minimum reconnect gap in milliseconds
fn default_min_reconnect_interval_ms() -> u64 {
    1_000
}

/// Default block duration in seconds (20 minutes)
fn default_block_duration_secs() -> u64 {
    20 * 60
}

/// Default rate-entry retention in seconds
fn default_rate_entry_ttl_secs() -> u64 {
    60 * 60
}

/// Default admission sweep cadence in seconds
fn default_sweep_interval_secs() -> u64 {
    60
}

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses all server
/// settings including networking, admission policy, and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Admission policy settings
    #[serde(default)]
    pub admission: AdmissionSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls network binding, receive buffering, and handler-fault
/// diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:4500")
    pub bind_address: String,
    /// Size of the per-connection receive buffer in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Directory where payloads of faulting handlers are persisted
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: String,
}

/// Admission policy configuration.
///
/// Controls the per-address reconnect pacing, temporary blocks, and the
/// server-wide session ceiling applied before a connection becomes a
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSettings {
    /// Maximum number of concurrent client sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Minimum time between connection attempts from one address, in
    /// milliseconds
    #[serde(default = "default_min_reconnect_interval_ms")]
    pub min_reconnect_interval_ms: u64,
    /// How long a blocked address stays blocked, in seconds
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,
    /// How long an idle rate-limit entry is retained, in seconds
    #[serde(default = "default_rate_entry_ttl_secs")]
    pub rate_entry_ttl_secs: u64,
    /// Interval of the background admission sweep, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Logging system configuration.
///
/// Controls log output format, levels, and destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    pub file_path: Option<String>,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_reconnect_interval_ms: default_min_reconnect_interval_ms(),
            block_duration_secs: default_block_duration_secs(),
            rate_entry_ttl_secs: default_rate_entry_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:4500".to_string(),
                recv_buffer_size: default_recv_buffer_size(),
                diagnostics_dir: default_diagnostics_dir(),
            },
            admission: AdmissionSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading or
    /// creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a network-core server
    /// configuration.
    ///
    /// # Returns
    ///
    /// A `ServerConfig` instance ready for use with the game server.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            recv_buffer_size: self.server.recv_buffer_size,
            diagnostics_dir: PathBuf::from(&self.server.diagnostics_dir),
            admission: AdmissionConfig {
                max_connections: self.admission.max_connections,
                min_reconnect_interval_ms: self.admission.min_reconnect_interval_ms,
                block_duration_secs: self.admission.block_duration_secs,
                rate_entry_ttl_secs: self.admission.rate_entry_ttl_secs,
                sweep_interval_secs: self.admission.sweep_interval_secs,
            },
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string
    /// describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        // Validate bind address
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.recv_buffer_size == 0 {
            return Err("server.recv_buffer_size must be greater than 0".to_string());
        }

        if self.server.diagnostics_dir.is_empty() {
            return Err("Diagnostics directory cannot be empty".to_string());
        }

        if self.admission.max_connections == 0 {
            return Err("admission.max_connections must be greater than 0".to_string());
        }

        if self.admission.sweep_interval_secs == 0 {
            return Err("admission.sweep_interval_secs must be greater than 0".to_string());
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
