//! Server configuration types and defaults.
//!
//! This module contains the network-core configuration structure and the
//! default values used to initialize the server.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the network core.
///
/// Contains the parameters for network binding, receive buffering,
/// admission policy, and handler-fault diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Size of the per-connection receive buffer in bytes
    pub recv_buffer_size: usize,

    /// Directory where payloads of faulting handlers are persisted
    pub diagnostics_dir: PathBuf,

    /// Admission policy settings
    pub admission: AdmissionConfig,
}

/// Admission policy applied before a connection becomes a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum number of concurrent sessions server-wide
    pub max_connections: usize,

    /// Minimum time between connection attempts from one address, in
    /// milliseconds; faster reconnects earn a block
    pub min_reconnect_interval_ms: u64,

    /// How long a blocked address stays blocked, in seconds
    pub block_duration_secs: u64,

    /// How long an idle rate-limit entry is retained, in seconds
    pub rate_entry_ttl_secs: u64,

    /// Interval of the background sweep that prunes expired entries, in
    /// seconds
    pub sweep_interval_secs: u64,
}

impl AdmissionConfig {
    /// Minimum allowed gap between connection attempts from one address.
    pub fn min_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_interval_ms)
    }

    /// Duration of the block installed on a too-fast reconnect.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    /// Retention of rate-limit entries for idle addresses.
    pub fn rate_entry_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_entry_ttl_secs)
    }

    /// Cadence of the background maintenance sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4500".parse().expect("Invalid default bind address"),
            recv_buffer_size: 8 * 1024,
            diagnostics_dir: PathBuf::from("diagnostics"),
            admission: AdmissionConfig::default(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_connections: 300,
            min_reconnect_interval_ms: 1_000,
            block_duration_secs: 20 * 60,
            rate_entry_ttl_secs: 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}
