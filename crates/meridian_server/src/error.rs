//! Error types and handling for the network core.
//!
//! This module defines the error types that can occur during server
//! operations, providing clear categorization of different failure modes.

/// Enumeration of possible server errors.
///
/// Categorizes errors into network, protocol, and I/O failures to help
/// with debugging and error handling.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or connection issues
    #[error("Network error: {0}")]
    Network(String),

    /// Wire-protocol violations observed on a connection
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Underlying socket I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
