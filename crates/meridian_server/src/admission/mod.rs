//! Admission control for incoming connections.
//!
//! Every accepted socket passes through the admission controller before it
//! becomes a tracked session. The controller enforces per-source-address
//! reconnect pacing, temporary blocks for addresses that reconnect too
//! fast, and the server-wide session capacity ceiling.
//!
//! Both maps are sharded concurrent maps: the admission hot path and the
//! background sweep operate per-key and never lock out unrelated
//! addresses.

use crate::config::AdmissionConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The connection may proceed into the session pool.
    Accept,

    /// The connection is refused; the reason is written to the socket
    /// before it is shut down.
    Reject(RejectReason),
}

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The source address is serving a temporary block.
    #[error("connection refused: address temporarily blocked")]
    Blocked,

    /// The server-wide concurrent session ceiling has been reached.
    #[error("connection refused: server at capacity")]
    Capacity,

    /// The address attempted to reconnect faster than the allowed pace;
    /// a block has been installed.
    #[error("connection refused: reconnecting too fast")]
    ReconnectTooFast,
}

/// Per-address connection policing.
///
/// Tracks one last-attempt timestamp per address that has ever tried to
/// connect (pruned after an hour of inactivity) and one blocked-until
/// timestamp per currently blocked address (lazily purged on check, bulk
/// purged by the background sweep).
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,

    /// Last connection attempt per source address
    last_attempts: DashMap<IpAddr, Instant>,

    /// Addresses currently denied admission, with block expiry
    blocks: DashMap<IpAddr, Instant>,
}

impl AdmissionController {
    /// Creates a controller with the given policy.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            last_attempts: DashMap::new(),
            blocks: DashMap::new(),
        }
    }

    /// The configured concurrent session ceiling.
    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    /// Decides whether a connection from `addr` may become a session,
    /// given the current live session count.
    pub fn admit(&self, addr: IpAddr, live_sessions: usize) -> Admission {
        self.admit_at(addr, live_sessions, Instant::now())
    }

    /// Admission check against an explicit clock. Rules run in order:
    /// active block, capacity, reconnect pacing, accept.
    pub fn admit_at(&self, addr: IpAddr, live_sessions: usize, now: Instant) -> Admission {
        if let Some(entry) = self.blocks.get(&addr) {
            let blocked_until = *entry;
            drop(entry);
            if blocked_until > now {
                debug!("🚫 {} rejected: blocked for {:?} more", addr, blocked_until - now);
                return Admission::Reject(RejectReason::Blocked);
            }
            // Expired blocks are purged lazily on the next check.
            self.blocks.remove(&addr);
        }

        if live_sessions >= self.config.max_connections {
            debug!(
                "🚫 {} rejected: at capacity ({}/{})",
                addr, live_sessions, self.config.max_connections
            );
            return Admission::Reject(RejectReason::Capacity);
        }

        if let Some(entry) = self.last_attempts.get(&addr) {
            let last = *entry;
            drop(entry);
            if now.saturating_duration_since(last) < self.config.min_reconnect_interval() {
                self.blocks.insert(addr, now + self.config.block_duration());
                info!(
                    "⛔ {} blocked for {}s: reconnecting too fast",
                    addr, self.config.block_duration_secs
                );
                return Admission::Reject(RejectReason::ReconnectTooFast);
            }
        }

        self.last_attempts.insert(addr, now);
        Admission::Accept
    }

    /// Prunes expired blocks and stale rate-limit entries.
    ///
    /// Runs off the admission hot path on its own timer; per-key retention
    /// means in-flight admission checks proceed while the sweep works.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    /// Sweep against an explicit clock.
    pub fn sweep_at(&self, now: Instant) {
        let ttl = self.config.rate_entry_ttl();
        self.blocks.retain(|_, blocked_until| *blocked_until > now);
        self.last_attempts
            .retain(|_, last| now.saturating_duration_since(*last) < ttl);
    }

    /// Number of addresses currently blocked (expired entries included
    /// until the next sweep or check touches them).
    pub fn blocked_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of addresses with a tracked last-attempt timestamp.
    pub fn tracked_count(&self) -> usize {
        self.last_attempts.len()
    }
}
