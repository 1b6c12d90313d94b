//! Session management for connected clients.
//!
//! This module defines the per-client session state and the per-realm
//! registry that tracks which sessions are currently in a realm.

pub mod client;
pub mod registry;

pub use client::{CharacterBinding, Session, SessionState};
pub use registry::SessionRegistry;

/// Type alias for session identifiers.
///
/// Session ids are assigned by the server on accept and identify a
/// connection for its whole lifetime, independent of which character the
/// client later selects.
pub type SessionId = u64;

/// Persistent database id of a character.
pub type CharacterId = i32;

/// Numeric identifier assigned to a character for use in network
/// messages, distinct from its persistent database id.
pub type EntityHandle = i32;
