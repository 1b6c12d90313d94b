//! # Meridian Server - Network Core
//!
//! The network-facing core of the Meridian game server. This crate accepts
//! raw TCP connections, polices them with per-address admission rules,
//! decodes the length-prefixed binary protocol, dispatches frames to
//! per-packet-type handlers, and fans resulting frames back out to sets of
//! connected sessions scoped by realm, map, and channel.
//!
//! ## What lives here and what does not
//!
//! This crate contains **no gameplay logic**. Combat formulas, inventory,
//! trade, and guild handling are external collaborators that implement
//! [`PacketHandler`] and are registered into the [`DispatchTable`] at
//! startup. The core owns:
//!
//! * **Admission** - per-source-address rate limiting and temporary blocks
//!   evaluated before a connection becomes a session
//! * **Sessions** - per-realm registries of connected clients with lookup
//!   by character id, name, and handle
//! * **Dispatch** - type-code routing with per-connection FIFO ordering
//! * **Realms** - four parallel world instances (Normal, Dungeon, Event,
//!   PvP) each owning a disjoint session population, with map/channel
//!   scoped broadcast
//!
//! ## Concurrency model
//!
//! One spawned task per connection receives and parses inbound data; a
//! second per-connection task drains the dispatch queue so a slow handler
//! never stalls the receive loop while still invoking that connection's
//! frames in arrival order. Shared state (admission maps, session
//! registries) uses sharded concurrent maps so unrelated addresses and
//! sessions never contend on a single lock.
//!
//! ## Error handling
//!
//! Malformed frames tear down only the offending connection (handshake
//! retries are tolerated); admission rejections close the socket after a
//! short notice and never create a session; handler faults are isolated
//! per connection with the offending payload persisted for diagnostics;
//! broadcast delivery is best-effort per recipient.

pub use config::{AdmissionConfig, ServerConfig};
pub use error::ServerError;
pub use server::{GameServer, ShutdownState};
pub use utils::{create_server, create_server_with_config, current_unix_secs};

pub mod admission;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod realm;
pub mod server;
pub mod session;
pub mod utils;

pub use admission::{Admission, AdmissionController, RejectReason};
pub use dispatch::{DispatchError, DispatchTable, PacketHandler};
pub use realm::{Realm, RealmKind, Realms};
pub use session::{CharacterBinding, Session, SessionRegistry};

mod tests;
