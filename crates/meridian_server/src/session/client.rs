//! Individual client session representation.
//!
//! A [`Session`] is created on socket accept, before the client has
//! authenticated or picked a character. Character identity (id, name,
//! handle, channel, map) is bound only after successful character
//! selection, and the session then moves between realm registries on
//! map-type transitions.

use super::{CharacterId, EntityHandle, SessionId};
use crate::realm::RealmKind;
use bytes::Bytes;
use meridian_protocol::Frame;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connected, greeting sent, waiting for the client's Connection frame
    #[default]
    Handshake,

    /// Handshake answered; account-level packets are acceptable
    Authenticated,

    /// A character is selected and the session lives in a realm registry
    InWorld,

    /// Teardown has begun; no further frames will be dispatched
    Closing,
}

/// Character identity bound to a session after character selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterBinding {
    /// Persistent database id of the selected character
    pub character_id: CharacterId,

    /// Character name as shown to other players
    pub name: String,

    /// Network handle used to reference this character in frames
    pub handle: EntityHandle,

    /// Channel the character plays on
    pub channel: u8,

    /// Map the character currently occupies
    pub map_id: u16,
}

/// A connected client session.
///
/// Owned exclusively by the realm instance currently holding it; at most
/// one realm holds a given session at a time. Outbound frames are queued
/// onto an unbounded channel drained by the connection's writer task, so
/// sends from broadcast fan-out never block on a slow socket.
#[derive(Debug)]
pub struct Session {
    /// Server-assigned id, stable for the connection's lifetime
    id: SessionId,

    /// The remote network address of the client
    remote_addr: SocketAddr,

    /// Obfuscation seed sent in the greeting frame
    handshake_seed: i16,

    /// When this connection was established
    connected_at: SystemTime,

    /// Queue towards the connection's writer task
    outbound: mpsc::UnboundedSender<Bytes>,

    /// Account id, populated after login
    account_id: RwLock<Option<i32>>,

    /// Character identity, populated after character selection
    binding: RwLock<Option<CharacterBinding>>,

    /// Lifecycle state
    state: RwLock<SessionState>,

    /// Which realm's registry currently holds this session
    current_realm: RwLock<Option<RealmKind>>,

    /// Last time the client showed signs of life
    last_seen: RwLock<Instant>,
}

impl Session {
    /// Creates a session for a freshly accepted connection.
    pub fn new(
        id: SessionId,
        remote_addr: SocketAddr,
        handshake_seed: i16,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            handshake_seed,
            connected_at: SystemTime::now(),
            outbound,
            account_id: RwLock::new(None),
            binding: RwLock::new(None),
            state: RwLock::new(SessionState::default()),
            current_realm: RwLock::new(None),
            last_seen: RwLock::new(Instant::now()),
        }
    }

    /// The server-assigned session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The remote address of the client.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The obfuscation seed this session was greeted with.
    pub fn handshake_seed(&self) -> i16 {
        self.handshake_seed
    }

    /// When this connection was established.
    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Queues an encoded frame for delivery to this client.
    ///
    /// Returns `false` if the connection's writer has already gone away.
    /// Sends are best-effort: callers fanning out to many recipients log
    /// and continue past a dead peer.
    pub fn send_bytes(&self, bytes: Bytes) -> bool {
        self.outbound.send(bytes).is_ok()
    }

    /// Encodes and queues a frame for delivery to this client.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_bytes(frame.encode())
    }

    /// The account id, once login has completed.
    pub fn account_id(&self) -> Option<i32> {
        *self.account_id.read()
    }

    /// Associates an account id after successful login.
    pub fn set_account_id(&self, account_id: i32) {
        *self.account_id.write() = Some(account_id);
    }

    /// Snapshot of the bound character identity, if any.
    pub fn binding(&self) -> Option<CharacterBinding> {
        self.binding.read().clone()
    }

    /// The bound character's persistent id, if any.
    pub fn character_id(&self) -> Option<CharacterId> {
        self.binding.read().as_ref().map(|b| b.character_id)
    }

    /// Binds a selected character to this session.
    pub fn bind_character(&self, binding: CharacterBinding) {
        *self.binding.write() = Some(binding);
    }

    /// Updates the bound character's channel and map after a move.
    pub fn relocate(&self, channel: u8, map_id: u16) {
        if let Some(binding) = self.binding.write().as_mut() {
            binding.channel = channel;
            binding.map_id = map_id;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Advances the lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// The realm whose registry currently holds this session.
    pub fn current_realm(&self) -> Option<RealmKind> {
        *self.current_realm.read()
    }

    /// Records which realm holds this session (`None` during a transition
    /// or after removal).
    pub fn set_current_realm(&self, realm: Option<RealmKind>) {
        *self.current_realm.write() = realm;
    }

    /// Records client liveness, refreshed on keepalive frames.
    pub fn touch(&self) {
        *self.last_seen.write() = Instant::now();
    }

    /// How long since the client last showed signs of life.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_seen.read().elapsed()
    }
}
