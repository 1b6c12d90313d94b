//! Realm instances and the broadcast/visibility engine.
//!
//! The world runs as four parallel realm instances - Normal, Dungeon,
//! Event, and PvP - each owning a disjoint population of sessions. A
//! session moves between realms when its character transitions between
//! map types. All realms share one parameterized implementation; there is
//! exactly one `Realm` type instantiated four times.
//!
//! Broadcast is best-effort and per-recipient independent: a recipient
//! whose socket has died is logged and skipped, never aborting delivery
//! to the rest of the set.

use crate::session::{CharacterId, EntityHandle, Session, SessionRegistry};
use meridian_protocol::Frame;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which of the four parallel world instances a realm is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealmKind {
    /// Ordinary field maps
    Normal,

    /// Instanced dungeon maps
    Dungeon,

    /// Seasonal / event maps
    Event,

    /// Player-versus-player maps
    Pvp,
}

impl RealmKind {
    /// All four kinds, in a fixed order.
    pub const ALL: [RealmKind; 4] = [
        RealmKind::Normal,
        RealmKind::Dungeon,
        RealmKind::Event,
        RealmKind::Pvp,
    ];
}

impl fmt::Display for RealmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealmKind::Normal => write!(f, "normal"),
            RealmKind::Dungeon => write!(f, "dungeon"),
            RealmKind::Event => write!(f, "event"),
            RealmKind::Pvp => write!(f, "pvp"),
        }
    }
}

/// Gameplay-owned rule deciding whether an observer session can see a
/// character's events. The engine has already constrained candidates to
/// the same map and channel; the predicate adds spatial or
/// instance-specific narrowing on top.
pub type VisibilityPredicate<'a> = &'a (dyn Fn(&Session) -> bool + Sync);

/// One world instance: a session registry plus the broadcast engine that
/// fans frames out over it.
#[derive(Debug)]
pub struct Realm {
    kind: RealmKind,
    registry: SessionRegistry,
}

impl Realm {
    /// Creates an empty realm of the given kind.
    pub fn new(kind: RealmKind) -> Self {
        Self {
            kind,
            registry: SessionRegistry::new(),
        }
    }

    /// Which world instance this is.
    pub fn kind(&self) -> RealmKind {
        self.kind
    }

    /// Direct access to the realm's session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Adds a session to this realm's registry.
    pub fn add_client(&self, session: Arc<Session>) {
        session.set_current_realm(Some(self.kind));
        info!(
            "🌍 Session {} entered {} realm ({} online)",
            session.id(),
            self.kind,
            self.registry.count() + 1
        );
        self.registry.add(session);
    }

    /// Removes a session from this realm's registry.
    pub fn remove_client(&self, session: &Session) -> Option<Arc<Session>> {
        let removed = self.registry.remove(session.id());
        if removed.is_some() {
            if session.current_realm() == Some(self.kind) {
                session.set_current_realm(None);
            }
            info!(
                "🚪 Session {} left {} realm ({} online)",
                session.id(),
                self.kind,
                self.registry.count()
            );
        }
        removed
    }

    /// Looks up a session by its bound character's persistent id.
    pub fn find_by_id(&self, character_id: CharacterId) -> Option<Arc<Session>> {
        self.registry.find_by_id(character_id)
    }

    /// Looks up a session by its bound character's name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Session>> {
        self.registry.find_by_name(name)
    }

    /// Looks up a session by its bound character's network handle.
    pub fn find_by_handle(&self, handle: EntityHandle) -> Option<Arc<Session>> {
        self.registry.find_by_handle(handle)
    }

    /// Looks up a session by handle within a channel, optionally excluding
    /// one character.
    pub fn find_by_handle_in_channel(
        &self,
        handle: EntityHandle,
        channel: u8,
        excluding: Option<CharacterId>,
    ) -> Option<Arc<Session>> {
        self.registry.find_by_handle_in_channel(handle, channel, excluding)
    }

    /// Number of sessions currently in this realm.
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// Delivers a frame to the originating session and to every other
    /// session able to observe it.
    ///
    /// The originator is always included, even when nobody else passes the
    /// visibility check. Other sessions qualify only when they share the
    /// originator's map and channel and satisfy the gameplay-supplied
    /// `visible` predicate.
    ///
    /// Returns the number of sessions the frame was queued for.
    pub fn send_to_self_and_visible(
        &self,
        character_id: CharacterId,
        frame: &Frame,
        visible: VisibilityPredicate<'_>,
    ) -> usize {
        let Some(origin) = self.registry.find_by_id(character_id) else {
            debug!(
                "📡 self+visible broadcast for absent character {} in {} realm",
                character_id, self.kind
            );
            return 0;
        };
        let Some(origin_binding) = origin.binding() else {
            return 0;
        };

        let bytes = frame.encode();
        let mut delivered = 0;

        for session in self.registry.snapshot() {
            let to_self = session.id() == origin.id();
            let observes = !to_self
                && session.binding().is_some_and(|b| {
                    b.map_id == origin_binding.map_id && b.channel == origin_binding.channel
                })
                && visible(&session);

            if to_self || observes {
                delivered += self.deliver(&session, bytes.clone()) as usize;
            }
        }
        delivered
    }

    /// Delivers a frame to exactly the listed characters, wherever they
    /// are within this realm. Absent targets are silently skipped.
    pub fn send_to_targets(&self, targets: &[CharacterId], frame: &Frame) -> usize {
        let bytes = frame.encode();
        let mut delivered = 0;
        for &character_id in targets {
            if let Some(session) = self.registry.find_by_id(character_id) {
                delivered += self.deliver(&session, bytes.clone()) as usize;
            }
        }
        delivered
    }

    /// Delivers a frame to a single character's session, if present.
    pub fn send_to_unique_target(&self, character_id: CharacterId, frame: &Frame) -> bool {
        match self.registry.find_by_id(character_id) {
            Some(session) => self.deliver(&session, frame.encode()),
            None => false,
        }
    }

    /// Delivers a frame to every session in this realm, ignoring map and
    /// channel.
    pub fn send_to_all(&self, frame: &Frame) -> usize {
        let bytes = frame.encode();
        let mut delivered = 0;
        for session in self.registry.snapshot() {
            delivered += self.deliver(&session, bytes.clone()) as usize;
        }
        debug!("📡 Broadcast to all of {} realm: {} recipients", self.kind, delivered);
        delivered
    }

    /// Queues bytes towards one recipient. A dead outbound channel is
    /// logged and swallowed so the rest of a broadcast proceeds.
    fn deliver(&self, session: &Session, bytes: bytes::Bytes) -> bool {
        let ok = session.send_bytes(bytes);
        if !ok {
            warn!(
                "📪 Dropping send to session {}: writer gone ({} realm)",
                session.id(),
                self.kind
            );
        }
        ok
    }
}

/// The four realm instances bundled for the server and the gameplay layer.
#[derive(Debug)]
pub struct Realms {
    normal: Arc<Realm>,
    dungeon: Arc<Realm>,
    event: Arc<Realm>,
    pvp: Arc<Realm>,
}

impl Default for Realms {
    fn default() -> Self {
        Self::new()
    }
}

impl Realms {
    /// Creates the four empty realm instances.
    pub fn new() -> Self {
        Self {
            normal: Arc::new(Realm::new(RealmKind::Normal)),
            dungeon: Arc::new(Realm::new(RealmKind::Dungeon)),
            event: Arc::new(Realm::new(RealmKind::Event)),
            pvp: Arc::new(Realm::new(RealmKind::Pvp)),
        }
    }

    /// The realm instance of the given kind.
    pub fn get(&self, kind: RealmKind) -> &Arc<Realm> {
        match kind {
            RealmKind::Normal => &self.normal,
            RealmKind::Dungeon => &self.dungeon,
            RealmKind::Event => &self.event,
            RealmKind::Pvp => &self.pvp,
        }
    }

    /// All four realms, in [`RealmKind::ALL`] order.
    pub fn all(&self) -> [&Arc<Realm>; 4] {
        [&self.normal, &self.dungeon, &self.event, &self.pvp]
    }

    /// Total sessions across every realm.
    pub fn total_sessions(&self) -> usize {
        self.all().iter().map(|realm| realm.count()).sum()
    }

    /// Removes a session from whichever realm currently holds it, if any.
    ///
    /// Used on disconnect, where the session's own realm marker may lag a
    /// concurrent map transition; every registry is consulted.
    pub fn remove_from_any(&self, session: &Session) -> Option<RealmKind> {
        let hint = session.current_realm();
        if let Some(kind) = hint {
            if self.get(kind).remove_client(session).is_some() {
                return Some(kind);
            }
        }
        for realm in self.all() {
            if Some(realm.kind()) == hint {
                continue;
            }
            if realm.remove_client(session).is_some() {
                return Some(realm.kind());
            }
        }
        None
    }
}
