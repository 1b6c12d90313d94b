//! Packet dispatch: type-code routing to registered handlers.
//!
//! The dispatch table is built once at startup from an explicit list of
//! handler registrations; there is no runtime discovery. Each handler owns
//! exactly one type code, and registering two handlers for the same code
//! fails startup loudly instead of silently keeping the last one.

pub mod core_handlers;

pub use core_handlers::{builtin_handlers, ConnectionHandler, KeepAliveHandler};

use crate::session::Session;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A gameplay (or core) packet handler.
///
/// Implementations live outside the network core - combat, inventory,
/// trade, guild logic - and declare the single type code they own. The
/// dispatch layer is responsible only for registration, resolution, and
/// invocation; handler faults are caught at the dispatch boundary and
/// tear down the offending connection.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// The packet type code this handler owns.
    fn type_code(&self) -> i16;

    /// Processes one frame's payload on behalf of `session`.
    ///
    /// May await persistence round-trips. Frames from the same connection
    /// are invoked in arrival order; frames from different connections run
    /// concurrently, so cross-session state must be synchronized by the
    /// gameplay layer itself.
    async fn process(&self, session: Arc<Session>, payload: Bytes) -> anyhow::Result<()>;
}

/// Errors raised while building the dispatch table.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Two handlers declared the same type code.
    #[error("duplicate handler registration for type code {0:#06x}")]
    DuplicateTypeCode(i16),
}

/// Immutable type-code -> handler mapping, built once at startup.
pub struct DispatchTable {
    handlers: HashMap<i16, Arc<dyn PacketHandler>>,
}

impl DispatchTable {
    /// Builds the table from an explicit registration list.
    ///
    /// Fails if any two handlers claim the same type code.
    pub fn build(
        registrations: impl IntoIterator<Item = Arc<dyn PacketHandler>>,
    ) -> Result<Self, DispatchError> {
        let mut handlers: HashMap<i16, Arc<dyn PacketHandler>> = HashMap::new();
        for handler in registrations {
            let code = handler.type_code();
            if handlers.insert(code, handler).is_some() {
                return Err(DispatchError::DuplicateTypeCode(code));
            }
        }
        Ok(Self { handlers })
    }

    /// Resolves the handler owning a type code, if one is registered.
    ///
    /// Unknown type codes are the caller's cue to log and ignore the
    /// frame - an unknown type never disconnects a client.
    pub fn resolve(&self, type_code: i16) -> Option<Arc<dyn PacketHandler>> {
        let handler = self.handlers.get(&type_code).cloned();
        if handler.is_none() {
            debug!("❓ No handler registered for type code {type_code:#06x}");
        }
        handler
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<i16> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("DispatchTable").field("type_codes", &codes).finish()
    }
}
