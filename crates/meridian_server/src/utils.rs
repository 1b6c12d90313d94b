//! Utility functions for server creation and time handling.

use crate::{
    config::ServerConfig,
    dispatch::{builtin_handlers, DispatchTable},
    server::GameServer,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as whole seconds since the unix epoch.
pub fn current_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Creates a game server with default configuration and only the built-in
/// protocol handlers registered.
pub fn create_server() -> GameServer {
    create_server_with_config(ServerConfig::default())
}

/// Creates a game server with the provided configuration and only the
/// built-in protocol handlers registered.
///
/// Gameplay deployments build their own [`DispatchTable`] and use
/// [`GameServer::new`] directly.
pub fn create_server_with_config(config: ServerConfig) -> GameServer {
    let dispatch = DispatchTable::build(builtin_handlers())
        .expect("built-in handlers have distinct type codes");
    GameServer::new(config, dispatch)
}
