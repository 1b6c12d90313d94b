//! Built-in protocol-core handlers.
//!
//! The only handlers this crate ships itself: the Connection handshake
//! reply and the keepalive liveness refresh. Everything else is gameplay
//! and registers from outside.

use super::PacketHandler;
use crate::session::{Session, SessionState};
use crate::utils::current_unix_secs;
use async_trait::async_trait;
use bytes::Bytes;
use meridian_protocol::{handshake, CODE_CONNECTION, CODE_KEEPALIVE};
use std::sync::Arc;
use tracing::{debug, trace};

/// Answers the client's Connection frame with the XORed handshake seed
/// and the current unix timestamp.
#[derive(Debug, Default)]
pub struct ConnectionHandler;

#[async_trait]
impl PacketHandler for ConnectionHandler {
    fn type_code(&self) -> i16 {
        CODE_CONNECTION
    }

    async fn process(&self, session: Arc<Session>, payload: Bytes) -> anyhow::Result<()> {
        let request = handshake::ConnectionRequest::parse(&payload);
        debug!(
            "🤝 Connection frame from session {} (kind {})",
            session.id(),
            request.kind
        );

        let reply = handshake::reply_frame(session.handshake_seed(), current_unix_secs());
        session.send_frame(&reply);

        if session.state() == SessionState::Handshake {
            session.set_state(SessionState::Authenticated);
        }
        Ok(())
    }
}

/// Refreshes session liveness on keepalive frames.
#[derive(Debug, Default)]
pub struct KeepAliveHandler;

#[async_trait]
impl PacketHandler for KeepAliveHandler {
    fn type_code(&self) -> i16 {
        CODE_KEEPALIVE
    }

    async fn process(&self, session: Arc<Session>, _payload: Bytes) -> anyhow::Result<()> {
        trace!("💓 Keepalive from session {}", session.id());
        session.touch();
        Ok(())
    }
}

/// The core handler set every dispatch table should include.
pub fn builtin_handlers() -> Vec<Arc<dyn PacketHandler>> {
    vec![
        Arc::new(ConnectionHandler) as Arc<dyn PacketHandler>,
        Arc::new(KeepAliveHandler) as Arc<dyn PacketHandler>,
    ]
}
