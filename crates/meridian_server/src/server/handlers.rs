//! Per-connection lifecycle: greeting, receive loop, dispatch worker,
//! writer task, and teardown.
//!
//! Each admitted socket gets three cooperating tasks. The receive loop
//! reads and decodes frames; a dedicated dispatch worker drains them in
//! arrival order so a slow handler never stalls the socket; and a writer
//! task drains the session's outbound queue. Teardown is funneled through
//! one cleanup path regardless of which side ends first.

use crate::{
    config::ServerConfig,
    dispatch::DispatchTable,
    error::ServerError,
    realm::Realms,
    session::{Session, SessionState},
    utils::current_unix_secs,
};
use bytes::BytesMut;
use meridian_protocol::{decode_batch, handshake, Frame, Verdict};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Drives one admitted connection from greeting to teardown.
///
/// Returns once the socket closes, a protocol fault forces a disconnect,
/// or a handler fault tears the connection down.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session_id: u64,
    realms: Arc<Realms>,
    dispatch: Arc<DispatchTable>,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<bytes::Bytes>();
    let seed = handshake::greeting_seed(current_unix_secs());
    let session = Arc::new(Session::new(session_id, addr, seed, out_tx));

    // Greeting goes through the same outbound queue as everything else,
    // so frame order on the wire matches queue order.
    session.send_frame(&handshake::greeting_frame(seed));

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!("Write to session failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    // Frames cross to the dispatch worker over an unbounded queue; the
    // receive loop stays responsive while handlers await persistence.
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Frame>();
    let worker_session = session.clone();
    let worker_dispatch = dispatch.clone();
    let diagnostics_dir = config.diagnostics_dir.clone();
    let mut worker_task = tokio::spawn(async move {
        dispatch_worker(worker_session, frame_rx, worker_dispatch, diagnostics_dir).await;
    });

    let mut buf = BytesMut::with_capacity(config.recv_buffer_size);
    let mut protocol_fault = None;

    let disconnect_reason: &str = loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break "client closed",
                Ok(_) => {
                    let batch = decode_batch(&mut buf);
                    for frame in batch.frames {
                        if frame_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    if let Verdict::Fatal(fault) = batch.verdict {
                        if fault.is_handshake() {
                            // Garbled greeting probes are common port-scanner
                            // noise; tolerate them and keep the session alive.
                            debug!(
                                "🤷 Session {} sent a malformed handshake frame: {:?}",
                                session_id, fault
                            );
                            continue;
                        }
                        warn!("⚠️ Session {} protocol fault: {:?}", session_id, fault);
                        protocol_fault = Some(fault);
                        break "protocol fault";
                    }
                }
                Err(e) => {
                    debug!("Read error on session {}: {}", session_id, e);
                    break "read error";
                }
            },
            _ = &mut worker_task => break "handler fault",
        }
    };

    session.set_state(SessionState::Closing);
    if let Some(kind) = realms.remove_from_any(&session) {
        debug!("Session {} removed from {} realm on disconnect", session_id, kind);
    }

    drop(frame_tx);
    worker_task.abort();
    writer_task.abort();

    info!("👋 Session {} from {} disconnected ({})", session_id, addr, disconnect_reason);
    match protocol_fault {
        Some(fault) => Err(ServerError::Protocol(fault.to_string())),
        None => Ok(()),
    }
}

/// Drains one connection's frame queue in arrival order.
///
/// A handler error is logged with the faulting payload persisted to disk,
/// and the worker exits, which the connection task treats as a disconnect.
/// Unknown type codes are logged at resolve time and skipped.
async fn dispatch_worker(
    session: Arc<Session>,
    mut frame_rx: mpsc::UnboundedReceiver<Frame>,
    dispatch: Arc<DispatchTable>,
    diagnostics_dir: std::path::PathBuf,
) {
    while let Some(frame) = frame_rx.recv().await {
        let Some(handler) = dispatch.resolve(frame.type_code) else {
            continue;
        };
        if let Err(e) = handler.process(session.clone(), frame.payload.clone()).await {
            error!(
                "💥 Handler for type {:#06x} failed on session {}: {:#}",
                frame.type_code,
                session.id(),
                e
            );
            persist_fault_payload(&diagnostics_dir, frame.type_code, session.id(), &frame.payload)
                .await;
            break;
        }
    }
}

/// Writes a faulting frame's payload to the diagnostics directory for
/// offline inspection. Failure to persist is logged and otherwise ignored.
async fn persist_fault_payload(dir: &Path, type_code: i16, session_id: u64, payload: &[u8]) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Failed to create diagnostics dir {}: {}", dir.display(), e);
        return;
    }
    let name = format!(
        "fault_{:04x}_s{}_{}.bin",
        type_code as u16,
        session_id,
        current_unix_secs()
    );
    let path = dir.join(name);
    match tokio::fs::write(&path, payload).await {
        Ok(()) => info!("🗂️ Faulting payload persisted to {}", path.display()),
        Err(e) => warn!("Failed to persist faulting payload: {}", e),
    }
}
