// Include tests
#[cfg(test)]
mod tests {
    use crate::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use meridian_protocol::{handshake, Frame, CODE_CONNECTION, CODE_KEEPALIVE, HEADER_LEN};
    use parking_lot::Mutex;
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    const CODE_RECORD: i16 = 0x0C10;
    const CODE_EXPLODE: i16 = 0x0C11;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    fn world_session(
        id: u64,
        character_id: i32,
        name: &str,
        handle: i32,
        channel: u8,
        map_id: u16,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let session = Arc::new(Session::new(id, addr, 7, tx));
        session.bind_character(CharacterBinding {
            character_id,
            name: name.to_string(),
            handle,
            channel,
            map_id,
        });
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    /// Records the sequence numbers it receives, in invocation order.
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl PacketHandler for RecordingHandler {
        fn type_code(&self) -> i16 {
            CODE_RECORD
        }

        async fn process(&self, _session: Arc<Session>, payload: Bytes) -> anyhow::Result<()> {
            let seq = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            // Yield so out-of-order dispatch would actually be observable.
            tokio::task::yield_now().await;
            self.seen.lock().push(seq);
            Ok(())
        }
    }

    /// Fails on every frame, exercising the fault-isolation path.
    struct ExplodingHandler;

    #[async_trait]
    impl PacketHandler for ExplodingHandler {
        fn type_code(&self) -> i16 {
            CODE_EXPLODE
        }

        async fn process(&self, _session: Arc<Session>, _payload: Bytes) -> anyhow::Result<()> {
            anyhow::bail!("exploding handler always fails")
        }
    }

    // ---- admission -------------------------------------------------------

    #[test]
    fn admission_paces_reconnects_and_blocks() {
        let config = AdmissionConfig::default();
        let block = config.block_duration();
        let controller = AdmissionController::new(config);
        let ip = test_ip(1);
        let base = Instant::now();

        assert_eq!(controller.admit_at(ip, 0, base), Admission::Accept);

        // Reconnecting inside the pacing window earns a block.
        assert_eq!(
            controller.admit_at(ip, 0, base + Duration::from_millis(300)),
            Admission::Reject(RejectReason::ReconnectTooFast)
        );
        assert_eq!(controller.blocked_count(), 1);

        // While the block lasts, even well-paced attempts are refused.
        assert_eq!(
            controller.admit_at(ip, 0, base + Duration::from_secs(120)),
            Admission::Reject(RejectReason::Blocked)
        );

        // Once the block expires the address is welcome again.
        assert_eq!(
            controller.admit_at(ip, 0, base + Duration::from_millis(300) + block + Duration::from_secs(1)),
            Admission::Accept
        );
        assert_eq!(controller.blocked_count(), 0, "expired block purged lazily");
    }

    #[test]
    fn admission_block_outranks_pacing_reset() {
        let controller = AdmissionController::new(AdmissionConfig::default());
        let ip = test_ip(2);
        let base = Instant::now();

        assert_eq!(controller.admit_at(ip, 0, base), Admission::Accept);
        assert_eq!(
            controller.admit_at(ip, 0, base + Duration::from_millis(10)),
            Admission::Reject(RejectReason::ReconnectTooFast)
        );

        // A second too-fast attempt during the block reports Blocked, not
        // ReconnectTooFast: the block rule runs first.
        assert_eq!(
            controller.admit_at(ip, 0, base + Duration::from_millis(20)),
            Admission::Reject(RejectReason::Blocked)
        );
    }

    #[test]
    fn admission_enforces_capacity_ceiling() {
        let config = AdmissionConfig::default();
        let max = config.max_connections;
        let controller = AdmissionController::new(config);
        let now = Instant::now();

        assert_eq!(controller.admit_at(test_ip(3), max - 1, now), Admission::Accept);
        assert_eq!(
            controller.admit_at(test_ip(4), max, now),
            Admission::Reject(RejectReason::Capacity)
        );
        // A full server neither tracks nor blocks the refused address.
        assert_eq!(
            controller.admit_at(test_ip(4), max - 1, now + Duration::from_secs(2)),
            Admission::Accept
        );
    }

    #[test]
    fn admission_sweep_prunes_stale_entries() {
        let config = AdmissionConfig::default();
        let ttl = config.rate_entry_ttl();
        let block = config.block_duration();
        let controller = AdmissionController::new(config);
        let base = Instant::now();

        assert_eq!(controller.admit_at(test_ip(5), 0, base), Admission::Accept);
        assert_eq!(
            controller.admit_at(test_ip(5), 0, base + Duration::from_millis(1)),
            Admission::Reject(RejectReason::ReconnectTooFast)
        );
        assert_eq!(controller.tracked_count(), 1);
        assert_eq!(controller.blocked_count(), 1);

        // Mid-life sweep keeps everything.
        controller.sweep_at(base + Duration::from_secs(60));
        assert_eq!(controller.tracked_count(), 1);
        assert_eq!(controller.blocked_count(), 1);

        controller.sweep_at(base + ttl + block + Duration::from_secs(1));
        assert_eq!(controller.tracked_count(), 0);
        assert_eq!(controller.blocked_count(), 0);
    }

    // ---- session registry ------------------------------------------------

    #[test]
    fn registry_lookups_by_id_name_and_handle() {
        let registry = SessionRegistry::new();
        let (alice, _alice_rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        let (bob, _bob_rx) = world_session(2, 200, "Bob", 9002, 1, 50);
        registry.add(alice.clone());
        registry.add(bob);

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.find_by_id(100).unwrap().id(), 1);
        assert_eq!(registry.find_by_name("alice").unwrap().id(), 1, "name lookup is case-insensitive");
        assert_eq!(registry.find_by_handle(9002).unwrap().id(), 2);
        assert!(registry.find_by_id(999).is_none());

        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.id(), 1);
        assert!(registry.find_by_id(100).is_none(), "indexes cleaned on removal");
        assert!(registry.find_by_name("Alice").is_none());
        assert!(!registry.contains(1));
    }

    #[test]
    fn registry_handle_lookup_respects_channel_and_exclusion() {
        let registry = SessionRegistry::new();
        let (alice, _rx) = world_session(1, 100, "Alice", 9001, 2, 50);
        registry.add(alice);

        assert!(registry.find_by_handle_in_channel(9001, 2, None).is_some());
        assert!(registry.find_by_handle_in_channel(9001, 3, None).is_none(), "wrong channel");
        assert!(
            registry.find_by_handle_in_channel(9001, 2, Some(100)).is_none(),
            "excluded character is invisible to the lookup"
        );
        assert!(registry.find_by_handle_in_channel(9001, 2, Some(200)).is_some());
    }

    #[test]
    fn session_tracks_account_relocation_and_liveness() {
        let (session, _rx) = world_session(1, 100, "Alice", 9001, 1, 50);

        assert!(session.account_id().is_none());
        session.set_account_id(42);
        assert_eq!(session.account_id(), Some(42));
        assert!(session.connected_at() <= std::time::SystemTime::now());

        session.relocate(3, 120);
        let binding = session.binding().unwrap();
        assert_eq!(binding.channel, 3);
        assert_eq!(binding.map_id, 120);
        // Relocation changes placement only, never identity.
        assert_eq!(binding.character_id, 100);
        assert_eq!(binding.handle, 9001);

        std::thread::sleep(Duration::from_millis(25));
        assert!(session.idle_for() >= Duration::from_millis(10));
        session.touch();
        assert!(session.idle_for() < Duration::from_millis(10));
    }

    // ---- realms ----------------------------------------------------------

    #[test]
    fn realms_hold_disjoint_populations() {
        let realms = Realms::new();
        let (alice, _a_rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        let (bob, _b_rx) = world_session(2, 200, "Bob", 9002, 1, 700);

        realms.get(RealmKind::Normal).add_client(alice.clone());
        realms.get(RealmKind::Dungeon).add_client(bob.clone());

        assert_eq!(alice.current_realm(), Some(RealmKind::Normal));
        assert!(realms.get(RealmKind::Normal).find_by_id(100).is_some());
        assert!(
            realms.get(RealmKind::Normal).find_by_id(200).is_none(),
            "a dungeon character is invisible from the normal realm"
        );
        assert_eq!(realms.total_sessions(), 2);

        assert_eq!(realms.remove_from_any(&bob), Some(RealmKind::Dungeon));
        assert_eq!(realms.remove_from_any(&bob), None);
        assert_eq!(realms.total_sessions(), 1);
    }

    #[test]
    fn remove_from_any_survives_stale_realm_marker() {
        let realms = Realms::new();
        let (alice, _rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        realms.get(RealmKind::Event).add_client(alice.clone());

        // Simulate a marker lagging a concurrent transition.
        alice.set_current_realm(Some(RealmKind::Pvp));
        assert_eq!(realms.remove_from_any(&alice), Some(RealmKind::Event));
    }

    // ---- broadcast -------------------------------------------------------

    #[test]
    fn self_and_visible_always_includes_origin() {
        let realm = Realm::new(RealmKind::Normal);
        let (alice, mut alice_rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        realm.add_client(alice);

        let frame = Frame::new(0x0C20, &b"emote"[..]);
        let delivered = realm.send_to_self_and_visible(100, &frame, &|_| false);

        assert_eq!(delivered, 1, "origin delivered even when nobody else qualifies");
        assert_eq!(drain(&mut alice_rx), 1);
    }

    #[test]
    fn self_and_visible_scopes_by_map_channel_and_predicate() {
        let realm = Realm::new(RealmKind::Normal);
        let (alice, mut alice_rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        let (near, mut near_rx) = world_session(2, 200, "Near", 9002, 1, 50);
        let (far, mut far_rx) = world_session(3, 300, "Far", 9003, 1, 50);
        let (other_map, mut other_map_rx) = world_session(4, 400, "Elsewhere", 9004, 1, 51);
        let (other_channel, mut other_channel_rx) = world_session(5, 500, "Shifted", 9005, 2, 50);
        for s in [&alice, &near, &far, &other_map, &other_channel] {
            realm.add_client(s.clone());
        }

        let frame = Frame::new(0x0C20, &b"move"[..]);
        let delivered = realm.send_to_self_and_visible(100, &frame, &|s| {
            s.character_id() != Some(300)
        });

        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut alice_rx), 1);
        assert_eq!(drain(&mut near_rx), 1);
        assert_eq!(drain(&mut far_rx), 0, "predicate filtered");
        assert_eq!(drain(&mut other_map_rx), 0, "different map");
        assert_eq!(drain(&mut other_channel_rx), 0, "different channel");
    }

    #[test]
    fn targeted_sends_skip_absent_characters() {
        let realm = Realm::new(RealmKind::Pvp);
        let (alice, mut alice_rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        let (bob, mut bob_rx) = world_session(2, 200, "Bob", 9002, 3, 90);
        realm.add_client(alice);
        realm.add_client(bob);

        let frame = Frame::new(0x0C21, &b"party"[..]);
        // 999 is offline; delivery proceeds to the present targets.
        assert_eq!(realm.send_to_targets(&[100, 999, 200], &frame), 2);
        assert_eq!(drain(&mut alice_rx), 1);
        assert_eq!(drain(&mut bob_rx), 1);

        assert!(realm.send_to_unique_target(200, &frame));
        assert!(!realm.send_to_unique_target(999, &frame));
        assert_eq!(drain(&mut bob_rx), 1);
    }

    #[test]
    fn broadcast_skips_dead_recipients() {
        let realm = Realm::new(RealmKind::Event);
        let (alice, mut alice_rx) = world_session(1, 100, "Alice", 9001, 1, 50);
        let (dead, dead_rx) = world_session(2, 200, "Gone", 9002, 1, 50);
        realm.add_client(alice);
        realm.add_client(dead);
        drop(dead_rx);

        let frame = Frame::new(0x0C22, &b"announce"[..]);
        assert_eq!(realm.send_to_all(&frame), 1, "dead writer skipped, rest delivered");
        assert_eq!(drain(&mut alice_rx), 1);
    }

    // ---- dispatch --------------------------------------------------------

    #[test]
    fn duplicate_handler_registration_fails_loudly() {
        let result = DispatchTable::build([
            Arc::new(dispatch::KeepAliveHandler) as Arc<dyn PacketHandler>,
            Arc::new(dispatch::KeepAliveHandler) as Arc<dyn PacketHandler>,
        ]);

        match result {
            Err(DispatchError::DuplicateTypeCode(code)) => assert_eq!(code, CODE_KEEPALIVE),
            other => panic!("expected duplicate registration error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_code_resolves_to_none() {
        let table = DispatchTable::build(dispatch::builtin_handlers()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.resolve(CODE_CONNECTION).is_some());
        assert!(table.resolve(0x7F7F).is_none());
    }

    // ---- end to end ------------------------------------------------------

    async fn start_test_server(port: u16, extra: Vec<Arc<dyn PacketHandler>>) -> Arc<GameServer> {
        start_test_server_with(port, extra, |_| {}).await
    }

    async fn start_test_server_with(
        port: u16,
        extra: Vec<Arc<dyn PacketHandler>>,
        tweak: impl FnOnce(&mut ServerConfig),
    ) -> Arc<GameServer> {
        let mut config = ServerConfig {
            bind_address: format!("127.0.0.1:{port}").parse().unwrap(),
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let handlers = dispatch::builtin_handlers().into_iter().chain(extra);
        let dispatch = DispatchTable::build(handlers).expect("distinct test handler codes");
        let server = Arc::new(GameServer::new(config, dispatch));

        let background = server.clone();
        tokio::spawn(async move {
            background.start().await.expect("test server failed to start");
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        server
    }

    async fn read_wire_frame(stream: &mut TcpStream) -> (i16, Vec<u8>) {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await.expect("frame header");
        let length = i32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let type_code = i16::from_le_bytes([header[4], header[5]]);
        let mut rest = vec![0u8; length - HEADER_LEN];
        stream.read_exact(&mut rest).await.expect("frame body");
        (type_code, rest)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handshake_exchange_over_tcp() {
        let server = start_test_server(46010, Vec::new()).await;

        let mut stream = TcpStream::connect("127.0.0.1:46010").await.expect("connect");

        // Greeting arrives unprompted.
        let (type_code, greeting) = read_wire_frame(&mut stream).await;
        assert_eq!(type_code, CODE_CONNECTION);
        assert_eq!(greeting.len(), 2);
        let seed = i16::from_le_bytes([greeting[0], greeting[1]]);

        // Answer with a Connection frame and expect the XORed seed back.
        let request = Frame::new(CODE_CONNECTION, &b"\x01"[..]);
        stream.write_all(&request.encode()).await.expect("send connection frame");

        let (type_code, reply) = read_wire_frame(&mut stream).await;
        assert_eq!(type_code, CODE_CONNECTION);
        assert_eq!(reply.len(), 6);
        let echoed = i16::from_le_bytes([reply[0], reply[1]]);
        assert_eq!(echoed, handshake::reply_seed(seed));

        assert_eq!(server.live_connections(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_frames_dispatch_in_arrival_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(RecordingHandler { seen: seen.clone() }) as Arc<dyn PacketHandler>;
        let _server = start_test_server(46011, vec![recorder]).await;

        let mut stream = TcpStream::connect("127.0.0.1:46011").await.expect("connect");
        let _greeting = read_wire_frame(&mut stream).await;

        let mut wire = Vec::new();
        for seq in 0u32..50 {
            wire.extend_from_slice(&Frame::new(CODE_RECORD, seq.to_le_bytes().to_vec()).encode());
        }
        stream.write_all(&wire).await.expect("send batch");

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 50 {
            assert!(Instant::now() < deadline, "dispatch did not drain in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let order = seen.lock().clone();
        assert_eq!(order, (0u32..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handler_fault_disconnects_and_persists_payload() {
        let diagnostics = tempfile::tempdir().expect("tempdir");
        let diagnostics_path = diagnostics.path().to_path_buf();
        let exploder = Arc::new(ExplodingHandler) as Arc<dyn PacketHandler>;
        let _server = start_test_server_with(46012, vec![exploder], |config| {
            config.diagnostics_dir = diagnostics_path.clone();
        })
        .await;

        let mut stream = TcpStream::connect("127.0.0.1:46012").await.expect("connect");
        let _greeting = read_wire_frame(&mut stream).await;

        let payload = b"poison pill".to_vec();
        stream
            .write_all(&Frame::new(CODE_EXPLODE, payload.clone()).encode())
            .await
            .expect("send frame");

        // The connection must be torn down by the server side; a reset
        // counts as closed too.
        let mut sink = Vec::new();
        let n = stream.read_to_end(&mut sink).await.unwrap_or(0);
        assert_eq!(n, 0);

        let mut entries = std::fs::read_dir(diagnostics.path())
            .expect("diagnostics dir")
            .collect::<Result<Vec<_>, _>>()
            .expect("dir entries");
        assert_eq!(entries.len(), 1, "exactly one faulting payload persisted");
        let persisted = std::fs::read(entries.remove(0).path()).expect("payload file");
        assert_eq!(persisted, payload);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rapid_reconnect_is_refused_with_notice() {
        let _server = start_test_server(46013, Vec::new()).await;

        let mut first = TcpStream::connect("127.0.0.1:46013").await.expect("first connect");
        let _greeting = read_wire_frame(&mut first).await;

        // Immediately reconnecting from the same address trips pacing.
        let mut second = TcpStream::connect("127.0.0.1:46013").await.expect("second connect");
        let mut notice = String::new();
        second.read_to_string(&mut notice).await.expect("read notice");
        assert!(
            notice.contains("reconnecting too fast"),
            "unexpected rejection notice: {notice:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_protocol_fault_surfaces_as_server_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let realms = Arc::new(Realms::new());
        let table = Arc::new(DispatchTable::build(dispatch::builtin_handlers()).unwrap());
        let config = Arc::new(ServerConfig::default());

        let server_side = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.expect("accept");
            crate::server::handlers::handle_connection(stream, peer, 1, realms, table, config)
                .await
        });

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let _greeting = read_wire_frame(&mut stream).await;

        let mut bad = Vec::new();
        bad.extend_from_slice(&(-5i32).to_le_bytes());
        bad.extend_from_slice(&0x0C01i16.to_le_bytes());
        stream.write_all(&bad).await.expect("send bad frame");

        match server_side.await.expect("join") {
            Err(ServerError::Protocol(message)) => assert!(message.contains("Malformed")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_frame_disconnects_but_handshake_retry_does_not() {
        let _server = start_test_server_with(46014, Vec::new(), |config| {
            // Loopback reconnects in this test are deliberate.
            config.admission.min_reconnect_interval_ms = 0;
        })
        .await;

        // A zero-length gameplay frame is fatal.
        let mut stream = TcpStream::connect("127.0.0.1:46014").await.expect("connect");
        let _greeting = read_wire_frame(&mut stream).await;
        let mut bad = Vec::new();
        bad.extend_from_slice(&0i32.to_le_bytes());
        bad.extend_from_slice(&0x0C01i16.to_le_bytes());
        stream.write_all(&bad).await.expect("send bad frame");
        let mut sink = Vec::new();
        assert_eq!(stream.read_to_end(&mut sink).await.unwrap_or(0), 0);

        // A garbled handshake frame (length too small for its own header)
        // is tolerated instead of disconnecting.
        let mut stream = TcpStream::connect("127.0.0.1:46014").await.expect("reconnect");
        let _greeting = read_wire_frame(&mut stream).await;
        let mut garbled = Vec::new();
        garbled.extend_from_slice(&3i32.to_le_bytes());
        garbled.extend_from_slice(&CODE_CONNECTION.to_le_bytes());
        stream.write_all(&garbled).await.expect("send garbled handshake");

        // Still alive: a proper Connection frame gets its reply.
        stream
            .write_all(&Frame::new(CODE_CONNECTION, &b"\x01"[..]).encode())
            .await
            .expect("send connection frame");
        let (type_code, reply) = read_wire_frame(&mut stream).await;
        assert_eq!(type_code, CODE_CONNECTION);
        assert_eq!(reply.len(), 6);
    }
}
