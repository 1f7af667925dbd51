//! Integration tests for the lockstep game server
//!
//! These tests run a real server on an ephemeral port and talk to it over
//! real TCP connections, either through the client library or through a
//! raw frame-level client that can misbehave on purpose.

use client::GameClient;
use server::network::{Server, ServerConfig};
use shared::{DownReason, Frame, Message, RejectReason, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// Tests that a well-behaved client completes the join and time-sync
    /// handshake and learns the session shape
    #[tokio::test]
    async fn join_handshake_reports_session_shape() {
        let addr = start_server(2).await;

        let client = GameClient::connect(&addr.to_string())
            .await
            .expect("handshake should succeed");

        assert!(client.client_id >= 1);
        assert_eq!(client.slot, 0, "first client gets the first slot");
        assert_eq!(client.required, 2);
        assert_eq!((client.map_width, client.map_height), (32, 32));
    }

    /// Tests that a protocol version mismatch is rejected and the
    /// connection closed
    #[tokio::test]
    async fn bad_version_rejected() {
        let addr = start_server(2).await;

        let mut raw = RawClient::connect(addr).await;
        raw.send(&Message::JoinRequest {
            version: PROTOCOL_VERSION + 1,
        })
        .await;

        match raw.recv().await {
            Message::Reject { reason } => assert_eq!(reason, RejectReason::BadVersion),
            other => panic!("expected a rejection, got {:?}", other),
        }
        raw.expect_eof().await;
    }

    /// Tests that gameplay traffic before the handshake is treated as a
    /// violation
    #[tokio::test]
    async fn gameplay_before_join_rejected() {
        let addr = start_server(2).await;

        let mut raw = RawClient::connect(addr).await;
        raw.send(&Message::TickConfirm { tick: 0 }).await;

        match raw.recv().await {
            Message::Reject { reason } => {
                assert_eq!(reason, RejectReason::HandshakeViolation)
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
        raw.expect_eof().await;
    }

    /// Tests that echoing a time-sync probe with the wrong token fails the
    /// handshake
    #[tokio::test]
    async fn wrong_sync_token_rejected() {
        let addr = start_server(2).await;

        let mut raw = RawClient::connect(addr).await;
        raw.send(&Message::JoinRequest {
            version: PROTOCOL_VERSION,
        })
        .await;

        loop {
            match raw.recv().await {
                Message::JoinAccept { .. } => {}
                Message::TimeSync { round, token } => {
                    raw.send(&Message::TimeSyncAck {
                        round,
                        token: token.wrapping_add(1),
                    })
                    .await;
                }
                Message::Reject { reason } => {
                    assert_eq!(reason, RejectReason::HandshakeViolation);
                    break;
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
        raw.expect_eof().await;
    }
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Tests the opening batch: own units, own resources, and nothing of
    /// the opponent
    #[tokio::test]
    async fn opening_state_after_start() {
        let addr = start_server(2).await;

        let mut c1 = GameClient::connect(&addr.to_string())
            .await
            .expect("first client should connect");
        let mut c2 = GameClient::connect(&addr.to_string())
            .await
            .expect("second client should connect");

        let report = c1.wait_for_start().await.expect("game should start");
        assert_eq!(report.tick, 1);
        assert!(report.down.is_none());

        // Headquarters plus two workers, all ours, nothing of the enemy.
        assert_eq!(c1.mirror.units.len(), 3);
        assert!(c1.mirror.units.values().all(|u| u.owner == c1.slot));
        assert_eq!(c1.mirror.units.values().filter(|u| u.kind == 1).count(), 1);
        assert_eq!(c1.mirror.units.values().filter(|u| u.kind == 3).count(), 2);

        assert_eq!((c1.mirror.minerals, c1.mirror.energy), (200, 50));
        assert!(c1.mirror.visible_cells() > 0, "spawn ground is revealed");

        let report = c2.wait_for_start().await.expect("game should start");
        assert_eq!(report.tick, 1);
        assert_eq!(c2.mirror.units.len(), 3);
        assert!(c2.mirror.units.values().all(|u| u.owner == c2.slot));
    }

    /// Tests that a slot abandoned before the game starts is handed to the
    /// next joiner
    #[tokio::test]
    async fn pre_start_disconnect_frees_slot() {
        let addr = start_server(2).await;

        let c1 = GameClient::connect(&addr.to_string())
            .await
            .expect("first client should connect");
        assert_eq!(c1.slot, 0);
        drop(c1);
        sleep(Duration::from_millis(200)).await;

        let mut c2 = GameClient::connect(&addr.to_string())
            .await
            .expect("second client should connect");
        assert_eq!(c2.slot, 0, "abandoned slot is reused");

        let _c3 = GameClient::connect(&addr.to_string())
            .await
            .expect("third client should connect");
        let report = c2.wait_for_start().await.expect("game should start");
        assert!(report.down.is_none());
    }

    /// Tests that joins are refused once the game is underway
    #[tokio::test]
    async fn join_rejected_once_playing() {
        let addr = start_server(1).await;

        // A single-player session starts the moment the handshake ends.
        let mut player = RawClient::join(addr).await;
        player
            .recv_until(|m| matches!(m, Message::TickAdvance { .. }))
            .await;

        let mut late = RawClient::connect(addr).await;
        late.send(&Message::JoinRequest {
            version: PROTOCOL_VERSION,
        })
        .await;
        match late.recv().await {
            Message::Reject { reason } => assert_eq!(reason, RejectReason::ServerFull),
            other => panic!("expected a rejection, got {:?}", other),
        }
        late.expect_eof().await;
    }

    /// Tests that losing a player mid-game tears the whole session down
    #[tokio::test]
    async fn mid_game_disconnect_tears_session_down() {
        let addr = start_server(2).await;

        let mut c1 = GameClient::connect(&addr.to_string())
            .await
            .expect("first client should connect");
        let mut c2 = GameClient::connect(&addr.to_string())
            .await
            .expect("second client should connect");
        c1.wait_for_start().await.expect("game should start");
        c2.wait_for_start().await.expect("game should start");

        drop(c2);

        let report = c1.next_tick().await.expect("session notice should arrive");
        assert_eq!(report.down, Some(DownReason::PeerDisconnected));
    }
}

/// LOCKSTEP TESTS
mod lockstep_tests {
    use super::*;

    /// Tests that the simulation holds at the barrier until every player
    /// has confirmed, then advances with the income update
    #[tokio::test]
    async fn advance_waits_for_every_confirmation() {
        let addr = start_server(2).await;

        let mut r1 = RawClient::join(addr).await;
        let mut r2 = RawClient::join(addr).await;
        r1.collect_tick().await;
        r2.collect_tick().await;

        r1.send(&Message::TickConfirm { tick: 1 }).await;
        assert!(
            r1.recv_within(Duration::from_millis(300)).await.is_none(),
            "server advanced before every player confirmed"
        );

        r2.send(&Message::TickConfirm { tick: 1 }).await;
        let events = r1.collect_tick().await;
        assert!(
            events.contains(&Message::ResourceUpdate {
                minerals: 202,
                energy: 50
            }),
            "headquarters income should arrive with the advance: {:?}",
            events
        );
        assert_eq!(events.last(), Some(&Message::TickAdvance { tick: 2 }));

        let events = r2.collect_tick().await;
        assert_eq!(events.last(), Some(&Message::TickAdvance { tick: 2 }));
    }

    /// Tests a build order end to end: placement event, the mineral debit,
    /// and the power plant's energy income
    #[tokio::test]
    async fn build_order_flow() {
        let addr = start_server(1).await;

        let mut player = RawClient::join(addr).await;
        let batch = player.collect_tick().await;
        assert!(batch.contains(&Message::GameStart { tick: 1 }));
        assert!(batch.contains(&Message::ResourceUpdate {
            minerals: 200,
            energy: 50
        }));
        assert_eq!(created_ids(&batch), vec![1, 2, 3]);

        // (4, 4) sits inside the cleared ground around the slot 0 spawn.
        player.send(&Message::BuildOrder { kind: 2, x: 4, y: 4 }).await;
        player.send(&Message::TickConfirm { tick: 1 }).await;

        let events = player.collect_tick().await;
        assert!(
            events.contains(&Message::EntityCreated {
                id: 4,
                kind: 2,
                owner: 0,
                x: 4,
                y: 4
            }),
            "power plant should be placed: {:?}",
            events
        );
        // 200 - 100 cost + 2 headquarters income; 50 + 1 from the new plant.
        assert!(
            events.contains(&Message::ResourceUpdate {
                minerals: 102,
                energy: 51
            }),
            "balances should reflect the build: {:?}",
            events
        );
        assert_eq!(events.last(), Some(&Message::TickAdvance { tick: 2 }));
    }

    /// Tests that each player's opening batch and movement events stay
    /// inside their own fog of war
    #[tokio::test]
    async fn fog_hides_the_opponent() {
        let addr = start_server(2).await;

        let mut r1 = RawClient::join(addr).await;
        let mut r2 = RawClient::join(addr).await;
        let batch1 = r1.collect_tick().await;
        let batch2 = r2.collect_tick().await;

        // Starting units are numbered in slot order, and neither player
        // hears about the other's.
        assert_eq!(created_ids(&batch1), vec![1, 2, 3]);
        assert_eq!(created_ids(&batch2), vec![4, 5, 6]);

        // Slot 0's worker (id 2) takes a step; only its owner hears.
        r1.send(&Message::MoveOrder { unit: 2, x: 6, y: 2 }).await;
        r1.send(&Message::TickConfirm { tick: 1 }).await;
        r2.send(&Message::TickConfirm { tick: 1 }).await;

        let events1 = r1.collect_tick().await;
        assert!(
            events1.contains(&Message::EntityMoved { id: 2, x: 4, y: 2 }),
            "owner should see the step: {:?}",
            events1
        );

        let events2 = r2.collect_tick().await;
        for event in &events2 {
            assert!(
                matches!(
                    event,
                    Message::ResourceUpdate { .. } | Message::TickAdvance { .. }
                ),
                "opponent should not hear about the move: {:?}",
                event
            );
        }
    }

    /// Tests that a stalled player trips the tick timeout and everyone is
    /// told the session is over
    #[tokio::test]
    async fn stalled_confirmation_tears_session_down() {
        let mut config = test_config(2);
        config.tick_timeout = Some(Duration::from_millis(200));
        let addr = start_server_with(config).await;

        let mut r1 = RawClient::join(addr).await;
        let mut r2 = RawClient::join(addr).await;
        r1.collect_tick().await;
        r2.collect_tick().await;

        // One player confirms, the other goes silent.
        r1.send(&Message::TickConfirm { tick: 1 }).await;

        match r1.recv().await {
            Message::SessionDown { reason } => assert_eq!(reason, DownReason::TickTimeout),
            other => panic!("expected the session to go down, got {:?}", other),
        }
        match r2.recv().await {
            Message::SessionDown { reason } => assert_eq!(reason, DownReason::TickTimeout),
            other => panic!("expected the session to go down, got {:?}", other),
        }
    }
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests that an oversized length word closes the connection
    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let addr = start_server(2).await;

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&65u32.to_be_bytes()); // past the payload cap
        stream.write_all(&bytes).await.expect("send");

        expect_stream_eof(&mut stream).await;
    }

    /// Tests that a corrupt checksum closes the connection
    #[tokio::test]
    async fn corrupt_checksum_closes_connection() {
        let addr = start_server(2).await;

        let mut bytes = Message::JoinRequest {
            version: PROTOCOL_VERSION,
        }
        .encode()
        .encode()
        .expect("encode");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(&bytes).await.expect("send");

        expect_stream_eof(&mut stream).await;
    }

    /// Tests that a garbage-spewing stranger cannot disturb a running game
    #[tokio::test]
    async fn garbage_client_does_not_disturb_game() {
        let addr = start_server(1).await;

        let mut player = RawClient::join(addr).await;
        player
            .recv_until(|m| matches!(m, Message::TickAdvance { .. }))
            .await;

        let mut stranger = TcpStream::connect(addr).await.expect("connect");
        let mut junk = Vec::new();
        junk.extend_from_slice(&7u32.to_be_bytes());
        junk.extend_from_slice(&9999u32.to_be_bytes());
        stranger.write_all(&junk).await.expect("send");
        expect_stream_eof(&mut stranger).await;

        // The game carries on for the actual player.
        player.send(&Message::TickConfirm { tick: 1 }).await;
        let events = player.collect_tick().await;
        assert_eq!(events.last(), Some(&Message::TickAdvance { tick: 2 }));
    }

    /// Tests that a well-formed frame carrying an unrecognized tag ends the
    /// connection instead of being shrugged off
    #[tokio::test]
    async fn unknown_tag_in_game_closes_connection() {
        let addr = start_server(1).await;

        let mut player = RawClient::join(addr).await;
        player.collect_tick().await;

        // Valid framing and checksum around a tag the protocol never uses.
        player.send_frame(&Frame::new(99, vec![0xDEAD_BEEF])).await;
        player.send(&Message::TickConfirm { tick: 1 }).await;

        player.expect_eof().await;
    }
}

// HELPER FUNCTIONS

fn test_config(required: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        required_players: required,
        map_width: 32,
        map_height: 32,
        map_seed: 7,
        tick_timeout: None,
        time_sync: true,
    }
}

async fn start_server(required: usize) -> SocketAddr {
    start_server_with(test_config(required)).await
}

async fn start_server_with(config: ServerConfig) -> SocketAddr {
    let mut server = Server::bind(config).await.expect("server should bind");
    let addr = server.local_addr().expect("listener has an address");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

fn created_ids(events: &[Message]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|m| match m {
            Message::EntityCreated { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

/// A frame-level client that sends exactly what a test tells it to.
struct RawClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RawClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        RawClient {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Connects and completes the handshake, returning at the first lobby
    /// status.
    async fn join(addr: SocketAddr) -> Self {
        let mut client = RawClient::connect(addr).await;
        client
            .send(&Message::JoinRequest {
                version: PROTOCOL_VERSION,
            })
            .await;
        loop {
            match client.recv().await {
                Message::JoinAccept { .. } => {}
                Message::TimeSync { round, token } => {
                    client.send(&Message::TimeSyncAck { round, token }).await;
                }
                Message::LobbyStatus { .. } => return client,
                other => panic!("unexpected handshake message: {:?}", other),
            }
        }
    }

    async fn send(&mut self, message: &Message) {
        self.send_frame(&message.encode()).await;
    }

    /// Sends a frame as-is, bypassing the message layer.
    async fn send_frame(&mut self, frame: &Frame) {
        let bytes = frame.encode().expect("encode");
        self.writer.write_all(&bytes).await.expect("send");
    }

    async fn recv(&mut self) -> Message {
        self.recv_within(RECV_TIMEOUT)
            .await
            .expect("timed out waiting for a message")
    }

    /// Reads one message, or None if nothing arrives in time.
    async fn recv_within(&mut self, wait: Duration) -> Option<Message> {
        match timeout(wait, Frame::read_from(&mut self.reader)).await {
            Ok(result) => {
                let frame = result.expect("read frame");
                Some(Message::decode(&frame).expect("decode"))
            }
            Err(_) => None,
        }
    }

    /// Reads until the predicate matches, returning the matching message.
    async fn recv_until(&mut self, want: impl Fn(&Message) -> bool) -> Message {
        loop {
            let message = self.recv().await;
            if want(&message) {
                return message;
            }
        }
    }

    /// Collects everything up to and including the next tick advance.
    async fn collect_tick(&mut self) -> Vec<Message> {
        let mut events = Vec::new();
        loop {
            let message = self.recv().await;
            let done = matches!(message, Message::TickAdvance { .. });
            events.push(message);
            if done {
                return events;
            }
        }
    }

    /// Asserts that the server closes the connection.
    async fn expect_eof(&mut self) {
        let result = timeout(RECV_TIMEOUT, Frame::read_from(&mut self.reader))
            .await
            .expect("timed out waiting for the server to close");
        assert!(
            result.is_err(),
            "expected the connection to close, got {:?}",
            result
        );
    }
}

async fn expect_stream_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = timeout(RECV_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("timed out waiting for the server to close");
    assert_eq!(read.expect("read"), 0, "expected a clean close");
}
