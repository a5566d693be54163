#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: length boundaries, corrupt streams, resource limits and
//! misuse of the connection lifecycle

use framelink::config::TransportConfig;
use framelink::core::codec::FrameCodec;
use framelink::core::frame::{encode_length, FrameHeader, RawFrame, MAX_FRAME_LENGTH};
use framelink::core::pipeline::{KeyRing, Pipeline, TransformSet};
use framelink::core::serialization::SerializationRegistry;
use framelink::prelude::*;
use framelink::protocol::connection::Direction;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;

const WAIT: Duration = Duration::from_secs(10);

/// A server connection whose peer is a raw byte pipe under the test's control
fn server_with_raw_peer(
    config: ProtocolConfig,
) -> (
    Arc<ProtocolContext>,
    Connection,
    DuplexStream,
    mpsc::UnboundedReceiver<Disconnection>,
) {
    let ctx = ProtocolContext::new(config);
    let server = Connection::new(ctx.clone(), Role::Server);
    let (tx, rx) = mpsc::unbounded_channel();
    server.on_disconnect(move |_, disconnection| {
        let _ = tx.send(disconnection.clone());
    });

    let (server_end, raw) = tokio::io::duplex(64 * 1024);
    server.attach(server_end).unwrap();
    (ctx, server, raw, rx)
}

async fn disconnection(rx: &mut mpsc::UnboundedReceiver<Disconnection>) -> Disconnection {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for retirement")
        .expect("listener dropped")
}

// ============================================================================
// LENGTH CODEC BOUNDARIES
// ============================================================================

#[test]
fn test_length_boundaries() {
    assert_eq!(encode_length(0).unwrap(), [0, 0, 0]);
    assert_eq!(encode_length(1).unwrap(), [1, 0, 0]);
    assert_eq!(encode_length(254).unwrap(), [254, 0, 0]);
    assert_eq!(encode_length(255).unwrap(), [0, 1, 0]);
    assert_eq!(encode_length(MAX_FRAME_LENGTH).unwrap(), [255, 255, 255]);
    assert!(matches!(
        encode_length(MAX_FRAME_LENGTH + 1),
        Err(ProtocolError::InvalidLength(_))
    ));
}

#[test]
fn test_ceiling_sized_frame_is_encodable() {
    let header = FrameHeader::new(
        SerializationKind::Bincode,
        CompressionKind::None,
        EncryptionKind::None,
    );
    let bytes = RawFrame::new(header, vec![0xAB; MAX_FRAME_LENGTH])
        .to_bytes()
        .unwrap();
    assert_eq!(&bytes[3..6], &[255, 255, 255]);
    assert!(RawFrame::new(header, vec![0; MAX_FRAME_LENGTH + 1])
        .to_bytes()
        .is_err());
}

// ============================================================================
// TRANSFORM LIMITS
// ============================================================================

#[test]
fn test_oversized_payload_is_refused_before_the_wire() {
    let transport = TransportConfig {
        max_frame_length: 1024,
        ..TransportConfig::default()
    };
    let pipeline = Pipeline::new(SerializationRegistry::with_defaults(), &transport);
    let message = Message::ok(class::FIRST_AVAILABLE, 0, vec![Value::Bytes(vec![7; 4096])]);

    let err = pipeline
        .encode(&KeyRing::new(), &message, TransformSet::plain())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedPacket(n) if n > 1024));
}

#[test]
fn test_compression_below_threshold_is_skipped() {
    let transport = TransportConfig {
        compression_threshold_bytes: 1024,
        ..TransportConfig::default()
    };
    let pipeline = Pipeline::new(SerializationRegistry::with_defaults(), &transport);
    let transforms = TransformSet {
        compression: CompressionKind::Zstd,
        ..TransformSet::plain()
    };

    let small = Message::ok(class::FIRST_AVAILABLE, 0, vec![Value::from("tiny")]);
    let large = Message::ok(class::FIRST_AVAILABLE, 0, vec![Value::Bytes(vec![1; 4096])]);

    let keys = KeyRing::new();
    let small_frame = pipeline.encode(&keys, &small, transforms).unwrap().frame;
    let large_frame = pipeline.encode(&keys, &large, transforms).unwrap().frame;
    assert_eq!(small_frame.header.compression, CompressionKind::None);
    assert_eq!(large_frame.header.compression, CompressionKind::Zstd);
    assert!(large_frame.payload.len() < 4096);
}

#[test]
fn test_wrong_session_key_fails_to_decrypt() {
    use framelink::utils::crypto::SessionKey;

    let pipeline = Pipeline::default();
    let mut sender = KeyRing::new();
    sender.set_session(SessionKey::generate().unwrap());
    let mut receiver = KeyRing::new();
    receiver.set_session(SessionKey::generate().unwrap());

    let transforms = TransformSet {
        encryption: EncryptionKind::Symmetric,
        ..TransformSet::plain()
    };
    let frame = pipeline
        .encode(&sender, &Message::ok(class::SYSTEM, 0, vec![]), transforms)
        .unwrap()
        .frame;
    let err = pipeline.decode(&receiver, frame).unwrap_err();
    assert!(err.is_fatal());
}

// ============================================================================
// CORRUPT STREAMS
// ============================================================================

#[tokio::test]
async fn test_zero_length_frame_retires_connection() {
    let (ctx, server, mut raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());

    raw.write_all(&[1, 1, 1, 0, 0, 0]).await.unwrap();

    let gone = disconnection(&mut rx).await;
    assert!(!gone.expected);
    assert!(gone.reason.contains("zero-length"));
    assert!(!server.is_alive());

    let metrics = ctx.metrics().snapshot();
    assert_eq!(metrics.framing_errors, 1);
    assert_eq!(metrics.handshakes_failed, 1);
    assert_eq!(metrics.connections_active, 0);
}

#[tokio::test]
async fn test_corrupt_peer_receives_malformed_notice() {
    let (_ctx, _server, raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());
    let (reader, mut writer) = tokio::io::split(raw);

    // Sentinel serialization id
    writer.write_all(&[0, 1, 1, 4, 0, 0, b'd', b'a', b't', b'a']).await.unwrap();
    disconnection(&mut rx).await;

    let mut frames = FramedRead::new(reader, FrameCodec::default());
    let frame = timeout(WAIT, frames.next())
        .await
        .unwrap()
        .expect("notice frame")
        .unwrap();
    let notice = Pipeline::default().decode(&KeyRing::new(), frame).unwrap();

    assert_eq!(notice.route(), (class::AUTH, control::DISCONNECT));
    assert_eq!(notice.outcome(), Outcome::MALFORMED);
    assert!(notice.payload()[0]
        .as_str()
        .unwrap()
        .contains("Critical reading error"));
}

#[tokio::test]
async fn test_unknown_transform_id_retires_connection() {
    let (_ctx, _server, mut raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());

    raw.write_all(&[1, 9, 1, 2, 0, 0, 0xFF, 0xFF]).await.unwrap();

    let gone = disconnection(&mut rx).await;
    assert!(!gone.expected);
    assert!(gone.reason.contains("Unknown compression id: 9"));
}

#[tokio::test]
async fn test_advertised_length_over_limit_retires_connection() {
    let config = ProtocolConfig::default_with_overrides(|c| {
        c.transport.max_frame_length = 1024;
        c.transport.compression_threshold_bytes = 0;
    });
    let (_ctx, _server, mut raw, mut rx) = server_with_raw_peer(config);

    let mut bytes = vec![1, 1, 1];
    bytes.extend(encode_length(1_000_000).unwrap());
    raw.write_all(&bytes).await.unwrap();

    let gone = disconnection(&mut rx).await;
    assert!(!gone.expected);
    assert!(gone.reason.contains("exceeds"));
}

#[tokio::test]
async fn test_undecodable_payload_retires_connection() {
    let (_ctx, _server, mut raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());

    // Well-formed frame whose payload is not MessagePack
    let header = FrameHeader::new(
        SerializationKind::MessagePack,
        CompressionKind::None,
        EncryptionKind::None,
    );
    let bytes = RawFrame::new(header, vec![0xC1; 16]).to_bytes().unwrap();
    raw.write_all(&bytes).await.unwrap();

    assert!(!disconnection(&mut rx).await.expected);
}

#[tokio::test]
async fn test_peer_eof_is_unexpected() {
    let (_ctx, server, raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());
    drop(raw);

    let gone = disconnection(&mut rx).await;
    assert_eq!(gone, Disconnection::unexpected("Connection closed by peer"));
    assert!(matches!(
        server.wait_ready().await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_partial_frame_then_eof() {
    let (_ctx, _server, mut raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());

    raw.write_all(&[1, 1]).await.unwrap();
    drop(raw);

    assert!(!disconnection(&mut rx).await.expected);
}

#[tokio::test]
async fn test_handshake_survives_arbitrary_write_splits() {
    use framelink::utils::crypto::KeyPair;
    use rand::Rng;

    let (_ctx, server, raw, _rx) = server_with_raw_peer(ProtocolConfig::default());
    let (reader, mut writer) = tokio::io::split(raw);

    let client_key = KeyPair::generate();
    let hello = Message::ok(
        class::AUTH,
        control::PUBLIC_KEY,
        vec![Value::Bytes(client_key.public_bytes().to_vec())],
    );
    let bytes = Pipeline::default()
        .encode(&KeyRing::new(), &hello, TransformSet::plain())
        .unwrap()
        .frame
        .to_bytes()
        .unwrap();

    let mut rng = rand::rng();
    let mut offset = 0;
    while offset < bytes.len() {
        let n = rng.random_range(1..=7).min(bytes.len() - offset);
        writer.write_all(&bytes[offset..offset + n]).await.unwrap();
        writer.flush().await.unwrap();
        offset += n;
        tokio::task::yield_now().await;
    }

    let mut frames = FramedRead::new(reader, FrameCodec::default());
    let pipeline = Pipeline::default();
    let mut replies = Vec::new();
    for _ in 0..2 {
        let frame = timeout(WAIT, frames.next()).await.unwrap().unwrap().unwrap();
        replies.push(pipeline.decode(&KeyRing::new(), frame).unwrap());
    }

    assert_eq!(replies[0].route(), (class::AUTH, control::PUBLIC_KEY));
    assert_eq!(replies[1].route(), (class::AUTH, control::SYMMETRIC_KEY));
    assert_eq!(server.handshake_state(), HandshakeState::SymmetricKeyIssued);
}

// ============================================================================
// LIFECYCLE MISUSE
// ============================================================================

#[test]
fn test_attach_requires_runtime() {
    let ctx = ProtocolContext::new(ProtocolConfig::default());
    let connection = Connection::new(ctx, Role::Server);
    let (a, _b) = tokio::io::duplex(1024);

    let err = connection.attach(a).unwrap_err();
    assert!(err.to_string().contains("No Tokio runtime"));
    assert!(connection.is_alive());
}

#[tokio::test]
async fn test_attach_twice_fails() {
    let ctx = ProtocolContext::new(ProtocolConfig::default());
    let connection = Connection::new(ctx, Role::Server);
    let (a, _a_peer) = tokio::io::duplex(1024);
    let (b, _b_peer) = tokio::io::duplex(1024);

    connection.attach(a).unwrap();
    assert!(connection.attach(b).is_err());
}

#[tokio::test]
async fn test_retired_connection_rejects_sends() {
    let (_ctx, server, raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());
    drop(raw);
    disconnection(&mut rx).await;

    assert!(matches!(
        server.send(Message::ok(class::FIRST_AVAILABLE, 0, vec![])),
        Err(ProtocolError::ConnectionClosed)
    ));
    // Disconnecting twice is a no-op
    assert!(server.disconnect("again").is_ok());
    assert!(rx.try_recv().is_err(), "listeners fire once");
}

#[tokio::test]
async fn test_queued_messages_dropped_on_retire() {
    let (_ctx, server, raw, mut rx) = server_with_raw_peer(ProtocolConfig::default());
    for i in 0..5u8 {
        server
            .send(Message::ok(class::FIRST_AVAILABLE, i, vec![]))
            .unwrap();
    }
    assert_eq!(server.frames_sent(), 0);

    drop(raw);
    disconnection(&mut rx).await;
    assert_eq!(server.frames_sent(), 0);
}

// ============================================================================
// EXCHANGE LOG
// ============================================================================

async fn ready_pair(config: ProtocolConfig) -> (Connection, Connection) {
    let server = Connection::new(ProtocolContext::new(config.clone()), Role::Server);
    let client = Connection::new(ProtocolContext::new(config), Role::Client);
    let (a, b) = tokio::io::duplex(64 * 1024);
    server.attach(a).unwrap();
    client.attach(b).unwrap();
    timeout(WAIT, server.wait_ready()).await.unwrap().unwrap();
    timeout(WAIT, client.wait_ready()).await.unwrap().unwrap();
    (server, client)
}

#[tokio::test]
async fn test_exchange_log_is_bounded() {
    let config = ProtocolConfig::default_with_overrides(|c| {
        c.connection.exchange_log_capacity = 4;
    });
    let (server, _client) = ready_pair(config).await;

    for i in 0..10u8 {
        server
            .send(Message::ok(class::FIRST_AVAILABLE, i, vec![]))
            .unwrap();
    }

    let log = server.exchange_log();
    assert_eq!(log.len(), 4);
    assert!(log.iter().all(|r| r.direction == Direction::Sent));
    let subclasses: Vec<u8> = log.iter().map(|r| r.message.subclass()).collect();
    assert_eq!(subclasses, vec![6, 7, 8, 9]);
}

#[tokio::test]
async fn test_exchange_log_disabled() {
    let config = ProtocolConfig::default_with_overrides(|c| {
        c.connection.log_exchanges = false;
    });
    let (server, client) = ready_pair(config).await;
    server.ping().unwrap();

    assert!(server.exchange_log().is_empty());
    assert!(client.exchange_log().is_empty());
    assert!(server.frames_sent() > 0);
}
