// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::ProtocolConfig;
use crate::core::serialization::SerializationKind;
use crate::protocol::connection::{Connection, Disconnection, Role};
use crate::protocol::context::ProtocolContext;
use crate::protocol::handshake::HandshakeState;
use crate::protocol::message::{class, control, Message, Outcome, Value};
use crate::utils::crypto::KeyPair;
use std::sync::Arc;

fn context() -> Arc<ProtocolContext> {
    ProtocolContext::new(ProtocolConfig::default())
}

fn control_message(subclass: u8, payload: Vec<Value>) -> Message {
    Message::ok(class::AUTH, subclass, payload)
}

#[test]
fn test_handshake_states_are_ordered() {
    let states = [
        HandshakeState::Init,
        HandshakeState::LocalKeySent,
        HandshakeState::PeerKeyReceived,
        HandshakeState::SymmetricKeyIssued,
        HandshakeState::SymmetricKeyReceived,
        HandshakeState::HandshakeConfirmed,
        HandshakeState::IdentityDispatched,
        HandshakeState::Ready,
    ];
    assert!(states.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_public_key_on_server_issues_session_key() {
    let ctx = context();
    let server = Connection::new(ctx.clone(), Role::Server);
    let client_pair = KeyPair::generate();

    let effects = {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(
                &mut session,
                &control_message(
                    control::PUBLIC_KEY,
                    vec![Value::Bytes(client_pair.public_bytes().to_vec())],
                ),
            )
            .unwrap()
    };

    assert!(!effects.ready);
    assert_eq!(server.handshake_state(), HandshakeState::SymmetricKeyIssued);
    assert!(server.session_fingerprint().is_some());
    // Own public key, then the sealed session key
    assert_eq!(server.frames_sent(), 2);
}

#[test]
fn test_symmetric_key_on_authoritative_side_is_ignored() {
    let ctx = context();
    let server = Connection::new(ctx.clone(), Role::Server);

    let effects = {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(
                &mut session,
                &control_message(control::SYMMETRIC_KEY, vec![Value::Bytes(vec![7; 88])]),
            )
            .unwrap()
    };

    assert!(effects.retire.is_none());
    assert_eq!(server.handshake_state(), HandshakeState::Init);
    assert!(server.session_fingerprint().is_none());
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
}

#[test]
fn test_confirmation_before_key_is_ignored() {
    let ctx = context();
    let server = Connection::new(ctx.clone(), Role::Server);

    {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(&mut session, &control_message(control::CONFIRM, vec![]))
            .unwrap();
    }

    assert_eq!(server.handshake_state(), HandshakeState::Init);
    assert_eq!(server.frames_sent(), 0);
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
}

#[test]
fn test_malformed_public_key_is_ignored() {
    let ctx = context();
    let server = Connection::new(ctx.clone(), Role::Server);

    {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(
                &mut session,
                &control_message(control::PUBLIC_KEY, vec![Value::Bytes(vec![1; 5])]),
            )
            .unwrap();
    }

    assert_eq!(server.handshake_state(), HandshakeState::Init);
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
}

#[test]
fn test_start_handshake_twice_sends_one_key() {
    let ctx = context();
    let client = Connection::new(ctx.clone(), Role::Client);

    client.start_handshake().unwrap();
    client.start_handshake().unwrap();

    assert_eq!(client.handshake_state(), HandshakeState::LocalKeySent);
    assert_eq!(client.frames_sent(), 1);
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
}

#[test]
fn test_sends_before_ready_are_held_back() {
    let client = Connection::new(context(), Role::Client);

    for i in 0..3u8 {
        client
            .send(Message::ok(class::FIRST_AVAILABLE, i, vec![Value::from(i)]))
            .unwrap();
    }
    assert_eq!(client.frames_sent(), 0);

    // Control traffic is never queued
    client.start_handshake().unwrap();
    assert_eq!(client.frames_sent(), 1);
}

#[test]
fn test_disconnect_control_carries_reason() {
    let server = Connection::new(context(), Role::Server);

    let (with_reason, without_reason) = {
        let mut session = server.lock_session().unwrap();
        let a = server
            .handle_control(
                &mut session,
                &control_message(control::DISCONNECT, vec![Value::from("bye")]),
            )
            .unwrap();
        let b = server
            .handle_control(&mut session, &control_message(control::DISCONNECT, vec![]))
            .unwrap();
        (a, b)
    };

    assert_eq!(with_reason.retire, Some(Disconnection::expected("bye")));
    assert_eq!(
        without_reason.retire,
        Some(Disconnection::expected("No reason specified"))
    );
}

#[test]
fn test_change_serialization_is_adopted_silently() {
    let client = Connection::new(context(), Role::Client);

    {
        let mut session = client.lock_session().unwrap();
        client
            .handle_control(
                &mut session,
                &control_message(
                    control::CHANGE_SERIALIZATION,
                    vec![Value::U8(SerializationKind::Json.id())],
                ),
            )
            .unwrap();
    }

    assert_eq!(
        client.default_transforms().unwrap().serialization,
        SerializationKind::Json
    );
    assert_eq!(client.frames_sent(), 0);
}

#[test]
fn test_admin_signature_before_ready_is_ignored() {
    let ctx = context();
    let server = Connection::new(ctx.clone(), Role::Server);

    let effects = {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(
                &mut session,
                &Message::new(
                    Outcome::OK,
                    class::AUTH,
                    control::ADMIN_SIGNATURE,
                    vec![Value::Bytes(vec![0; 90])],
                ),
            )
            .unwrap()
    };

    assert!(!effects.admin_granted);
    assert!(!server.is_admin());
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
}

#[test]
fn test_rotation_requires_ready_authoritative_side() {
    let client = Connection::new(context(), Role::Client);
    assert!(client.rotate_session_key().is_err());

    let server = Connection::new(context(), Role::Server);
    assert!(server.rotate_key_pair().is_err());
    assert!(server.rotate_session_key().is_err());
}

#[test]
fn test_client_registers_under_provisional_id() {
    let ctx = context();
    let client = Connection::new(ctx.clone(), Role::Client);
    let server = Connection::new(ctx.clone(), Role::Server);

    assert!(ctx.connection(client.id()).unwrap().is_some());
    assert!(ctx.connection(server.id()).unwrap().is_none());
    assert_ne!(client.id(), server.id());
}

#[test]
fn test_hash_secret_without_salt_is_sha256() {
    let client = Connection::new(context(), Role::Client);
    assert!(client.salt().is_none());
    assert_eq!(
        client.hash_secret("abc").unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

// ===== KEY PAIR ROTATION =====

/// Pretend the handshake finished with `peer` as the remote public key
fn force_ready(connection: &Connection, peer: &KeyPair) {
    let mut session = connection.lock_session().unwrap();
    session.keys.set_local(KeyPair::generate());
    session.keys.set_peer_public(peer.public_bytes());
    session.handshake = HandshakeState::Ready;
}

fn public_key_message(pair: &KeyPair) -> Message {
    control_message(
        control::PUBLIC_KEY,
        vec![Value::Bytes(pair.public_bytes().to_vec())],
    )
}

#[test]
fn test_repeated_server_key_does_not_rotate_client() {
    let ctx = context();
    let client = Connection::new(ctx.clone(), Role::Client);
    let server_pair = KeyPair::generate();
    force_ready(&client, &server_pair);
    let local_before = client.lock_session().unwrap().keys.local().unwrap().public_bytes();

    let effects = {
        let mut session = client.lock_session().unwrap();
        client
            .handle_control(&mut session, &public_key_message(&server_pair))
            .unwrap()
    };

    assert!(!effects.key_rotated);
    assert_eq!(client.frames_sent(), 0);
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
    let local_after = client.lock_session().unwrap().keys.local().unwrap().public_bytes();
    assert_eq!(local_before, local_after);
}

#[test]
fn test_new_server_key_rotates_client() {
    let client = Connection::new(context(), Role::Client);
    force_ready(&client, &KeyPair::generate());

    let effects = {
        let mut session = client.lock_session().unwrap();
        client
            .handle_control(&mut session, &public_key_message(&KeyPair::generate()))
            .unwrap()
    };

    assert!(effects.key_rotated);
    // Fresh client key goes back to the server
    assert_eq!(client.frames_sent(), 1);
    assert!(client.lock_session().unwrap().keys.has_retired_local());
}

#[test]
fn test_server_keeps_old_pair_until_client_replies() {
    let ctx = context();
    let server = Connection::new(ctx.clone(), Role::Server);
    let client_pair = KeyPair::generate();
    force_ready(&server, &client_pair);

    server.rotate_key_pair().unwrap();
    assert!(server.lock_session().unwrap().keys.has_retired_local());

    // A replay of the client's current key is not the reply
    let replay = {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(&mut session, &public_key_message(&client_pair))
            .unwrap()
    };
    assert!(!replay.key_rotated);
    assert_eq!(ctx.metrics().snapshot().suspicious_messages, 1);
    {
        let session = server.lock_session().unwrap();
        assert!(session.rotation.is_some());
        assert!(session.keys.has_retired_local());
    }

    let reply = {
        let mut session = server.lock_session().unwrap();
        server
            .handle_control(&mut session, &public_key_message(&KeyPair::generate()))
            .unwrap()
    };
    assert!(reply.key_rotated);
    let session = server.lock_session().unwrap();
    assert!(session.rotation.is_none());
    assert!(!session.keys.has_retired_local());
}
