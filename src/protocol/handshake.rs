//! In-band key exchange run over the AUTH class.
//!
//! The handshake establishes a symmetric session key under asymmetric protection and
//! reconciles the connection identifier between both ends:
//!
//! ```text
//! client                                   server (authoritative)
//!   PUBLIC_KEY(client pub)      ──▶
//!                               ◀──        PUBLIC_KEY(server pub)
//!                               ◀──        SYMMETRIC_KEY(sealed to client pub)
//!   CONFIRM                     ──▶
//!                               ◀──        IDENTITY(canonical id, salt)
//! ```
//!
//! **Per-Connection State**
//! All state lives in the connection's session and is only touched under its lock.
//! States only move forward; control traffic that does not fit the current state is
//! logged as suspicious and dropped without changing anything.
//!
//! ## Security
//! - Key material is generated from the operating system RNG
//! - The session key crosses the wire only sealed to the peer's X25519 key
//! - Admin credentials are sealed to the authoritative side's public key

use crate::core::pipeline::TransformSet;
use crate::core::serialization::SerializationKind;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::{Connection, Disconnection, Role, Session};
use crate::protocol::credentials::generate_salt;
use crate::protocol::message::{class, control, Message, Outcome, Value};
use crate::utils::compression::CompressionKind;
use crate::utils::crypto::{self, EncryptionKind, KeyPair, SessionKey, KEY_LEN};
use tracing::{debug, info, instrument, warn};

/// Handshake progress, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandshakeState {
    Init,
    /// Our public key is out (initiator only)
    LocalKeySent,
    PeerKeyReceived,
    /// Authoritative side only
    SymmetricKeyIssued,
    SymmetricKeyReceived,
    HandshakeConfirmed,
    IdentityDispatched,
    Ready,
}

/// Key rotation started by the authoritative side on a ready connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    SessionKey,
    KeyPair,
}

/// Follow-up work collected under the session lock and applied after it is released
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) ready: bool,
    pub(crate) key_rotated: bool,
    pub(crate) admin_granted: bool,
    pub(crate) disconnect: Option<String>,
    pub(crate) retire: Option<Disconnection>,
}

fn key_arg(message: &Message) -> Option<[u8; KEY_LEN]> {
    message
        .payload()
        .first()
        .and_then(Value::as_bytes)
        .and_then(|bytes| bytes.try_into().ok())
}

fn bytes_arg(message: &Message) -> Option<&[u8]> {
    message.payload().first().and_then(Value::as_bytes)
}

impl Connection {
    /// Generate the local key pair and send it. Only valid before any key exists.
    #[instrument(skip(self), fields(connection_id = self.id()))]
    pub fn start_handshake(&self) -> Result<()> {
        let mut session = self.lock_session()?;
        if session.handshake != HandshakeState::Init || session.keys.local().is_some() {
            self.suspicious("handshake already started");
            return Ok(());
        }

        self.send_local_key(&mut session)?;
        self.advance(&mut session, HandshakeState::LocalKeySent);
        debug!("Public key sent");
        Ok(())
    }

    /// Issue a fresh symmetric key on a ready connection. Authoritative side only.
    ///
    /// Application sends queue until the peer confirms the new key.
    #[instrument(skip(self), fields(connection_id = self.id()))]
    pub fn rotate_session_key(&self) -> Result<()> {
        let mut session = self.lock_session()?;
        self.check_rotation(&session)?;

        let key = self.seal_new_session_key(&mut session)?;
        session.keys.stage_session(key);
        session.rotation = Some(Rotation::SessionKey);
        debug!("Session key rotation started");
        Ok(())
    }

    /// Re-issue the local key pair on a ready connection. Authoritative side only.
    ///
    /// The peer answers with a fresh key pair of its own; application sends queue until then.
    #[instrument(skip(self), fields(connection_id = self.id()))]
    pub fn rotate_key_pair(&self) -> Result<()> {
        let mut session = self.lock_session()?;
        self.check_rotation(&session)?;

        self.send_local_key(&mut session)?;
        session.rotation = Some(Rotation::KeyPair);
        debug!("Key pair rotation started");
        Ok(())
    }

    /// Ask the authoritative side for admin rights.
    ///
    /// The outcome arrives asynchronously: `on_admin_granted` fires on acceptance, a
    /// refusal disconnects.
    pub fn request_admin(&self, password: &str) -> Result<()> {
        if self.role().is_authoritative() {
            return Err(ProtocolError::HandshakeError(
                "Admin rights are requested by the connecting side".to_string(),
            ));
        }

        let mut session = self.lock_session()?;
        if session.handshake != HandshakeState::Ready {
            return Err(ProtocolError::HandshakeError(constants::ERR_NOT_READY.to_string()));
        }
        let peer = *session
            .keys
            .peer_public()
            .ok_or(ProtocolError::MissingKey(constants::ERR_NO_PEER_PUBLIC_KEY))?;

        let sealed = crypto::seal(&peer, password.as_bytes())?;
        self.send_control(
            &mut session,
            control::ADMIN_SIGNATURE,
            Outcome::OK,
            vec![Value::Bytes(sealed)],
            EncryptionKind::Symmetric,
        )
    }

    /// Switch the default serialization of application messages, optionally telling the
    /// peer to do the same.
    pub fn change_serialization(&self, kind: SerializationKind, notify: bool) -> Result<()> {
        if !self.context().pipeline().serializers().contains(kind) {
            return Err(ProtocolError::UnknownTransform {
                family: "serialization",
                id: kind.id(),
            });
        }

        let mut session = self.lock_session()?;
        session.serialization = kind;
        if notify {
            self.send_control(
                &mut session,
                control::CHANGE_SERIALIZATION,
                Outcome::OK,
                vec![Value::U8(kind.id())],
                EncryptionKind::Symmetric,
            )?;
        }
        Ok(())
    }

    /// Run the handshake transition for one AUTH-class message.
    ///
    /// # Errors
    /// Only fatal conditions: a sealed key or credential that fails to open.
    pub(crate) fn handle_control(&self, session: &mut Session, message: &Message) -> Result<Effects> {
        match message.subclass() {
            control::PUBLIC_KEY => self.on_public_key(session, message),
            control::SYMMETRIC_KEY => self.on_symmetric_key(session, message),
            control::CONFIRM => self.on_confirm(session),
            control::IDENTITY => self.on_identity(session, message),
            control::ADMIN_SIGNATURE => self.on_admin_signature(session, message),
            control::CHANGE_SERIALIZATION => Ok(self.on_change_serialization(session, message)),
            control::DISCONNECT => Ok(Effects {
                retire: Some(Disconnection::expected(
                    message
                        .payload()
                        .first()
                        .and_then(Value::as_str)
                        .unwrap_or("No reason specified"),
                )),
                ..Effects::default()
            }),
            _ => Ok(self.ignore("unknown control sub-class")),
        }
    }

    fn on_public_key(&self, session: &mut Session, message: &Message) -> Result<Effects> {
        let Some(peer) = key_arg(message) else {
            return Ok(self.ignore("public key payload malformed"));
        };

        if session.keys.peer_public().is_none() {
            session.keys.set_peer_public(peer);
            self.advance(session, HandshakeState::PeerKeyReceived);

            if session.keys.local().is_none() {
                self.send_local_key(session)?;
            }
            if self.role().is_authoritative() && session.keys.session().is_none() {
                let key = self.seal_new_session_key(session)?;
                session.keys.set_session(key);
                self.advance(session, HandshakeState::SymmetricKeyIssued);
            }
            return Ok(Effects::default());
        }
        if session.keys.peer_public() == Some(&peer) {
            return Ok(self.ignore("duplicate public key"));
        }

        match self.role() {
            // The authoritative side rotated its key pair
            Role::Client if session.handshake == HandshakeState::Ready => {
                session.keys.set_peer_public(peer);
                self.send_local_key(session)?;
                Ok(Effects {
                    key_rotated: true,
                    ..Effects::default()
                })
            }
            Role::Server if session.rotation == Some(Rotation::KeyPair) => {
                // The peer sealed to our old key only before this reply
                session.keys.set_peer_public(peer);
                session.keys.drop_retired_local();
                session.rotation = None;
                self.flush_queue(session);
                Ok(Effects {
                    key_rotated: true,
                    ..Effects::default()
                })
            }
            _ => Ok(self.ignore("unexpected public key")),
        }
    }

    fn on_symmetric_key(&self, session: &mut Session, message: &Message) -> Result<Effects> {
        if self.role().is_authoritative() {
            return Ok(self.ignore("symmetric key offered to the authoritative side"));
        }
        let Some(sealed) = bytes_arg(message) else {
            return Ok(self.ignore("symmetric key payload malformed"));
        };
        if session.keys.local().is_none() {
            return Ok(self.ignore("symmetric key before a local key pair"));
        }

        let key = SessionKey::from_bytes(&session.keys.open_sealed(sealed)?)?;

        if session.handshake == HandshakeState::Ready {
            session.keys.replace_session(key);
            self.send_control(
                session,
                control::CONFIRM,
                Outcome::OK,
                Vec::new(),
                EncryptionKind::Symmetric,
            )?;
            return Ok(Effects {
                key_rotated: true,
                ..Effects::default()
            });
        }
        if session.keys.session().is_some() {
            return Ok(self.ignore("duplicate symmetric key"));
        }

        session.keys.set_session(key);
        self.advance(session, HandshakeState::SymmetricKeyReceived);
        self.send_control(
            session,
            control::CONFIRM,
            Outcome::OK,
            Vec::new(),
            EncryptionKind::Symmetric,
        )?;
        self.advance(session, HandshakeState::HandshakeConfirmed);
        Ok(Effects::default())
    }

    fn on_confirm(&self, session: &mut Session) -> Result<Effects> {
        if !self.role().is_authoritative() {
            return Ok(self.ignore("confirmation sent to the connecting side"));
        }

        if session.rotation == Some(Rotation::SessionKey) {
            session.keys.promote_staged();
            session.rotation = None;
            self.flush_queue(session);
            return Ok(Effects {
                key_rotated: true,
                ..Effects::default()
            });
        }

        if session.handshake != HandshakeState::SymmetricKeyIssued
            || session.keys.session().is_none()
        {
            return Ok(self.ignore("confirmation before a key exists"));
        }
        self.advance(session, HandshakeState::HandshakeConfirmed);

        let id = self.context().allocate_id();
        let salt = generate_salt();
        self.set_id(id);
        session.salt = Some(salt.clone());

        self.send_control(
            session,
            control::IDENTITY,
            Outcome::OK,
            vec![Value::U64(id), Value::Str(salt)],
            EncryptionKind::Symmetric,
        )?;
        self.context().connections().insert(id, self.clone())?;
        self.advance(session, HandshakeState::IdentityDispatched);
        self.become_ready(session);

        Ok(Effects {
            ready: true,
            ..Effects::default()
        })
    }

    fn on_identity(&self, session: &mut Session, message: &Message) -> Result<Effects> {
        if self.role().is_authoritative() || session.handshake != HandshakeState::HandshakeConfirmed
        {
            return Ok(self.ignore("unexpected identity"));
        }
        let payload = message.payload();
        let (Some(id), Some(salt)) = (
            payload.first().and_then(Value::as_u64),
            payload.get(1).and_then(Value::as_str),
        ) else {
            return Ok(self.ignore("identity payload malformed"));
        };

        let provisional = self.id();
        self.context().connections().rekey(provisional, id, self)?;
        self.set_id(id);
        session.salt = Some(salt.to_string());
        debug!(provisional, canonical = id, "Adopted canonical identifier");

        self.advance(session, HandshakeState::IdentityDispatched);
        self.become_ready(session);
        Ok(Effects {
            ready: true,
            ..Effects::default()
        })
    }

    fn on_admin_signature(&self, session: &mut Session, message: &Message) -> Result<Effects> {
        if session.handshake != HandshakeState::Ready {
            return Ok(self.ignore("admin signature before ready"));
        }

        if !self.role().is_authoritative() {
            let granted = message.outcome() == Outcome::ACK;
            self.set_admin(granted);
            if !granted {
                info!(outcome = message.outcome().name(), "Admin rights refused");
            }
            return Ok(Effects {
                admin_granted: granted,
                ..Effects::default()
            });
        }

        let Some(sealed) = bytes_arg(message) else {
            return Ok(self.ignore("admin signature payload malformed"));
        };
        if session.keys.local().is_none() {
            return Ok(self.ignore("admin signature without a local key pair"));
        }
        let credential = session.keys.open_sealed(sealed)?;

        let accepted = std::str::from_utf8(&credential)
            .map(|credential| self.context().verify_credential(credential))
            .unwrap_or(false);

        if accepted {
            self.set_admin(true);
            self.send_control(
                session,
                control::ADMIN_SIGNATURE,
                Outcome::ACK,
                Vec::new(),
                EncryptionKind::Symmetric,
            )?;
            info!(connection_id = self.id(), "Admin rights granted");
            Ok(Effects {
                admin_granted: true,
                ..Effects::default()
            })
        } else {
            self.send_control(
                session,
                control::ADMIN_SIGNATURE,
                Outcome::AUTH_DENIED,
                Vec::new(),
                EncryptionKind::Symmetric,
            )?;
            warn!(connection_id = self.id(), "Admin credential rejected");
            Ok(Effects {
                disconnect: Some(constants::ERR_WRONG_ADMIN_PASSWORD.to_string()),
                ..Effects::default()
            })
        }
    }

    fn on_change_serialization(&self, session: &mut Session, message: &Message) -> Effects {
        let kind = message
            .payload()
            .first()
            .and_then(Value::as_u8)
            .and_then(SerializationKind::from_id);

        match kind {
            Some(kind) if self.context().pipeline().serializers().contains(kind) => {
                debug!(serialization = kind.name(), "Peer changed default serialization");
                session.serialization = kind;
                Effects::default()
            }
            _ => self.ignore("unsupported serialization change"),
        }
    }

    /// Send an AUTH-class message, bypassing the pre-ready queue.
    ///
    /// Control messages always use the fallback serializer and no compression;
    /// encryption degrades to none while no key exists.
    pub(crate) fn send_control(
        &self,
        session: &mut Session,
        subclass: u8,
        outcome: Outcome,
        payload: Vec<Value>,
        encryption: EncryptionKind,
    ) -> Result<()> {
        let transforms = TransformSet {
            serialization: SerializationKind::FALLBACK,
            compression: CompressionKind::None,
            encryption,
            fallback_encryption: EncryptionKind::None,
        };
        let message = Message::new(outcome, class::AUTH, subclass, payload);
        self.transmit(session, message, transforms)
    }

    fn send_local_key(&self, session: &mut Session) -> Result<()> {
        let pair = KeyPair::generate();
        let public = pair.public_bytes();
        self.send_control(
            session,
            control::PUBLIC_KEY,
            Outcome::OK,
            vec![Value::Bytes(public.to_vec())],
            EncryptionKind::None,
        )?;
        session.keys.rotate_local(pair);
        Ok(())
    }

    /// Generate a session key and send it sealed to the peer's public key
    fn seal_new_session_key(&self, session: &mut Session) -> Result<SessionKey> {
        let peer = *session
            .keys
            .peer_public()
            .ok_or(ProtocolError::MissingKey(constants::ERR_NO_PEER_PUBLIC_KEY))?;
        let key = SessionKey::generate()?;
        let sealed = crypto::seal(&peer, key.as_bytes())?;
        self.send_control(
            session,
            control::SYMMETRIC_KEY,
            Outcome::OK,
            vec![Value::Bytes(sealed)],
            EncryptionKind::None,
        )?;
        Ok(key)
    }

    fn check_rotation(&self, session: &Session) -> Result<()> {
        if !self.role().is_authoritative() {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_AUTHORITATIVE_ONLY.to_string(),
            ));
        }
        if session.handshake != HandshakeState::Ready {
            return Err(ProtocolError::HandshakeError(constants::ERR_NOT_READY.to_string()));
        }
        if session.rotation.is_some() {
            return Err(ProtocolError::HandshakeError(
                "Key rotation already in progress".to_string(),
            ));
        }
        Ok(())
    }

    fn ignore(&self, what: &'static str) -> Effects {
        self.suspicious(what);
        Effects::default()
    }
}
