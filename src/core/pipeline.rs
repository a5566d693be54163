//! # Transform Pipeline
//!
//! Send side: serialize → compress → encrypt. Receive side runs the mirror image:
//! decrypt → decompress → deserialize.
//!
//! Every stage reports the transform it actually applied and the frame header is built
//! from those, never from what was requested:
//! - serialization falls back when the requested strategy refuses the payload
//! - compression is skipped below the configured threshold
//! - encryption walks requested → fallback → none until key material is present

use crate::config::TransportConfig;
use crate::core::frame::{FrameHeader, RawFrame, MAX_FRAME_LENGTH};
use crate::core::serialization::{SerializationKind, SerializationRegistry};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::Message;
use crate::utils::compression::{self, CompressionKind, DEFAULT_ZSTD_LEVEL};
use crate::utils::crypto::{self, EncryptionKind, KeyPair, SessionKey, KEY_LEN};
use tracing::debug;

/// Transforms requested for one outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSet {
    pub serialization: SerializationKind,
    pub compression: CompressionKind,
    pub encryption: EncryptionKind,
    /// Tried when `encryption` has no key material
    pub fallback_encryption: EncryptionKind,
}

impl TransformSet {
    /// Bincode, uncompressed, unencrypted. Always encodable.
    pub fn plain() -> Self {
        Self {
            serialization: SerializationKind::FALLBACK,
            compression: CompressionKind::None,
            encryption: EncryptionKind::None,
            fallback_encryption: EncryptionKind::None,
        }
    }
}

/// Key material held by one connection end.
#[derive(Debug, Default)]
pub struct KeyRing {
    local: Option<KeyPair>,
    /// Previous local pair, kept until the peer has seen its replacement
    retired_local: Option<KeyPair>,
    peer_public: Option<[u8; KEY_LEN]>,
    session: Option<SessionKey>,
    /// Pending key during a rotation we started, or the retired key after adopting one
    alternate: Option<SessionKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> Option<&KeyPair> {
        self.local.as_ref()
    }

    pub fn set_local(&mut self, pair: KeyPair) {
        self.local = Some(pair);
    }

    /// Install a new local pair; the old one still opens frames sealed before the swap
    pub fn rotate_local(&mut self, pair: KeyPair) {
        self.retired_local = self.local.replace(pair);
    }

    /// Forget the previous local pair once nothing sealed to it can still arrive
    pub fn drop_retired_local(&mut self) {
        self.retired_local = None;
    }

    pub fn has_retired_local(&self) -> bool {
        self.retired_local.is_some()
    }

    /// Open data sealed to our current or previous public key
    pub fn open_sealed(&self, data: &[u8]) -> Result<Vec<u8>> {
        let local = self
            .local
            .as_ref()
            .ok_or(ProtocolError::MissingKey(constants::ERR_NO_LOCAL_KEYPAIR))?;
        match (local.open(data), &self.retired_local) {
            (Ok(plain), _) => Ok(plain),
            (Err(_), Some(retired)) => retired.open(data),
            (Err(e), None) => Err(e),
        }
    }

    pub fn peer_public(&self) -> Option<&[u8; KEY_LEN]> {
        self.peer_public.as_ref()
    }

    pub fn set_peer_public(&mut self, key: [u8; KEY_LEN]) {
        self.peer_public = Some(key);
    }

    pub fn session(&self) -> Option<&SessionKey> {
        self.session.as_ref()
    }

    pub fn set_session(&mut self, key: SessionKey) {
        self.session = Some(key);
    }

    /// Stage a key that decrypts alongside the current one until promoted
    pub fn stage_session(&mut self, key: SessionKey) {
        self.alternate = Some(key);
    }

    /// Make the staged key current. Returns false when nothing was staged.
    pub fn promote_staged(&mut self) -> bool {
        match self.alternate.take() {
            Some(key) => {
                self.session = Some(key);
                true
            }
            None => false,
        }
    }

    /// Adopt a new session key, keeping the old one for in-flight frames
    pub fn replace_session(&mut self, key: SessionKey) {
        self.alternate = self.session.replace(key);
    }

    /// Whether `kind` can be used to encrypt right now
    pub fn can_encrypt(&self, kind: EncryptionKind) -> bool {
        match kind {
            EncryptionKind::None => true,
            EncryptionKind::Asymmetric => self.peer_public.is_some(),
            EncryptionKind::Symmetric => self.session.is_some(),
        }
    }

    /// Requested, then fallback, then none
    pub fn resolve_encryption(
        &self,
        requested: EncryptionKind,
        fallback: EncryptionKind,
    ) -> EncryptionKind {
        [requested, fallback]
            .into_iter()
            .find(|&kind| self.can_encrypt(kind))
            .unwrap_or(EncryptionKind::None)
    }

    pub fn encrypt(&self, kind: EncryptionKind, data: Vec<u8>) -> Result<Vec<u8>> {
        match kind {
            EncryptionKind::None => Ok(data),
            EncryptionKind::Asymmetric => {
                let peer = self
                    .peer_public
                    .as_ref()
                    .ok_or(ProtocolError::MissingKey(constants::ERR_NO_PEER_PUBLIC_KEY))?;
                crypto::seal(peer, &data)
            }
            EncryptionKind::Symmetric => self
                .session
                .as_ref()
                .ok_or(ProtocolError::MissingKey(constants::ERR_NO_SESSION_KEY))?
                .encrypt(&data),
        }
    }

    pub fn decrypt(&self, kind: EncryptionKind, data: Vec<u8>) -> Result<Vec<u8>> {
        match kind {
            EncryptionKind::None => Ok(data),
            EncryptionKind::Asymmetric => self.open_sealed(&data),
            EncryptionKind::Symmetric => {
                let session = self
                    .session
                    .as_ref()
                    .ok_or(ProtocolError::MissingKey(constants::ERR_NO_SESSION_KEY))?;
                match (session.decrypt(&data), &self.alternate) {
                    (Ok(plain), _) => Ok(plain),
                    (Err(_), Some(alternate)) => alternate.decrypt(&data),
                    (Err(e), None) => Err(e),
                }
            }
        }
    }

    /// Drop all key material
    pub fn clear(&mut self) {
        self.local = None;
        self.retired_local = None;
        self.peer_public = None;
        self.session = None;
        self.alternate = None;
    }
}

/// A frame ready for the wire plus what deviated from the request
#[derive(Debug)]
pub struct EncodedFrame {
    pub frame: RawFrame,
    pub serialization_fallback: bool,
    pub encryption_fallback: bool,
}

/// Stateless transform chain shared by every connection of a context.
pub struct Pipeline {
    serializers: SerializationRegistry,
    compression_level: i32,
    compression_threshold: usize,
    max_frame_length: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            serializers: SerializationRegistry::with_defaults(),
            compression_level: DEFAULT_ZSTD_LEVEL,
            compression_threshold: 0,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl Pipeline {
    pub fn new(serializers: SerializationRegistry, transport: &TransportConfig) -> Self {
        Self {
            serializers,
            compression_level: transport.compression_level,
            compression_threshold: transport.compression_threshold_bytes,
            max_frame_length: transport.max_frame_length.min(MAX_FRAME_LENGTH),
        }
    }

    pub fn serializers(&self) -> &SerializationRegistry {
        &self.serializers
    }

    /// Run the send-side chain.
    ///
    /// # Errors
    /// `ProtocolError::OversizedPacket` when the transformed payload exceeds the frame limit,
    /// or a hard failure of the fallback serializer, compressor or cipher.
    pub fn encode(
        &self,
        keys: &KeyRing,
        message: &Message,
        transforms: TransformSet,
    ) -> Result<EncodedFrame> {
        let serialized = self
            .serializers
            .serialize(message, transforms.serialization)?;

        let (compressed, compression) = compression::maybe_compress(
            &serialized.bytes,
            transforms.compression,
            self.compression_threshold,
            self.compression_level,
        )?;

        let encryption =
            keys.resolve_encryption(transforms.encryption, transforms.fallback_encryption);
        if encryption != transforms.encryption {
            debug!(
                requested = transforms.encryption.name(),
                used = encryption.name(),
                "Key material missing, encryption fell back"
            );
        }
        let payload = keys.encrypt(encryption, compressed)?;

        if payload.len() > self.max_frame_length {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }

        Ok(EncodedFrame {
            frame: RawFrame::new(
                FrameHeader::new(serialized.used, compression, encryption),
                payload,
            ),
            serialization_fallback: serialized.used != transforms.serialization,
            encryption_fallback: encryption != transforms.encryption,
        })
    }

    /// Run the receive-side chain.
    pub fn decode(&self, keys: &KeyRing, frame: RawFrame) -> Result<Message> {
        let header = frame.header;
        let plain = keys.decrypt(header.encryption, frame.payload)?;
        let raw = compression::decompress(&plain, header.compression)?;
        self.serializers.deserialize(&raw, header.serialization)
    }
}
