//! # Encryption
//!
//! ## Components
//! - **SessionKey**: XChaCha20-Poly1305 with a random 24-byte nonce prefixed to every ciphertext
//! - **KeyPair**: X25519 static key pair
//! - **seal / KeyPair::open**: anonymous public-key encryption. An ephemeral X25519 key
//!   agrees a secret with the recipient, SHA-256 derives the AEAD key, and the ephemeral
//!   public key travels in front of the nonce.
//!
//! ## Security
//! - All randomness comes from the operating system
//! - Non-contributory (all-zero) shared secrets are rejected
//! - Key material is zeroed on drop

use crate::error::{constants, ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of symmetric keys and X25519 public keys
pub const KEY_LEN: usize = 32;

/// XChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 24;

const SEAL_DOMAIN: &[u8] = b"framelink-seal-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionKind {
    /// Identity copy
    None,
    /// Sealed to the peer's X25519 public key
    Asymmetric,
    /// Session key established by the handshake
    #[default]
    Symmetric,
}

impl EncryptionKind {
    pub const ALL: [EncryptionKind; 3] = [
        EncryptionKind::None,
        EncryptionKind::Asymmetric,
        EncryptionKind::Symmetric,
    ];

    pub fn id(self) -> u8 {
        match self {
            EncryptionKind::None => 0x01,
            EncryptionKind::Asymmetric => 0x02,
            EncryptionKind::Symmetric => 0x03,
        }
    }

    pub fn from_id(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(EncryptionKind::None),
            0x02 => Some(EncryptionKind::Asymmetric),
            0x03 => Some(EncryptionKind::Symmetric),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EncryptionKind::None => "none",
            EncryptionKind::Asymmetric => "x25519-sealed",
            EncryptionKind::Symmetric => "xchacha20poly1305",
        }
    }
}

/// Fill `buf` from the operating system RNG
fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| ProtocolError::Custom(format!("RNG failure: {e}")))
}

/// Symmetric session key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl SessionKey {
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        fill_random(&mut key)?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ProtocolError::HandshakeError(constants::ERR_INVALID_KEY_LENGTH.into())
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// SHA-256 of the key, safe to log or compare
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }

    /// Encrypt to `nonce || ciphertext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        aead_encrypt(&self.0, plaintext)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        aead_decrypt(&self.0, data)
    }
}

fn aead_encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| ProtocolError::EncryptionFailure)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn aead_decrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(ProtocolError::DecryptionFailure);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

fn derive_seal_key(
    shared: &[u8],
    ephemeral: &[u8; KEY_LEN],
    recipient: &[u8; KEY_LEN],
) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(SEAL_DOMAIN);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    hasher.finalize().into()
}

/// Encrypt `plaintext` so only the holder of `recipient`'s secret can read it.
///
/// Output: `ephemeral_public(32) || nonce(24) || ciphertext`
pub fn seal(recipient: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));
    if !shared.was_contributory() {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_WEAK_SHARED_SECRET.into(),
        ));
    }

    let mut key = derive_seal_key(shared.as_bytes(), &ephemeral_public, recipient);
    let sealed = aead_encrypt(&key, plaintext);
    key.zeroize();

    let sealed = sealed?;
    let mut out = Vec::with_capacity(KEY_LEN + sealed.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Long-lived X25519 key pair of one connection end.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// Decrypt a payload produced by [`seal`] for this key pair.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < KEY_LEN + NONCE_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (ephemeral, rest) = sealed.split_at(KEY_LEN);
        let ephemeral: [u8; KEY_LEN] = ephemeral
            .try_into()
            .map_err(|_| ProtocolError::DecryptionFailure)?;

        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral));
        if !shared.was_contributory() {
            return Err(ProtocolError::DecryptionFailure);
        }

        let mut key = derive_seal_key(shared.as_bytes(), &ephemeral, self.public.as_bytes());
        let opened = aead_decrypt(&key, rest);
        key.zeroize();
        opened
    }
}
