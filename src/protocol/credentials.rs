//! # Credentials
//!
//! Verification of the admin credential carried by the ADMIN_SIGNATURE control
//! message, and the per-session hashing helpers built on the dispatched salt.
//!
//! ## Security
//! - Stored passwords are Argon2id PHC strings, never plaintext
//! - Salts come from the operating system RNG

use crate::error::{ProtocolError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;
use sha2::{Digest, Sha256};

/// Decides whether an admin credential is acceptable.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> bool;
}

impl<F> CredentialVerifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn verify(&self, credential: &str) -> bool {
        self(credential)
    }
}

/// Verifies credentials against an Argon2 PHC hash.
#[derive(Debug, Clone)]
pub struct Argon2Verifier {
    phc: String,
}

impl Argon2Verifier {
    /// Wrap an existing PHC string, rejecting anything that does not parse
    pub fn new(phc: impl Into<String>) -> Result<Self> {
        let phc = phc.into();
        PasswordHash::new(&phc)
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid password hash: {e}")))?;
        Ok(Self { phc })
    }

    /// Hash `password` under a fresh salt
    pub fn from_password(password: &str) -> Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ProtocolError::Custom(format!("Password hashing failed: {e}")))?
            .to_string();
        Ok(Self { phc })
    }

    pub fn phc(&self) -> &str {
        &self.phc
    }
}

impl CredentialVerifier for Argon2Verifier {
    fn verify(&self, credential: &str) -> bool {
        match PasswordHash::new(&self.phc) {
            Ok(parsed) => Argon2::default()
                .verify_password(credential.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Fresh per-session salt, B64 encoded
pub fn generate_salt() -> String {
    SaltString::generate(&mut OsRng).as_str().to_string()
}

/// Argon2id PHC string of `secret` under `salt`
pub fn hash_with_salt(secret: &str, salt: &str) -> Result<String> {
    let salt = SaltString::from_b64(salt)
        .map_err(|e| ProtocolError::Custom(format!("Invalid session salt: {e}")))?;
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ProtocolError::Custom(format!("Password hashing failed: {e}")))
}

/// Lowercase hex SHA-256 of `secret`
pub fn sha256_hex(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
