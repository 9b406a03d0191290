//! Key derivation: Argon2id password → key-encrypting key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use vaultkey_core::{CustodyError, CustodyResult, KdfProfile, KEY_SIZE, SALT_SIZE};
use zeroize::Zeroize;

/// A 256-bit key-encrypting key derived from a password, phrase, or ECDH.
///
/// Only ever used to seal/open an envelope. Zeroized on drop.
pub struct WrappingKey {
    bytes: [u8; KEY_SIZE],
}

impl WrappingKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit wrapping key from a password and salt using Argon2id.
///
/// The salt must be exactly 16 bytes. It is stored in clear next to the
/// envelope it protects.
pub fn derive_from_password(
    password: &SecretString,
    salt: &[u8],
    profile: KdfProfile,
) -> CustodyResult<WrappingKey> {
    derive_key(password.expose_secret().as_bytes(), salt, profile)
}

pub(crate) fn derive_key(
    secret: &[u8],
    salt: &[u8],
    profile: KdfProfile,
) -> CustodyResult<WrappingKey> {
    if salt.len() != SALT_SIZE {
        return Err(CustodyError::InvalidSalt {
            expected: SALT_SIZE,
            actual: salt.len(),
        });
    }

    let argon2_params = Params::new(
        profile.mem_cost_kib(),
        profile.time_cost(),
        profile.parallelism(),
        Some(KEY_SIZE),
    )
    .map_err(|e| CustodyError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
    tracing::debug!(%profile, "deriving Argon2id key");

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret, salt, &mut key)
        .map_err(|e| CustodyError::Kdf(format!("Argon2id KDF failed: {e}")))?;

    Ok(WrappingKey::from_bytes(key))
}
