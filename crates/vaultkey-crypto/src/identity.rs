//! X25519 identity keypair, sealed under the master key.
//!
//! The public half is stored in clear so other accounts can address this
//! vault. The private half only exists in memory while the vault is unlocked.

use hkdf::Hkdf;
use sha2::Sha256;
use vaultkey_core::{CustodyError, CustodyResult, IdentityEnvelope, KEY_SIZE};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::aead;
use crate::kdf::WrappingKey;
use crate::keys::MasterKey;
use crate::random;

const IDENTITY_AAD: &[u8] = b"vaultkey/identity-key/v1";
const SHARE_KEY_SALT: &[u8] = b"vaultkey/share-kek/v1";

/// `StaticSecret` zeroizes itself on drop.
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl IdentityKeyPair {
    pub fn generate() -> CustodyResult<Self> {
        let seed = Zeroizing::new(random::random_array::<KEY_SIZE>()?);
        Ok(Self::from_secret_bytes(*seed))
    }

    fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Seal the private key under the master key.
    pub fn wrap(&self, master: &MasterKey) -> CustodyResult<IdentityEnvelope> {
        let nonce = random::random_nonce()?;
        let secret = Zeroizing::new(self.secret.to_bytes());
        let encrypted_private_key =
            aead::seal(master.as_bytes(), &nonce, &secret[..], Some(IDENTITY_AAD))?;
        Ok(IdentityEnvelope {
            encrypted_private_key,
            nonce,
            public_key: self.public_key_bytes(),
        })
    }

    /// Open an identity envelope. The recovered private key must reproduce
    /// the stored public key.
    pub fn unwrap(envelope: &IdentityEnvelope, master: &MasterKey) -> CustodyResult<Self> {
        let plaintext = Zeroizing::new(aead::open(
            master.as_bytes(),
            &envelope.nonce,
            &envelope.encrypted_private_key,
            Some(IDENTITY_AAD),
        )?);
        let bytes: [u8; KEY_SIZE] = plaintext[..].try_into().map_err(|_| {
            CustodyError::MalformedEnvelope(format!(
                "identity key must be {KEY_SIZE} bytes, got {}",
                plaintext.len()
            ))
        })?;
        let pair = Self::from_secret_bytes(bytes);
        if pair.public_key_bytes() != envelope.public_key {
            return Err(CustodyError::MalformedEnvelope(
                "identity public key does not match private key".into(),
            ));
        }
        Ok(pair)
    }

    /// Derive a key-encrypting key shared with the holder of `their_public`.
    ///
    /// `context` separates keys derived for different purposes between the
    /// same two identities.
    pub fn derive_kek(&self, their_public: &[u8; 32], context: &[u8]) -> CustodyResult<WrappingKey> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*their_public));
        if !shared.was_contributory() {
            return Err(CustodyError::MalformedEnvelope(
                "peer public key is a low-order point".into(),
            ));
        }
        let hk = Hkdf::<Sha256>::new(Some(SHARE_KEY_SALT), shared.as_bytes());
        let mut okm = [0u8; KEY_SIZE];
        hk.expand(context, &mut okm)
            .map_err(|e| CustodyError::Other(anyhow::anyhow!("HKDF expand: {e}")))?;
        Ok(WrappingKey::from_bytes(okm))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public.as_bytes())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
