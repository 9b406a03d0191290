//! Master-key wrapping under a password or a recovery phrase
//!
//! Each envelope is produced with its own fresh salt and nonce. Unwrap errors
//! never say which step failed: a wrong secret and a tampered ciphertext are
//! both [`CustodyError::WrongSecret`].

use secrecy::SecretString;
use vaultkey_core::{
    CustodyError, CustodyResult, KdfProfile, PasswordEnvelope, RecoveryEnvelope, RecoveryScheme,
    KEY_SIZE, TAG_SIZE,
};

use crate::kdf::derive_from_password;
use crate::keys::MasterKey;
use crate::recovery::RecoveryPhrase;
use crate::{aead, random};

const PASSWORD_ENVELOPE_AAD: &[u8] = b"vaultkey/password-envelope/v1";
const RECOVERY_ENVELOPE_AAD: &[u8] = b"vaultkey/recovery-envelope/v1";

/// A secret the master key can be re-wrapped under. The envelope type
/// follows from the secret: a password yields a [`PasswordEnvelope`], a
/// phrase yields a [`RecoveryEnvelope`].
pub trait RotationSecret {
    type Envelope;

    fn wrap(&self, wrapper: &KeyWrapper, master: &MasterKey) -> CustodyResult<Self::Envelope>;
}

impl RotationSecret for SecretString {
    type Envelope = PasswordEnvelope;

    fn wrap(&self, wrapper: &KeyWrapper, master: &MasterKey) -> CustodyResult<PasswordEnvelope> {
        wrapper.wrap_with_password(master, self)
    }
}

impl RotationSecret for RecoveryPhrase {
    type Envelope = RecoveryEnvelope;

    fn wrap(&self, wrapper: &KeyWrapper, master: &MasterKey) -> CustodyResult<RecoveryEnvelope> {
        wrapper.wrap_with_phrase(master, self)
    }
}

/// Wraps and unwraps the master key. One wrapper carries one KDF profile so
/// every envelope it writes can be read back by every other call site.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyWrapper {
    profile: KdfProfile,
}

impl KeyWrapper {
    pub fn new(profile: KdfProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> KdfProfile {
        self.profile
    }

    /// Fresh salt, fresh nonce, Argon2id(password), seal.
    pub fn wrap_with_password(
        &self,
        master: &MasterKey,
        password: &SecretString,
    ) -> CustodyResult<PasswordEnvelope> {
        let argon_salt = random::random_salt()?;
        let kek = derive_from_password(password, &argon_salt, self.profile)?;
        let master_nonce = random::random_nonce()?;
        let encrypted_master_key = aead::seal(
            kek.as_bytes(),
            &master_nonce,
            master.as_bytes(),
            Some(PASSWORD_ENVELOPE_AAD),
        )?;

        Ok(PasswordEnvelope {
            encrypted_master_key,
            master_nonce,
            argon_salt,
        })
    }

    pub fn unwrap_with_password(
        &self,
        envelope: &PasswordEnvelope,
        password: &SecretString,
    ) -> CustodyResult<MasterKey> {
        check_wrapped_len(&envelope.encrypted_master_key)?;
        let kek = derive_from_password(password, &envelope.argon_salt, self.profile)?;
        let plaintext = aead::open(
            kek.as_bytes(),
            &envelope.master_nonce,
            &envelope.encrypted_master_key,
            Some(PASSWORD_ENVELOPE_AAD),
        )
        .map_err(|_| CustodyError::WrongSecret)?;
        MasterKey::from_plaintext(plaintext)
    }

    pub fn wrap_with_phrase(
        &self,
        master: &MasterKey,
        phrase: &RecoveryPhrase,
    ) -> CustodyResult<RecoveryEnvelope> {
        let salt = random::random_salt()?;
        let kek = phrase.derive_key(&salt, self.profile)?;
        let nonce = random::random_nonce()?;
        let wrapped_master_key = aead::seal(
            kek.as_bytes(),
            &nonce,
            master.as_bytes(),
            Some(RECOVERY_ENVELOPE_AAD),
        )?;

        Ok(RecoveryEnvelope {
            wrapped_master_key,
            nonce,
            salt,
            scheme: RecoveryScheme::Argon2idWithSalt,
        })
    }

    /// The phrase has already passed checksum validation (it is a
    /// [`RecoveryPhrase`]), so any failure here is a generic recovery failure.
    pub fn unwrap_with_phrase(
        &self,
        envelope: &RecoveryEnvelope,
        phrase: &RecoveryPhrase,
    ) -> CustodyResult<MasterKey> {
        check_wrapped_len(&envelope.wrapped_master_key)?;
        let kek = match envelope.scheme {
            RecoveryScheme::Argon2idWithSalt => phrase.derive_key(&envelope.salt, self.profile)?,
        };
        let plaintext = aead::open(
            kek.as_bytes(),
            &envelope.nonce,
            &envelope.wrapped_master_key,
            Some(RECOVERY_ENVELOPE_AAD),
        )
        .map_err(|_| CustodyError::WrongSecret)?;
        MasterKey::from_plaintext(plaintext)
    }

    /// Re-wrap an already recovered master key under a new secret. The
    /// sibling envelope is neither needed nor touched.
    pub fn rotate<S: RotationSecret + ?Sized>(
        &self,
        master: &MasterKey,
        secret: &S,
    ) -> CustodyResult<S::Envelope> {
        secret.wrap(self, master)
    }
}

fn check_wrapped_len(wrapped: &[u8]) -> CustodyResult<()> {
    if wrapped.len() != KEY_SIZE + TAG_SIZE {
        return Err(CustodyError::MalformedEnvelope(format!(
            "wrapped master key is {} bytes (expected {})",
            wrapped.len(),
            KEY_SIZE + TAG_SIZE
        )));
    }
    Ok(())
}
