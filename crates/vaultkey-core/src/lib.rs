//! vaultkey-core: shared vocabulary for the key-custody workspace
//!
//! Nothing in here touches key material. The crypto crate produces and
//! consumes the envelope types; the session crate persists them through an
//! external store; the CLI loads [`config::VaultConfig`].

pub mod config;
pub mod error;
pub mod types;

pub use error::{CustodyError, CustodyResult};
pub use types::{
    base64_decode, base64_encode, EncryptedChunk, EncryptedFile, FileKeyEnvelope,
    IdentityEnvelope, KdfProfile, PasswordEnvelope, RecoveryEnvelope, RecoveryScheme, VaultRecord,
};

/// Size of every symmetric key in the hierarchy (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of an Argon2id salt. Anything else is rejected, never padded.
pub const SALT_SIZE: usize = 16;
