//! vaultkey-crypto: client-side key custody for the encrypted file vault
//!
//! Key hierarchy:
//! ```text
//! Password ──Argon2id(salt)──► KEK ─┐
//!                                   ├─ XChaCha20-Poly1305 wraps ─► Master Key (256-bit random)
//! Phrase ──BIP-39 seed──Argon2id──► KEK ─┘                              │
//!                                            ├── File Key (per file, random, wrapped by master)
//!                                            │   └── Chunk AEAD (key=file_key, nonce=random_192bit,
//!                                            │                   AAD=chunk_idx||chunk_count)
//!                                            └── X25519 identity (private key wrapped by master)
//! ```
//!
//! Both envelopes lock the same master key. Rotating one re-wraps the key it
//! already holds and never touches the sibling envelope.

pub mod aead;
pub mod chunk;
pub mod file;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod random;
pub mod recovery;
pub mod wrap;

pub use chunk::{decrypt_chunk, encrypt_chunk};
pub use file::FileCipher;
pub use identity::IdentityKeyPair;
pub use kdf::{derive_from_password, WrappingKey};
pub use keys::{unwrap_file_key, wrap_file_key, FileKey, MasterKey};
pub use recovery::{normalize_phrase, validate_phrase, RecoveryPhrase};
pub use wrap::{KeyWrapper, RotationSecret};

pub use vaultkey_core::{KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
