//! Per-chunk XChaCha20-Poly1305 encryption/decryption
//!
//! ```text
//! EncryptedChunk { index, nonce (24 bytes), ciphertext || tag (16 bytes) }
//! AAD = chunk_index (8 bytes, big-endian) || chunk_count (8 bytes, big-endian)
//! ```
//!
//! The AAD binds each chunk to its position and to the file's chunk count,
//! so reordered, duplicated, or truncated chunk lists fail authentication.
//! Nonces are supplied by the caller and assigned before any parallel work.

use vaultkey_core::{CustodyError, CustodyResult, EncryptedChunk, NONCE_SIZE, TAG_SIZE};

use crate::aead;
use crate::keys::FileKey;

/// Encrypt a single chunk.
///
/// - `file_key`: The per-file encryption key
/// - `index`: Zero-based index of this chunk within the file
/// - `chunk_count`: Total number of chunks in the file
/// - `nonce`: A nonce never used before with `file_key`
pub fn encrypt_chunk(
    file_key: &FileKey,
    index: u64,
    chunk_count: u64,
    nonce: [u8; NONCE_SIZE],
    plaintext: &[u8],
) -> CustodyResult<EncryptedChunk> {
    let aad = build_aad(index, chunk_count);
    let ciphertext = aead::seal(file_key.as_bytes(), &nonce, plaintext, Some(&aad))?;
    Ok(EncryptedChunk {
        index,
        nonce,
        ciphertext,
    })
}

/// Decrypt a single chunk. Fails closed with `AuthenticationFailure` on any
/// flipped bit, wrong key, or wrong position.
pub fn decrypt_chunk(
    file_key: &FileKey,
    chunk: &EncryptedChunk,
    chunk_count: u64,
) -> CustodyResult<Vec<u8>> {
    if chunk.ciphertext.len() < TAG_SIZE {
        return Err(CustodyError::AuthenticationFailure);
    }
    let aad = build_aad(chunk.index, chunk_count);
    aead::open(file_key.as_bytes(), &chunk.nonce, &chunk.ciphertext, Some(&aad))
}

/// Build AAD: chunk_index (8 bytes BE) || chunk_count (8 bytes BE)
fn build_aad(index: u64, chunk_count: u64) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8..].copy_from_slice(&chunk_count.to_be_bytes());
    aad
}
