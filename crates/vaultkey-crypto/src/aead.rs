//! XChaCha20-Poly1305 seal/open.
//!
//! Sealed format: `[ciphertext][16-byte Poly1305 tag]`. The nonce travels
//! separately. Tag comparison is constant-time inside `chacha20poly1305`;
//! there is no padding, so a failed open has exactly one cause.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use vaultkey_core::{CustodyError, CustodyResult, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Encrypt and authenticate `plaintext`. The caller owns nonce uniqueness.
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: Option<&[u8]>,
) -> CustodyResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|e| CustodyError::Other(anyhow::anyhow!("AEAD seal failed: {e}")))
}

/// Verify and decrypt. Any mismatch is [`CustodyError::AuthenticationFailure`].
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    sealed: &[u8],
    aad: Option<&[u8]>,
) -> CustodyResult<Vec<u8>> {
    if sealed.len() < TAG_SIZE {
        return Err(CustodyError::AuthenticationFailure);
    }
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: aad.unwrap_or_default(),
            },
        )
        .map_err(|_| CustodyError::AuthenticationFailure)
}
