//! OS-backed randomness. A failing entropy source is fatal: there is no
//! fallback generator.

use rand::rngs::OsRng;
use rand::RngCore;
use vaultkey_core::{CustodyError, CustodyResult, NONCE_SIZE, SALT_SIZE};

/// Fill `buf` from the operating system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> CustodyResult<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        tracing::error!("OS entropy source failed: {e}");
        CustodyError::EntropySourceFailure(e.to_string())
    })
}

/// `n` cryptographically secure random bytes.
pub fn random_bytes(n: usize) -> CustodyResult<Vec<u8>> {
    let mut buf = vec![0u8; n];
    fill_random(&mut buf)?;
    Ok(buf)
}

pub fn random_array<const N: usize>() -> CustodyResult<[u8; N]> {
    let mut buf = [0u8; N];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Fresh 192-bit XChaCha20 nonce.
pub fn random_nonce() -> CustodyResult<[u8; NONCE_SIZE]> {
    random_array()
}

/// Fresh 128-bit Argon2id salt.
pub fn random_salt() -> CustodyResult<[u8; SALT_SIZE]> {
    random_array()
}
