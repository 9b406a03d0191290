//! Master and per-file keys, and file-key wrapping under the master key

use vaultkey_core::{CustodyError, CustodyResult, FileKeyEnvelope, KEY_SIZE, TAG_SIZE};
use zeroize::Zeroize;

use crate::{aead, random};

const FILE_KEY_AAD: &[u8] = b"vaultkey/file-key/v1";

/// The account's root secret. Zeroized on drop and deliberately not `Clone`:
/// there is exactly one live copy per unlocked session.
///
/// The bytes live on the heap, so moving a `MasterKey` (out of a blocking
/// task, into a session) copies a pointer and never the key itself.
pub struct MasterKey {
    bytes: Box<[u8; KEY_SIZE]>,
}

impl MasterKey {
    pub fn from_bytes(mut bytes: [u8; KEY_SIZE]) -> Self {
        let key = Self {
            bytes: Box::new(bytes),
        };
        bytes.zeroize();
        key
    }

    /// Generate a fresh random master key (vault initialization only).
    pub fn generate() -> CustodyResult<Self> {
        let mut key = Self::zeroed();
        random::fill_random(&mut key.bytes[..])?;
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Take ownership of decrypted key bytes, zeroizing the source buffer.
    pub(crate) fn from_plaintext(mut plaintext: Vec<u8>) -> CustodyResult<Self> {
        let result = check_key_len(&plaintext).map(|()| {
            let mut key = Self::zeroed();
            key.bytes.copy_from_slice(&plaintext);
            key
        });
        plaintext.zeroize();
        result
    }

    fn zeroed() -> Self {
        Self {
            bytes: Box::new([0u8; KEY_SIZE]),
        }
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-file 256-bit encryption key. Zeroized on drop.
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a random 256-bit file encryption key.
    pub fn generate() -> CustodyResult<Self> {
        Ok(Self::from_bytes(random::random_array()?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Wrap (encrypt) a file key under the master key with a fresh nonce.
pub fn wrap_file_key(master: &MasterKey, file_key: &FileKey) -> CustodyResult<FileKeyEnvelope> {
    let key_nonce = random::random_nonce()?;
    let file_key_cipher = aead::seal(
        master.as_bytes(),
        &key_nonce,
        file_key.as_bytes(),
        Some(FILE_KEY_AAD),
    )?;
    Ok(FileKeyEnvelope {
        file_key_cipher,
        key_nonce,
    })
}

/// Unwrap (decrypt) a file key. Fails with `AuthenticationFailure` on a wrong
/// master key or a tampered envelope.
pub fn unwrap_file_key(master: &MasterKey, envelope: &FileKeyEnvelope) -> CustodyResult<FileKey> {
    if envelope.file_key_cipher.len() != KEY_SIZE + TAG_SIZE {
        return Err(CustodyError::MalformedEnvelope(format!(
            "wrapped file key is {} bytes (expected {})",
            envelope.file_key_cipher.len(),
            KEY_SIZE + TAG_SIZE
        )));
    }
    let mut plaintext = aead::open(
        master.as_bytes(),
        &envelope.key_nonce,
        &envelope.file_key_cipher,
        Some(FILE_KEY_AAD),
    )?;
    let result = take_key_bytes(&plaintext).map(FileKey::from_bytes);
    plaintext.zeroize();
    result
}

fn check_key_len(plaintext: &[u8]) -> CustodyResult<()> {
    if plaintext.len() != KEY_SIZE {
        return Err(CustodyError::MalformedEnvelope(format!(
            "unwrapped key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        )));
    }
    Ok(())
}

fn take_key_bytes(plaintext: &[u8]) -> CustodyResult<[u8; KEY_SIZE]> {
    check_key_len(plaintext)?;
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(plaintext);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_file_key_generation() {
        let k1 = FileKey::generate().unwrap();
        let k2 = FileKey::generate().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_master_key_generation() {
        let k1 = MasterKey::generate().unwrap();
        let k2 = MasterKey::generate().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let file_key = FileKey::generate().unwrap();

        let envelope = wrap_file_key(&master, &file_key).unwrap();
        let unwrapped = unwrap_file_key(&master, &envelope).unwrap();

        assert_eq!(file_key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_key_unwrap_wrong_master() {
        let master1 = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = MasterKey::from_bytes([2u8; KEY_SIZE]);
        let file_key = FileKey::generate().unwrap();

        let envelope = wrap_file_key(&master1, &file_key).unwrap();
        let result = unwrap_file_key(&master2, &envelope);

        assert!(matches!(result, Err(CustodyError::AuthenticationFailure)));
    }

    #[test]
    fn test_wrapped_key_size() {
        let envelope = wrap_file_key(&test_master_key(), &FileKey::generate().unwrap()).unwrap();
        // key (32) + tag (16) = 48
        assert_eq!(envelope.file_key_cipher.len(), KEY_SIZE + TAG_SIZE);
    }

    #[test]
    fn test_wrapping_twice_uses_fresh_nonces() {
        let master = test_master_key();
        let file_key = FileKey::generate().unwrap();

        let a = wrap_file_key(&master, &file_key).unwrap();
        let b = wrap_file_key(&master, &file_key).unwrap();

        assert_ne!(a.key_nonce, b.key_nonce);
        assert_ne!(a.file_key_cipher, b.file_key_cipher);
    }

    #[test]
    fn test_truncated_envelope_is_malformed() {
        let master = test_master_key();
        let mut envelope = wrap_file_key(&master, &FileKey::generate().unwrap()).unwrap();
        envelope.file_key_cipher.truncate(20);

        assert!(matches!(
            unwrap_file_key(&master, &envelope),
            Err(CustodyError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_master_key_from_plaintext() {
        let key = MasterKey::from_plaintext(vec![9u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes(), &[9u8; KEY_SIZE]);

        assert!(matches!(
            MasterKey::from_plaintext(vec![9u8; KEY_SIZE - 1]),
            Err(CustodyError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_master_key_move_keeps_heap_bytes() {
        let key = MasterKey::generate().unwrap();
        let before = key.as_bytes().as_ptr();
        let moved = std::thread::spawn(move || key).join().unwrap();
        assert_eq!(moved.as_bytes().as_ptr(), before, "moves must not copy the key");
    }

    #[test]
    fn test_master_key_debug_redacted() {
        assert!(format!("{:?}", test_master_key()).contains("REDACTED"));
    }
}
