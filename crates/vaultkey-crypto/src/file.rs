//! Whole-file encryption under a fresh per-file key
//!
//! Pipeline: split into fixed-size chunks → draw one nonce per chunk →
//! seal chunks in parallel on a bounded pool → wrap the file key under the
//! master key. Decryption verifies every chunk before returning any byte.

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use vaultkey_core::{CustodyError, CustodyResult, EncryptedFile, FileKeyEnvelope, NONCE_SIZE};

use crate::chunk::{decrypt_chunk, encrypt_chunk};
use crate::keys::{unwrap_file_key, wrap_file_key, FileKey, MasterKey};
use crate::random;

/// Default plaintext bytes per chunk (5 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Chunked file encryptor with a bounded worker pool.
#[derive(Clone)]
pub struct FileCipher {
    chunk_size: usize,
    pool: Arc<rayon::ThreadPool>,
}

impl std::fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCipher")
            .field("chunk_size", &self.chunk_size)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl FileCipher {
    /// `workers == 0` lets rayon pick the thread count.
    pub fn new(chunk_size: usize, workers: usize) -> CustodyResult<Self> {
        if chunk_size == 0 {
            return Err(CustodyError::Config("chunk size must be > 0".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("vaultkey-chunk-{i}"))
            .build()
            .map_err(|e| CustodyError::Other(anyhow::anyhow!("building chunk pool: {e}")))?;
        Ok(Self {
            chunk_size,
            pool: Arc::new(pool),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt `plaintext` under a fresh file key wrapped by `master`.
    pub fn encrypt_file(&self, master: &MasterKey, plaintext: &[u8]) -> CustodyResult<EncryptedFile> {
        let file_key = FileKey::generate()?;
        let envelope = wrap_file_key(master, &file_key)?;

        let slices: Vec<&[u8]> = if plaintext.is_empty() {
            vec![plaintext]
        } else {
            plaintext.chunks(self.chunk_size).collect()
        };
        let chunk_count = slices.len() as u64;
        let nonces = allocate_nonces(slices.len())?;

        let chunks = self.pool.install(|| {
            slices
                .par_iter()
                .zip(nonces.par_iter())
                .enumerate()
                .map(|(i, (slice, nonce))| {
                    encrypt_chunk(&file_key, i as u64, chunk_count, *nonce, slice)
                })
                .collect::<CustodyResult<Vec<_>>>()
        })?;

        tracing::debug!(
            chunks = chunk_count,
            bytes = plaintext.len(),
            "file encrypted"
        );

        Ok(EncryptedFile {
            envelope,
            chunk_size: self.chunk_size as u64,
            plaintext_size: plaintext.len() as u64,
            chunks,
        })
    }

    /// Unwrap the file key carried by an envelope (download path).
    pub fn open_file_key(
        &self,
        master: &MasterKey,
        envelope: &FileKeyEnvelope,
    ) -> CustodyResult<FileKey> {
        unwrap_file_key(master, envelope).map_err(|e| match e {
            CustodyError::AuthenticationFailure => {
                CustodyError::CorruptedFile("file key envelope failed authentication".into())
            }
            other => other,
        })
    }

    /// Decrypt and reassemble. Any failing chunk aborts the whole file.
    pub fn decrypt_file(&self, master: &MasterKey, file: &EncryptedFile) -> CustodyResult<Vec<u8>> {
        let expected = expected_chunk_count(file)?;
        let mut ordered: Vec<_> = file.chunks.iter().collect();
        ordered.sort_by_key(|c| c.index);
        if ordered.len() as u64 != expected
            || ordered.iter().enumerate().any(|(i, c)| c.index != i as u64)
        {
            return Err(CustodyError::CorruptedFile(format!(
                "expected chunks 0..{expected}, found {} chunk(s) with gaps or duplicates",
                ordered.len()
            )));
        }

        let file_key = self.open_file_key(master, &file.envelope)?;

        let parts = self.pool.install(|| {
            ordered
                .par_iter()
                .map(|chunk| {
                    decrypt_chunk(&file_key, chunk, expected).map_err(|_| {
                        CustodyError::CorruptedFile(format!(
                            "chunk {} failed authentication",
                            chunk.index
                        ))
                    })
                })
                .collect::<CustodyResult<Vec<_>>>()
        })?;

        let plaintext = parts.concat();
        if plaintext.len() as u64 != file.plaintext_size {
            return Err(CustodyError::CorruptedFile(format!(
                "reassembled {} bytes, header says {}",
                plaintext.len(),
                file.plaintext_size
            )));
        }
        Ok(plaintext)
    }
}

/// Draw every chunk nonce up front, sequentially, and refuse duplicates.
fn allocate_nonces(count: usize) -> CustodyResult<Vec<[u8; NONCE_SIZE]>> {
    let mut seen = HashSet::with_capacity(count);
    let mut nonces = Vec::with_capacity(count);
    for _ in 0..count {
        let nonce = random::random_nonce()?;
        if !seen.insert(nonce) {
            tracing::error!("duplicate chunk nonce drawn from the OS RNG");
            return Err(CustodyError::NonceReuseDetected);
        }
        nonces.push(nonce);
    }
    Ok(nonces)
}

fn expected_chunk_count(file: &EncryptedFile) -> CustodyResult<u64> {
    if file.chunk_size == 0 {
        return Err(CustodyError::CorruptedFile("chunk size is zero".into()));
    }
    Ok(file.plaintext_size.div_ceil(file.chunk_size).max(1))
}
