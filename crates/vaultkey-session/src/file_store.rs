//! One JSON document per account on the local filesystem.
//!
//! ```text
//! <dir>/<account>.json   VaultRecord (base64 envelopes, no plaintext)
//! <dir>/.tmpXXXXXX       staging file, renamed or linked into place
//! ```
//!
//! A record only ever appears on disk fully written: every write goes to a
//! fresh temp file in the same directory, is synced, and is then published
//! with one atomic rename (updates) or a no-clobber link (creation).

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use vaultkey_core::{CustodyError, CustodyResult, PasswordEnvelope, RecoveryEnvelope, VaultRecord};

use crate::store::{missing_record, EnvelopeStore};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles between clones of this store.
    writes: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `account`. Account names become file names, so
    /// anything outside `[A-Za-z0-9._@-]` (or a leading dot) is refused.
    pub fn record_path(&self, account: &str) -> CustodyResult<PathBuf> {
        let valid = !account.is_empty()
            && !account.starts_with('.')
            && account
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'));
        if !valid {
            return Err(CustodyError::Storage(format!(
                "invalid account name '{account}'"
            )));
        }
        Ok(self.dir.join(format!("{account}.json")))
    }

    /// Load, apply, and write back if `apply` reports a change. Returns what
    /// `apply` returned.
    async fn update(
        &self,
        account: &str,
        apply: impl FnOnce(&mut VaultRecord) -> bool + Send,
    ) -> CustodyResult<bool> {
        let path = self.record_path(account)?;
        let _writer = self.writes.lock().await;
        let mut record = self.load(account).await?.ok_or_else(|| missing_record(account))?;
        if !apply(&mut record) {
            return Ok(false);
        }
        let json = record.to_json()?;
        run_blocking(move || atomic_replace(&path, &json)).await?;
        Ok(true)
    }
}

#[async_trait]
impl EnvelopeStore for JsonFileStore {
    /// An empty file is what an interrupted create by an older writer leaves
    /// behind; it holds no key material and reads as "not initialized".
    async fn load(&self, account: &str) -> CustodyResult<Option<VaultRecord>> {
        let path = self.record_path(account)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => {
                tracing::warn!(account, "ignoring empty vault record: {}", path.display());
                Ok(None)
            }
            Ok(content) => VaultRecord::from_json(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CustodyError::Storage(format!(
                "reading {}: {e}",
                path.display()
            ))),
        }
    }

    async fn create_if_absent(&self, account: &str, record: VaultRecord) -> CustodyResult<bool> {
        let path = self.record_path(account)?;
        let json = record.to_json()?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let _writer = self.writes.lock().await;
        let dir = self.dir.clone();
        let created = run_blocking(move || {
            let staged = stage(&dir, &json)?;
            let staged = match staged.persist_noclobber(&path) {
                Ok(_) => return Ok(true),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => e.file,
                Err(e) => return Err(CustodyError::Io(e.error)),
            };
            if !is_empty_record(&path)? {
                return Ok(false);
            }
            tracing::warn!("replacing empty vault record: {}", path.display());
            staged
                .persist(&path)
                .map_err(|e| CustodyError::Io(e.error))?;
            Ok(true)
        })
        .await?;

        if created {
            tracing::info!(account, "vault record created in {}", self.dir.display());
        } else {
            tracing::debug!(account, "vault record already exists");
        }
        Ok(created)
    }

    async fn put_password_envelope(
        &self,
        account: &str,
        envelope: PasswordEnvelope,
    ) -> CustodyResult<()> {
        self.update(account, |r| {
            r.password_envelope = envelope;
            true
        })
        .await
        .map(drop)
    }

    async fn put_recovery_envelope(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        self.update(account, |r| {
            r.recovery = Some(envelope);
            true
        })
        .await
        .map(drop)
    }

    async fn create_recovery_if_absent(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<bool> {
        self.update(account, |r| {
            if r.recovery.is_some() {
                return false;
            }
            r.recovery = Some(envelope);
            true
        })
        .await
    }

    async fn replace_credentials(
        &self,
        account: &str,
        password: PasswordEnvelope,
        recovery: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        self.update(account, |r| {
            r.password_envelope = password;
            r.recovery = Some(recovery);
            true
        })
        .await
        .map(drop)
    }
}

/// Write `content` to a synced temp file in `dir` (mode 0600 on unix).
fn stage(dir: &Path, content: &str) -> CustodyResult<NamedTempFile> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// Atomically replace a file with new content.
///
/// Writes to a temp file in the same directory, then renames so readers
/// never observe a half-written record.
fn atomic_replace(path: &Path, content: &str) -> CustodyResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    stage(parent, content)?
        .persist(path)
        .map_err(|e| CustodyError::Io(e.error))?;

    tracing::debug!("vault record replaced: {}", path.display());
    Ok(())
}

fn is_empty_record(path: &Path) -> CustodyResult<bool> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().is_empty()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// File I/O is synchronous; keep it off the async workers. A dropped caller
/// does not interrupt the write, and an unpersisted temp file is removed
/// when it drops.
async fn run_blocking<T, F>(work: F) -> CustodyResult<T>
where
    F: FnOnce() -> CustodyResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CustodyError::Storage(format!("store task failed: {e}")))?
}
