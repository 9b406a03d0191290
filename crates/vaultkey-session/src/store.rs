//! Envelope persistence trait and the in-memory backend

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use vaultkey_core::{CustodyError, CustodyResult, PasswordEnvelope, RecoveryEnvelope, VaultRecord};

/// Where an account's envelopes live between sessions.
///
/// Implementations only ever see ciphertext. `create_if_absent` and
/// `create_recovery_if_absent` must be atomic: two callers racing on the
/// same account see exactly one `true`.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// The account's record, or `None` if the vault was never initialized.
    async fn load(&self, account: &str) -> CustodyResult<Option<VaultRecord>>;

    /// Persist a brand new record. Returns `false` (and writes nothing) when
    /// a record already exists.
    async fn create_if_absent(&self, account: &str, record: VaultRecord) -> CustodyResult<bool>;

    async fn put_password_envelope(
        &self,
        account: &str,
        envelope: PasswordEnvelope,
    ) -> CustodyResult<()>;

    async fn put_recovery_envelope(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<()>;

    /// Attach a recovery envelope only if the record has none yet. Returns
    /// `false` (and writes nothing) when recovery is already enabled.
    async fn create_recovery_if_absent(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<bool>;

    /// Replace both credential envelopes in a single write.
    async fn replace_credentials(
        &self,
        account: &str,
        password: PasswordEnvelope,
        recovery: RecoveryEnvelope,
    ) -> CustodyResult<()>;
}

#[async_trait]
impl<T: EnvelopeStore + ?Sized> EnvelopeStore for Arc<T> {
    async fn load(&self, account: &str) -> CustodyResult<Option<VaultRecord>> {
        (**self).load(account).await
    }

    async fn create_if_absent(&self, account: &str, record: VaultRecord) -> CustodyResult<bool> {
        (**self).create_if_absent(account, record).await
    }

    async fn put_password_envelope(
        &self,
        account: &str,
        envelope: PasswordEnvelope,
    ) -> CustodyResult<()> {
        (**self).put_password_envelope(account, envelope).await
    }

    async fn put_recovery_envelope(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        (**self).put_recovery_envelope(account, envelope).await
    }

    async fn create_recovery_if_absent(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<bool> {
        (**self).create_recovery_if_absent(account, envelope).await
    }

    async fn replace_credentials(
        &self,
        account: &str,
        password: PasswordEnvelope,
        recovery: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        (**self).replace_credentials(account, password, recovery).await
    }
}

pub(crate) fn missing_record(account: &str) -> CustodyError {
    CustodyError::Storage(format!("no vault record for account '{account}'"))
}

/// In-memory store for tests and embedding.
///
/// Thread-safe via `RwLock`. Not persistent; data lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, VaultRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of initialized accounts
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update<T>(
        &self,
        account: &str,
        apply: impl FnOnce(&mut VaultRecord) -> T,
    ) -> CustodyResult<T> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records.get_mut(account).ok_or_else(|| missing_record(account))?;
        Ok(apply(record))
    }
}

#[async_trait]
impl EnvelopeStore for MemoryStore {
    async fn load(&self, account: &str) -> CustodyResult<Option<VaultRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .cloned())
    }

    async fn create_if_absent(&self, account: &str, record: VaultRecord) -> CustodyResult<bool> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(account) {
            return Ok(false);
        }
        records.insert(account.to_string(), record);
        Ok(true)
    }

    async fn put_password_envelope(
        &self,
        account: &str,
        envelope: PasswordEnvelope,
    ) -> CustodyResult<()> {
        self.update(account, |r| r.password_envelope = envelope)
    }

    async fn put_recovery_envelope(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        self.update(account, |r| r.recovery = Some(envelope))
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
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn test_load_absent() {
        let store = MemoryStore::new();
        assert!(store.load("alice").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_create_if_absent_only_once() {
        let store = MemoryStore::new();
        assert!(store.create_if_absent("alice", record(1)).await.unwrap());
        assert!(!store.create_if_absent("alice", record(2)).await.unwrap());

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded, record(1), "second create must not overwrite");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_put_envelopes() {
        let store = MemoryStore::new();
        store.create_if_absent("alice", record(1)).await.unwrap();

        store
            .put_recovery_envelope("alice", recovery_envelope(3))
            .await
            .unwrap();
        store
            .put_password_envelope("alice", password_envelope(4))
            .await
            .unwrap();

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.password_envelope, password_envelope(4));
        assert_eq!(loaded.recovery, Some(recovery_envelope(3)));
    }

    #[tokio::test]
    async fn test_create_recovery_if_absent_only_once() {
        let store = MemoryStore::new();
        store.create_if_absent("alice", record(1)).await.unwrap();

        assert!(store
            .create_recovery_if_absent("alice", recovery_envelope(2))
            .await
            .unwrap());
        assert!(!store
            .create_recovery_if_absent("alice", recovery_envelope(3))
            .await
            .unwrap());

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.recovery, Some(recovery_envelope(2)));
        assert!(matches!(
            store
                .create_recovery_if_absent("ghost", recovery_envelope(2))
                .await,
            Err(CustodyError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_credentials_sets_both() {
        let store = MemoryStore::new();
        store.create_if_absent("alice", record(1)).await.unwrap();
        store
            .replace_credentials("alice", password_envelope(5), recovery_envelope(6))
            .await
            .unwrap();

        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.password_envelope, password_envelope(5));
        assert_eq!(loaded.recovery, Some(recovery_envelope(6)));
    }

    #[tokio::test]
    async fn test_put_without_record_fails() {
        let store = MemoryStore::new();
        let err = store
            .put_password_envelope("ghost", password_envelope(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::Storage(_)));
    }

    #[tokio::test]
    async fn test_arc_store_delegates() {
        let store = Arc::new(MemoryStore::new());
        let shared = Arc::clone(&store);
        assert!(shared.create_if_absent("bob", record(9)).await.unwrap());
        assert_eq!(store.len(), 1);
    }
}
