//! End-to-end vault flows against the in-memory and JSON file stores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use vaultkey_core::{
    CustodyError, CustodyResult, KdfProfile, PasswordEnvelope, RecoveryEnvelope, VaultRecord,
};
use vaultkey_session::{
    EnvelopeStore, JsonFileStore, LockReason, ManagerOptions, MemoryStore, VaultManager,
    VaultState,
};

const MIB: usize = 1024 * 1024;

fn options() -> ManagerOptions {
    ManagerOptions {
        profile: KdfProfile::Minimal,
        workers: 2,
        ..ManagerOptions::default()
    }
}

fn secret(s: &str) -> SecretString {
    SecretString::from(s)
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(131) ^ (i >> 11)) as u8)
        .collect()
}

/// Store whose loads can be held open to simulate a slow backend.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    hold_loads: AtomicBool,
}

impl GatedStore {
    fn hold(&self, hold: bool) {
        self.hold_loads.store(hold, Ordering::SeqCst);
    }
}

#[async_trait]
impl EnvelopeStore for GatedStore {
    async fn load(&self, account: &str) -> CustodyResult<Option<VaultRecord>> {
        if self.hold_loads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.load(account).await
    }

    async fn create_if_absent(&self, account: &str, record: VaultRecord) -> CustodyResult<bool> {
        self.inner.create_if_absent(account, record).await
    }

    async fn put_password_envelope(
        &self,
        account: &str,
        envelope: PasswordEnvelope,
    ) -> CustodyResult<()> {
        self.inner.put_password_envelope(account, envelope).await
    }

    async fn put_recovery_envelope(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        self.inner.put_recovery_envelope(account, envelope).await
    }

    async fn create_recovery_if_absent(
        &self,
        account: &str,
        envelope: RecoveryEnvelope,
    ) -> CustodyResult<bool> {
        self.inner.create_recovery_if_absent(account, envelope).await
    }

    async fn replace_credentials(
        &self,
        account: &str,
        password: PasswordEnvelope,
        recovery: RecoveryEnvelope,
    ) -> CustodyResult<()> {
        self.inner.replace_credentials(account, password, recovery).await
    }
}

#[tokio::test]
async fn twelve_mib_file_splits_into_three_chunks() {
    let m = VaultManager::new("alice", MemoryStore::new(), options()).unwrap();
    let session = m.initialize(secret("Tr0ub4dor&3")).await.unwrap();
    let data = make_data(12 * MIB);

    let encrypted = session.encrypt_file(&data).unwrap();
    let sizes: Vec<usize> = encrypted
        .chunks
        .iter()
        .map(|c| c.ciphertext.len() - 16)
        .collect();
    assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
    assert_eq!(session.decrypt_file(&encrypted).unwrap(), data);

    for target in 0..encrypted.chunks.len() {
        let mut tampered = encrypted.clone();
        let last = tampered.chunks[target].ciphertext.len() - 1;
        tampered.chunks[target].ciphertext[last] ^= 0x01;
        assert!(
            matches!(
                session.decrypt_file(&tampered),
                Err(CustodyError::CorruptedFile(_))
            ),
            "tag corruption in chunk {target} must fail the whole file"
        );
    }
}

#[tokio::test]
async fn forgot_password_flow() {
    let m = VaultManager::new("alice", MemoryStore::new(), options()).unwrap();
    let session = m.initialize(secret("old-password")).await.unwrap();
    let phrase = m.setup_recovery(&session).await.unwrap();
    let words = phrase.expose().to_string();
    let file = session.encrypt_file(b"tax returns").unwrap();
    let recovery_before = m.store().load("alice").await.unwrap().unwrap().recovery;
    m.lock(LockReason::Logout).await;

    let session = m
        .reset_password_with_phrase(secret(&words), secret("new-password"))
        .await
        .unwrap();
    assert_eq!(session.decrypt_file(&file).unwrap(), b"tax returns");

    let record = m.store().load("alice").await.unwrap().unwrap();
    assert_ne!(record.recovery, recovery_before, "recovery envelope re-wrapped");
    m.lock(LockReason::Explicit).await;

    assert!(matches!(
        m.unlock(Some(secret("old-password"))).await,
        Err(CustodyError::WrongSecret)
    ));
    m.unlock(Some(secret("new-password"))).await.unwrap();
    m.lock(LockReason::Explicit).await;

    // The same phrase still opens the re-wrapped recovery envelope
    let session = m.unlock_with_phrase(secret(&words)).await.unwrap();
    assert_eq!(session.decrypt_file(&file).unwrap(), b"tax returns");
}

#[tokio::test]
async fn reset_with_wrong_phrase_writes_nothing() {
    let m = VaultManager::new("alice", MemoryStore::new(), options()).unwrap();
    let session = m.initialize(secret("pw")).await.unwrap();
    m.setup_recovery(&session).await.unwrap();
    m.lock(LockReason::Explicit).await;
    let before = m.store().load("alice").await.unwrap();

    let other = vaultkey_crypto::RecoveryPhrase::generate().unwrap();
    assert!(matches!(
        m.reset_password_with_phrase(secret(other.expose()), secret("new"))
            .await,
        Err(CustodyError::WrongSecret)
    ));
    assert_eq!(m.store().load("alice").await.unwrap(), before);
    assert_eq!(m.state(), VaultState::Locked);
}

#[tokio::test]
async fn rotating_one_envelope_keeps_the_other() {
    let m = VaultManager::new("alice", MemoryStore::new(), options()).unwrap();
    let session = m.initialize(secret("first")).await.unwrap();
    let phrase = m.setup_recovery(&session).await.unwrap().expose().to_string();
    let file = session.encrypt_file(b"payload").unwrap();

    m.change_password(&session, secret("second")).await.unwrap();
    m.lock(LockReason::Explicit).await;
    let via_phrase = m.unlock_with_phrase(secret(&phrase)).await.unwrap();
    assert_eq!(via_phrase.decrypt_file(&file).unwrap(), b"payload");

    let new_phrase = m
        .rotate_recovery_phrase(&via_phrase)
        .await
        .unwrap()
        .expose()
        .to_string();
    assert_ne!(new_phrase, phrase);
    m.lock(LockReason::Explicit).await;

    let via_password = m.unlock(Some(secret("second"))).await.unwrap();
    assert_eq!(via_password.decrypt_file(&file).unwrap(), b"payload");
    m.lock(LockReason::Explicit).await;

    assert!(matches!(
        m.unlock_with_phrase(secret(&phrase)).await,
        Err(CustodyError::WrongSecret)
    ));
    m.unlock_with_phrase(secret(&new_phrase)).await.unwrap();
}

#[tokio::test]
async fn pasted_phrase_is_normalized() {
    let m = VaultManager::new("alice", MemoryStore::new(), options()).unwrap();
    let session = m.initialize(secret("pw")).await.unwrap();
    let phrase = m.setup_recovery(&session).await.unwrap();
    m.lock(LockReason::Explicit).await;

    let messy = format!(
        "  {}\r\n",
        phrase.expose().to_uppercase().replace(' ', " \t\n ")
    );
    m.unlock_with_phrase(secret(&messy)).await.unwrap();
}

#[tokio::test]
async fn concurrent_initialize_on_one_manager() {
    let m = VaultManager::new("alice", MemoryStore::new(), options()).unwrap();

    let (a, b) = tokio::join!(m.initialize(secret("a")), m.initialize(secret("b")));
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, CustodyError::OperationInProgress));
    assert_eq!(m.store().len(), 1);
}

#[tokio::test]
async fn concurrent_initialize_across_managers_creates_one_vault() {
    let store = Arc::new(MemoryStore::new());
    let m1 = VaultManager::new("alice", Arc::clone(&store), options()).unwrap();
    let m2 = VaultManager::new("alice", Arc::clone(&store), options()).unwrap();

    let (a, b) = tokio::join!(m1.initialize(secret("one")), m2.initialize(secret("two")));
    let (winner, loser_err) = match (a, b) {
        (Ok(_), Err(e)) => ("one", e),
        (Err(e), Ok(_)) => ("two", e),
        other => panic!("expected exactly one initialization, got {other:?}"),
    };
    assert!(matches!(loser_err, CustodyError::VaultAlreadyInitialized));
    assert_eq!(m2.state(), if winner == "two" { VaultState::Unlocked } else { VaultState::Locked });

    let probe = VaultManager::new("alice", Arc::clone(&store), options()).unwrap();
    probe.unlock(Some(secret(winner))).await.unwrap();
}

#[tokio::test]
async fn concurrent_recovery_setup_across_managers_yields_one_phrase() {
    let store = Arc::new(MemoryStore::new());
    let m1 = VaultManager::new("alice", Arc::clone(&store), options()).unwrap();
    m1.initialize(secret("pw")).await.unwrap();
    let s1 = m1.unlock(Some(secret("pw"))).await.unwrap();
    let m2 = VaultManager::new("alice", Arc::clone(&store), options()).unwrap();
    let s2 = m2.unlock(Some(secret("pw"))).await.unwrap();

    let (a, b) = tokio::join!(m1.setup_recovery(&s1), m2.setup_recovery(&s2));
    let phrase = match (a, b) {
        (Ok(p), Err(e)) | (Err(e), Ok(p)) => {
            assert!(matches!(e, CustodyError::RecoveryAlreadyEnabled));
            p
        }
        (a, b) => panic!("expected exactly one phrase, got {:?} / {:?}", a.is_ok(), b.is_ok()),
    };

    let fresh = VaultManager::new("alice", Arc::clone(&store), options()).unwrap();
    fresh
        .unlock_with_phrase(secret(phrase.expose()))
        .await
        .expect("the phrase that was shown must unlock the vault");
}

#[tokio::test]
async fn json_store_recovers_from_empty_record() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("alice.json"), b"").unwrap();

    let m = VaultManager::new("alice", JsonFileStore::new(dir.path()), options()).unwrap();
    assert!(!m.probe().await.unwrap().initialized);
    assert!(matches!(
        m.unlock(Some(secret("pw"))).await,
        Err(CustodyError::VaultNotInitialized)
    ));

    m.initialize(secret("pw")).await.unwrap();
    m.lock(LockReason::Explicit).await;
    m.unlock(Some(secret("pw"))).await.unwrap();
}

#[tokio::test]
async fn cancelled_unlock_returns_to_locked() {
    let store = Arc::new(GatedStore::default());
    let m = Arc::new(VaultManager::new("alice", Arc::clone(&store), options()).unwrap());
    m.initialize(secret("pw")).await.unwrap();
    m.lock(LockReason::Explicit).await;

    store.hold(true);
    let mut states = m.subscribe();
    let pending = tokio::spawn({
        let m = Arc::clone(&m);
        async move { m.unlock(Some(secret("pw"))).await }
    });
    states
        .wait_for(|s| *s == VaultState::Unlocking)
        .await
        .unwrap();

    assert!(matches!(
        m.unlock(Some(secret("pw"))).await,
        Err(CustodyError::OperationInProgress)
    ));
    assert!(matches!(
        m.initialize(secret("pw")).await,
        Err(CustodyError::OperationInProgress)
    ));

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert_eq!(m.state(), VaultState::Locked);

    store.hold(false);
    let session = m.unlock(Some(secret("pw"))).await.unwrap();
    assert!(session.is_valid());
}

#[tokio::test(start_paused = true)]
async fn idle_watchdog_locks_after_timeout() {
    let opts = ManagerOptions {
        idle_timeout: Duration::from_secs(600),
        watchdog_interval: Duration::from_secs(15),
        ..options()
    };
    let m = Arc::new(VaultManager::new("alice", MemoryStore::new(), opts).unwrap());
    let session = m.initialize(secret("pw")).await.unwrap();
    let watchdog = m.spawn_idle_watchdog();

    tokio::time::sleep(Duration::from_secs(300)).await;
    m.record_activity();
    tokio::time::sleep(Duration::from_secs(500)).await;
    assert!(session.is_valid(), "activity pushed the deadline back");
    assert_eq!(m.state(), VaultState::Unlocked);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!session.is_valid());
    assert_eq!(m.state(), VaultState::Locked);
    assert!(matches!(session.encrypt_file(b"x"), Err(CustodyError::VaultLocked)));

    drop(session);
    drop(m);
    tokio::time::timeout(Duration::from_secs(60), watchdog)
        .await
        .expect("watchdog exits once the manager is gone")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn file_operations_through_a_session_count_as_activity() {
    let opts = ManagerOptions {
        idle_timeout: Duration::from_secs(60),
        ..options()
    };
    let m = VaultManager::new("alice", MemoryStore::new(), opts).unwrap();
    let session = m.initialize(secret("pw")).await.unwrap();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(45)).await;
        let file = session.encrypt_file(b"upload").unwrap();
        session.decrypt_file(&file).unwrap();
        assert!(!m.lock_if_idle().await);
    }
    assert!(session.is_valid());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(m.lock_if_idle().await);
    assert!(!session.is_valid());
}

#[tokio::test(start_paused = true)]
async fn lock_if_idle_respects_deadline() {
    let opts = ManagerOptions {
        idle_timeout: Duration::from_secs(60),
        ..options()
    };
    let m = VaultManager::new("alice", MemoryStore::new(), opts).unwrap();
    assert!(!m.lock_if_idle().await, "nothing to lock");

    m.initialize(secret("pw")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(!m.lock_if_idle().await);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(m.lock_if_idle().await);
    assert_eq!(m.state(), VaultState::Locked);
}

#[tokio::test]
async fn json_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let file = {
        let m = VaultManager::new("alice", JsonFileStore::new(dir.path()), options()).unwrap();
        let session = m.initialize(secret("pw")).await.unwrap();
        m.setup_recovery(&session).await.unwrap();
        session.encrypt_file(&make_data(3000)).unwrap()
    };

    let json = file.to_json().unwrap();
    let m = VaultManager::new("alice", JsonFileStore::new(dir.path()), options()).unwrap();
    let status = m.probe().await.unwrap();
    assert!(status.initialized && status.recovery_enabled);

    let session = m.unlock(Some(secret("pw"))).await.unwrap();
    let restored = vaultkey_core::EncryptedFile::from_json(&json).unwrap();
    assert_eq!(session.decrypt_file(&restored).unwrap(), make_data(3000));
}
