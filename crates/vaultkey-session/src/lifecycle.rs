//! Vault key lifecycle: the per-account unlock state machine
//!
//! ```text
//!            initialize()                  lock() / idle timeout
//!  Locked ──► Initializing ──┐        ┌──────────────────────────┐
//!    │                       ├──► Unlocked ◄─────────────────────┘
//!    └──► Unlocking ─────────┘        │
//!          │  (password or phrase)    │
//!          └── failure / cancel ──► Locked
//! ```
//!
//! Every transition funnels through one async mutex, so a timeout-driven
//! lock and a just-finished unlock cannot interleave. Argon2id runs on the
//! blocking pool; a caller that drops an in-flight unlock leaves the KDF to
//! finish on its own and the machine falls back to `Locked`.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use vaultkey_core::config::VaultConfig;
use vaultkey_core::{
    CustodyError, CustodyResult, EncryptedFile, FileKeyEnvelope, IdentityEnvelope, KdfProfile,
    RecoveryEnvelope, VaultRecord,
};
use vaultkey_crypto::file::DEFAULT_CHUNK_SIZE;
use vaultkey_crypto::{
    unwrap_file_key, wrap_file_key, FileCipher, FileKey, IdentityKeyPair, KeyWrapper, MasterKey,
    RecoveryPhrase, WrappingKey,
};

use crate::store::EnvelopeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Initializing,
    Unlocking,
    Unlocked,
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultState::Locked => write!(f, "locked"),
            VaultState::Initializing => write!(f, "initializing"),
            VaultState::Unlocking => write!(f, "unlocking"),
            VaultState::Unlocked => write!(f, "unlocked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Explicit,
    Logout,
    IdleTimeout,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockReason::Explicit => write!(f, "explicit"),
            LockReason::Logout => write!(f, "logout"),
            LockReason::IdleTimeout => write!(f, "idle-timeout"),
        }
    }
}

/// What is known about an account without unlocking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultStatus {
    pub initialized: bool,
    pub recovery_enabled: bool,
}

/// Tuning for one [`VaultManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub profile: KdfProfile,
    pub idle_timeout: Duration,
    pub watchdog_interval: Duration,
    pub chunk_size: usize,
    pub workers: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            profile: KdfProfile::Interactive,
            idle_timeout: Duration::from_secs(600),
            watchdog_interval: Duration::from_secs(15),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 4,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &VaultConfig) -> CustodyResult<Self> {
        config.validate()?;
        let chunk_size = usize::try_from(config.files.chunk_size_bytes)
            .map_err(|_| CustodyError::Config("files.chunk_size_bytes too large".into()))?;
        Ok(Self {
            profile: config.kdf.profile,
            idle_timeout: config.session.idle_timeout(),
            watchdog_interval: config.session.watchdog_interval(),
            chunk_size,
            workers: config.files.workers,
        })
    }
}

/// Key material held while the vault is unlocked. Dropping it zeroizes the
/// master key (and the identity secret).
struct UnlockedKeys {
    master: MasterKey,
    identity: Option<IdentityKeyPair>,
}

/// The single place an unlocked master key lives. Every [`VaultSession`]
/// cloned from one unlock shares the same slot.
struct KeySlot {
    keys: RwLock<Option<Arc<UnlockedKeys>>>,
}

impl KeySlot {
    fn new(keys: UnlockedKeys) -> Self {
        Self {
            keys: RwLock::new(Some(Arc::new(keys))),
        }
    }

    fn get(&self) -> CustodyResult<Arc<UnlockedKeys>> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CustodyError::VaultLocked)
    }

    fn is_live(&self) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Take the keys out of the slot. They are zeroized as soon as the last
    /// in-flight file operation releases its reference.
    fn revoke(&self) -> bool {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

/// Last qualifying interaction, shared between a manager and its handles.
type ActivityClock = std::sync::Mutex<Instant>;

fn touch(clock: &ActivityClock) {
    *clock.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
}

/// Handle to an unlocked vault.
///
/// Holding a valid handle is the only way to reach the master key. After the
/// manager locks, every clone of the handle returns `VaultLocked`. Every key
/// operation through the handle counts as activity and pushes back the idle
/// deadline.
#[derive(Clone)]
pub struct VaultSession {
    slot: Arc<KeySlot>,
    cipher: FileCipher,
    activity: Weak<ActivityClock>,
}

impl VaultSession {
    pub fn is_valid(&self) -> bool {
        self.slot.is_live()
    }

    /// The account's X25519 public key, when the record carries an identity.
    pub fn public_key(&self) -> CustodyResult<Option<[u8; 32]>> {
        let keys = self.slot.get()?;
        Ok(keys.identity.as_ref().map(IdentityKeyPair::public_key_bytes))
    }

    pub fn encrypt_file(&self, plaintext: &[u8]) -> CustodyResult<EncryptedFile> {
        let keys = self.keys()?;
        let result = self.cipher.encrypt_file(&keys.master, plaintext);
        self.record_activity();
        result
    }

    pub fn decrypt_file(&self, file: &EncryptedFile) -> CustodyResult<Vec<u8>> {
        let keys = self.keys()?;
        let result = self.cipher.decrypt_file(&keys.master, file);
        self.record_activity();
        result
    }

    pub fn wrap_file_key(&self, file_key: &FileKey) -> CustodyResult<FileKeyEnvelope> {
        let keys = self.keys()?;
        wrap_file_key(&keys.master, file_key)
    }

    pub fn unwrap_file_key(&self, envelope: &FileKeyEnvelope) -> CustodyResult<FileKey> {
        let keys = self.keys()?;
        unwrap_file_key(&keys.master, envelope)
    }

    /// Push back the idle deadline. A no-op once the manager is gone.
    pub fn record_activity(&self) {
        if let Some(clock) = self.activity.upgrade() {
            touch(&clock);
        }
    }

    fn keys(&self) -> CustodyResult<Arc<UnlockedKeys>> {
        let keys = self.slot.get()?;
        self.record_activity();
        Ok(keys)
    }

    /// Key-encrypting key shared with another account's identity.
    pub fn derive_share_key(
        &self,
        their_public: &[u8; 32],
        context: &[u8],
    ) -> CustodyResult<WrappingKey> {
        let keys = self.slot.get()?;
        let identity = keys.identity.as_ref().ok_or_else(|| {
            CustodyError::MalformedEnvelope("vault record has no identity keypair".into())
        })?;
        identity.derive_kek(their_public, context)
    }

    fn same_slot(&self, other: &Arc<KeySlot>) -> bool {
        Arc::ptr_eq(&self.slot, other)
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Lifecycle {
    slot: Option<Arc<KeySlot>>,
}

impl Lifecycle {
    fn live_slot(&self) -> Option<&Arc<KeySlot>> {
        self.slot.as_ref().filter(|slot| slot.is_live())
    }
}

/// Publishes an in-flight state and restores `fallback` unless completed.
/// Dropping the owning future mid-transition lands here.
struct TransitionGuard<'a> {
    state: &'a watch::Sender<VaultState>,
    fallback: VaultState,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn enter(state: &'a watch::Sender<VaultState>, during: VaultState) -> Self {
        let fallback = state.send_replace(during);
        Self {
            state,
            fallback,
            armed: true,
        }
    }

    fn complete(mut self, state: VaultState) {
        self.armed = false;
        self.state.send_replace(state);
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(self.fallback);
        }
    }
}

/// Owns one account's master key between unlock and lock.
pub struct VaultManager<S: EnvelopeStore> {
    account: String,
    store: S,
    wrapper: KeyWrapper,
    cipher: FileCipher,
    idle_timeout: Duration,
    watchdog_interval: Duration,
    transition: Mutex<Lifecycle>,
    state: watch::Sender<VaultState>,
    last_activity: Arc<ActivityClock>,
}

impl<S: EnvelopeStore> VaultManager<S> {
    pub fn new(account: impl Into<String>, store: S, options: ManagerOptions) -> CustodyResult<Self> {
        let (state, _) = watch::channel(VaultState::Locked);
        Ok(Self {
            account: account.into(),
            store,
            wrapper: KeyWrapper::new(options.profile),
            cipher: FileCipher::new(options.chunk_size, options.workers)?,
            idle_timeout: options.idle_timeout,
            watchdog_interval: options.watchdog_interval,
            transition: Mutex::new(Lifecycle::default()),
            state,
            last_activity: Arc::new(std::sync::Mutex::new(Instant::now())),
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> VaultState {
        *self.state.borrow()
    }

    /// Watch state transitions (for UIs that grey out controls while locked).
    pub fn subscribe(&self) -> watch::Receiver<VaultState> {
        self.state.subscribe()
    }

    pub async fn probe(&self) -> CustodyResult<VaultStatus> {
        let record = self.store.load(&self.account).await?;
        Ok(VaultStatus {
            initialized: record.is_some(),
            recovery_enabled: record.is_some_and(|r| r.recovery.is_some()),
        })
    }

    /// Create the vault: fresh master key, identity keypair, password
    /// envelope. Fails with `VaultAlreadyInitialized` if any record exists,
    /// including one created concurrently by another process.
    pub async fn initialize(&self, password: SecretString) -> CustodyResult<VaultSession> {
        let mut lifecycle = self.begin_transition()?;
        let guard = TransitionGuard::enter(&self.state, VaultState::Initializing);
        let result = self.do_initialize(password).await;
        self.finish(&mut lifecycle, guard, result, "initialize")
    }

    async fn do_initialize(&self, password: SecretString) -> CustodyResult<UnlockedKeys> {
        if password.expose_secret().is_empty() {
            return Err(CustodyError::PasswordRequired);
        }
        if self.store.load(&self.account).await?.is_some() {
            return Err(CustodyError::VaultAlreadyInitialized);
        }

        let wrapper = self.wrapper;
        let (keys, record) = run_blocking(move || {
            let master = MasterKey::generate()?;
            let identity = IdentityKeyPair::generate()?;
            let record = VaultRecord {
                password_envelope: wrapper.wrap_with_password(&master, &password)?,
                identity: Some(identity.wrap(&master)?),
                recovery: None,
            };
            let keys = UnlockedKeys {
                master,
                identity: Some(identity),
            };
            Ok((keys, record))
        })
        .await?;

        if !self.store.create_if_absent(&self.account, record).await? {
            return Err(CustodyError::VaultAlreadyInitialized);
        }
        tracing::info!(account = %self.account, "vault initialized");
        Ok(keys)
    }

    /// Unlock with the account password.
    ///
    /// Distinguishes `VaultNotInitialized` (offer init), `PasswordRequired`
    /// (prompt), and `WrongSecret` (retry). Unlocking an already unlocked
    /// vault re-verifies the password and returns a handle to the live
    /// session.
    pub async fn unlock(&self, password: Option<SecretString>) -> CustodyResult<VaultSession> {
        let mut lifecycle = self.begin_transition()?;
        if lifecycle.live_slot().is_some() {
            let result = self.do_unlock(password).await.map(drop);
            return self.reuse_live(&lifecycle, result, "unlock");
        }
        let guard = TransitionGuard::enter(&self.state, VaultState::Unlocking);
        let result = self.do_unlock(password).await;
        self.finish(&mut lifecycle, guard, result, "unlock")
    }

    async fn do_unlock(&self, password: Option<SecretString>) -> CustodyResult<UnlockedKeys> {
        let record = self.load_record().await?;
        let password = password
            .filter(|p| !p.expose_secret().is_empty())
            .ok_or(CustodyError::PasswordRequired)?;

        let wrapper = self.wrapper;
        run_blocking(move || {
            let master = wrapper.unwrap_with_password(&record.password_envelope, &password)?;
            let identity = open_identity(record.identity.as_ref(), &master)?;
            Ok(UnlockedKeys { master, identity })
        })
        .await
    }

    /// Unlock with the recovery phrase instead of the password. A phrase that
    /// fails word-list or checksum validation is rejected as `InvalidPhrase`
    /// before any decryption is attempted.
    pub async fn unlock_with_phrase(&self, phrase: SecretString) -> CustodyResult<VaultSession> {
        let mut lifecycle = self.begin_transition()?;
        if lifecycle.live_slot().is_some() {
            let result = self.do_unlock_with_phrase(&phrase).await.map(drop);
            return self.reuse_live(&lifecycle, result, "unlock_with_phrase");
        }
        let guard = TransitionGuard::enter(&self.state, VaultState::Unlocking);
        let result = self.do_unlock_with_phrase(&phrase).await;
        self.finish(&mut lifecycle, guard, result, "unlock_with_phrase")
    }

    async fn do_unlock_with_phrase(&self, phrase: &SecretString) -> CustodyResult<UnlockedKeys> {
        let (record, recovery, phrase) = self.prepare_phrase(phrase).await?;
        let wrapper = self.wrapper;
        run_blocking(move || {
            let master = wrapper.unwrap_with_phrase(&recovery, &phrase)?;
            let identity = open_identity(record.identity.as_ref(), &master)?;
            Ok(UnlockedKeys { master, identity })
        })
        .await
    }

    /// Forgot-password flow: the phrase recovers the master key, a new
    /// password envelope is written, and the recovery envelope is re-wrapped
    /// under the same phrase with a fresh salt and nonce. Both land in one
    /// store write.
    pub async fn reset_password_with_phrase(
        &self,
        phrase: SecretString,
        new_password: SecretString,
    ) -> CustodyResult<VaultSession> {
        let mut lifecycle = self.begin_transition()?;
        let guard = TransitionGuard::enter(&self.state, VaultState::Unlocking);
        let result = self.do_reset_password(&phrase, new_password).await;
        // A reset while unlocked swaps in fresh keys; old handles go stale.
        if result.is_ok() {
            if let Some(old) = lifecycle.slot.take() {
                old.revoke();
            }
        }
        self.finish(&mut lifecycle, guard, result, "reset_password_with_phrase")
    }

    async fn do_reset_password(
        &self,
        phrase: &SecretString,
        new_password: SecretString,
    ) -> CustodyResult<UnlockedKeys> {
        if new_password.expose_secret().is_empty() {
            return Err(CustodyError::PasswordRequired);
        }
        let (record, recovery, phrase) = self.prepare_phrase(phrase).await?;

        let wrapper = self.wrapper;
        let (keys, password_envelope, recovery_envelope) = run_blocking(move || {
            let master = wrapper.unwrap_with_phrase(&recovery, &phrase)?;
            let identity = open_identity(record.identity.as_ref(), &master)?;
            let password_envelope = wrapper.wrap_with_password(&master, &new_password)?;
            let recovery_envelope = wrapper.wrap_with_phrase(&master, &phrase)?;
            Ok((
                UnlockedKeys { master, identity },
                password_envelope,
                recovery_envelope,
            ))
        })
        .await?;

        self.store
            .replace_credentials(&self.account, password_envelope, recovery_envelope)
            .await?;
        tracing::info!(account = %self.account, "password reset with recovery phrase");
        Ok(keys)
    }

    /// Enable recovery. The returned phrase must be shown to the user once;
    /// it is not stored anywhere.
    ///
    /// Another manager (another tab or process over the same store) may
    /// enable recovery while this one derives its key; the store decides,
    /// and only one caller ever gets a phrase back.
    pub async fn setup_recovery(&self, session: &VaultSession) -> CustodyResult<RecoveryPhrase> {
        let lifecycle = self.transition.lock().await;
        let keys = self.session_keys(&lifecycle, session)?;
        let record = self.load_record().await?;
        if record.recovery.is_some() {
            tracing::warn!(account = %self.account, "recovery setup refused: already enabled");
            return Err(CustodyError::RecoveryAlreadyEnabled);
        }

        let (phrase, envelope) = self.new_recovery_envelope(keys).await?;
        if !self
            .store
            .create_recovery_if_absent(&self.account, envelope)
            .await?
        {
            tracing::warn!(account = %self.account, "recovery setup lost a race: already enabled");
            return Err(CustodyError::RecoveryAlreadyEnabled);
        }
        self.record_activity();
        tracing::info!(account = %self.account, "recovery enabled");
        Ok(phrase)
    }

    /// Replace the recovery phrase. The old phrase stops working; the
    /// password envelope is untouched.
    pub async fn rotate_recovery_phrase(
        &self,
        session: &VaultSession,
    ) -> CustodyResult<RecoveryPhrase> {
        let lifecycle = self.transition.lock().await;
        let keys = self.session_keys(&lifecycle, session)?;
        let record = self.load_record().await?;
        if record.recovery.is_none() {
            return Err(CustodyError::RecoveryNotEnabled);
        }

        let (phrase, envelope) = self.new_recovery_envelope(keys).await?;
        self.store
            .put_recovery_envelope(&self.account, envelope)
            .await?;
        self.record_activity();
        tracing::info!(account = %self.account, "recovery phrase rotated");
        Ok(phrase)
    }

    /// Re-wrap the master key under a new password. The recovery envelope is
    /// untouched and keeps working.
    pub async fn change_password(
        &self,
        session: &VaultSession,
        new_password: SecretString,
    ) -> CustodyResult<()> {
        if new_password.expose_secret().is_empty() {
            return Err(CustodyError::PasswordRequired);
        }
        let lifecycle = self.transition.lock().await;
        let keys = self.session_keys(&lifecycle, session)?;

        let wrapper = self.wrapper;
        let envelope = run_blocking(move || wrapper.rotate(&keys.master, &new_password)).await?;

        self.store
            .put_password_envelope(&self.account, envelope)
            .await?;
        self.record_activity();
        tracing::info!(account = %self.account, "password changed");
        Ok(())
    }

    /// Note a qualifying user interaction; pushes back the idle deadline.
    pub fn record_activity(&self) {
        touch(&self.last_activity);
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Lock now. Waits for any in-flight transition, then revokes the key
    /// slot so every session handle becomes invalid.
    pub async fn lock(&self, reason: LockReason) {
        let mut lifecycle = self.transition.lock().await;
        self.revoke(&mut lifecycle, reason);
    }

    /// Lock if the idle deadline has passed. Skips (returns `false`) while
    /// another transition holds the state machine.
    pub async fn lock_if_idle(&self) -> bool {
        let Ok(mut lifecycle) = self.transition.try_lock() else {
            return false;
        };
        if lifecycle.live_slot().is_none() || self.idle_for() < self.idle_timeout {
            return false;
        }
        self.revoke(&mut lifecycle, LockReason::IdleTimeout)
    }

    /// Background task that locks the vault after `idle_timeout` without
    /// activity. Exits once the manager is dropped.
    pub fn spawn_idle_watchdog(self: &Arc<Self>) -> JoinHandle<()>
    where
        S: 'static,
    {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.watchdog_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.lock_if_idle().await;
            }
            tracing::debug!("idle watchdog stopped");
        })
    }

    fn begin_transition(&self) -> CustodyResult<MutexGuard<'_, Lifecycle>> {
        self.transition.try_lock().map_err(|_| {
            tracing::debug!(account = %self.account, "transition already in flight");
            CustodyError::OperationInProgress
        })
    }

    fn finish(
        &self,
        lifecycle: &mut Lifecycle,
        guard: TransitionGuard<'_>,
        result: CustodyResult<UnlockedKeys>,
        op: &'static str,
    ) -> CustodyResult<VaultSession> {
        match result {
            Ok(keys) => {
                let slot = Arc::new(KeySlot::new(keys));
                lifecycle.slot = Some(Arc::clone(&slot));
                self.record_activity();
                guard.complete(VaultState::Unlocked);
                tracing::info!(account = %self.account, op, "vault unlocked");
                Ok(self.session_for(slot))
            }
            Err(e) => {
                log_failure(&self.account, op, &e);
                // guard drops here and restores the prior state
                Err(e)
            }
        }
    }

    fn reuse_live(
        &self,
        lifecycle: &Lifecycle,
        result: CustodyResult<()>,
        op: &'static str,
    ) -> CustodyResult<VaultSession> {
        if let Err(e) = result {
            log_failure(&self.account, op, &e);
            return Err(e);
        }
        let slot = lifecycle.live_slot().cloned().ok_or(CustodyError::VaultLocked)?;
        self.record_activity();
        Ok(self.session_for(slot))
    }

    fn session_for(&self, slot: Arc<KeySlot>) -> VaultSession {
        VaultSession {
            slot,
            cipher: self.cipher.clone(),
            activity: Arc::downgrade(&self.last_activity),
        }
    }

    fn revoke(&self, lifecycle: &mut Lifecycle, reason: LockReason) -> bool {
        let revoked = lifecycle
            .slot
            .take()
            .is_some_and(|slot| slot.revoke());
        self.state.send_replace(VaultState::Locked);
        if revoked {
            tracing::info!(account = %self.account, %reason, "vault locked");
        }
        revoked
    }

    /// The session must belong to this manager's current unlock.
    fn session_keys(
        &self,
        lifecycle: &Lifecycle,
        session: &VaultSession,
    ) -> CustodyResult<Arc<UnlockedKeys>> {
        match lifecycle.live_slot() {
            Some(slot) if session.same_slot(slot) => slot.get(),
            _ => Err(CustodyError::VaultLocked),
        }
    }

    async fn load_record(&self) -> CustodyResult<VaultRecord> {
        self.store
            .load(&self.account)
            .await?
            .ok_or(CustodyError::VaultNotInitialized)
    }

    async fn prepare_phrase(
        &self,
        phrase: &SecretString,
    ) -> CustodyResult<(VaultRecord, RecoveryEnvelope, RecoveryPhrase)> {
        let phrase = RecoveryPhrase::parse(phrase.expose_secret())?;
        let record = self.load_record().await?;
        let recovery = record
            .recovery
            .clone()
            .ok_or(CustodyError::RecoveryNotEnabled)?;
        Ok((record, recovery, phrase))
    }

    async fn new_recovery_envelope(
        &self,
        keys: Arc<UnlockedKeys>,
    ) -> CustodyResult<(RecoveryPhrase, RecoveryEnvelope)> {
        let wrapper = self.wrapper;
        run_blocking(move || {
            let phrase = RecoveryPhrase::generate()?;
            let envelope = wrapper.rotate(&keys.master, &phrase)?;
            Ok((phrase, envelope))
        })
        .await
    }
}

/// Open the identity envelope with a freshly unwrapped master key. A tag
/// failure here is reported like a wrong password.
fn open_identity(
    envelope: Option<&IdentityEnvelope>,
    master: &MasterKey,
) -> CustodyResult<Option<IdentityKeyPair>> {
    envelope
        .map(|env| {
            IdentityKeyPair::unwrap(env, master).map_err(|e| match e {
                CustodyError::AuthenticationFailure => CustodyError::WrongSecret,
                other => other,
            })
        })
        .transpose()
}

/// Run CPU-bound key work on the blocking pool. If the awaiting future is
/// dropped, the closure still runs to completion and its result is dropped.
async fn run_blocking<T, F>(work: F) -> CustodyResult<T>
where
    F: FnOnce() -> CustodyResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CustodyError::Other(anyhow::anyhow!("key task failed: {e}")))?
}

fn log_failure(account: &str, op: &str, error: &CustodyError) {
    if error.is_fatal() {
        tracing::error!(account, op, %error, "vault transition failed");
    } else {
        tracing::warn!(account, op, %error, "vault transition failed");
    }
}
