use thiserror::Error;

pub type CustodyResult<T> = Result<T, CustodyError>;

/// Every failure the key-custody core can surface.
///
/// Cryptographic failures are collapsed on purpose: a wrong password, a
/// tampered envelope, and a mismatched phrase key all surface as
/// [`CustodyError::WrongSecret`]. Only format problems detected before any
/// decryption attempt get a specific variant.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("incorrect credentials")]
    WrongSecret,

    #[error("invalid recovery phrase format: {0}")]
    InvalidPhrase(String),

    #[error("vault is not initialized for this account")]
    VaultNotInitialized,

    #[error("a password is required to unlock this vault")]
    PasswordRequired,

    #[error("vault is already initialized for this account")]
    VaultAlreadyInitialized,

    #[error("recovery is already enabled for this account")]
    RecoveryAlreadyEnabled,

    #[error("recovery is not enabled for this account")]
    RecoveryNotEnabled,

    #[error("vault is locked")]
    VaultLocked,

    #[error("another vault operation is already in progress")]
    OperationInProgress,

    #[error("entropy source failure: {0}")]
    EntropySourceFailure(String),

    #[error("nonce reuse detected")]
    NonceReuseDetected,

    #[error("authentication failure")]
    AuthenticationFailure,

    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    #[error("invalid salt length: {actual} bytes (expected {expected})")]
    InvalidSalt { expected: usize, actual: usize },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("key derivation error: {0}")]
    Kdf(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CustodyError {
    /// True when the process must stop issuing keys altogether.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CustodyError::EntropySourceFailure(_))
    }
}
