//! vaultkey-session: the vault lifecycle manager and envelope persistence
//!
//! A [`VaultManager`] owns one account's master key from unlock until lock
//! and hands out [`VaultSession`] handles for file work. Envelopes are read
//! and written through an [`EnvelopeStore`].

pub mod file_store;
pub mod lifecycle;
pub mod store;

pub use file_store::JsonFileStore;
pub use lifecycle::{
    LockReason, ManagerOptions, VaultManager, VaultSession, VaultState, VaultStatus,
};
pub use store::{EnvelopeStore, MemoryStore};
