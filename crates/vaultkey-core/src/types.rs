//! Envelope wire format shared by the crypto core and the persistence layer.
//!
//! Field names are part of the server contract and must not change:
//! every binary value crosses the boundary as standard base64 (`+/`, padded).

use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, CustodyResult};
use crate::{NONCE_SIZE, SALT_SIZE};

/// Named Argon2id cost profiles. Never discovered at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfProfile {
    /// 64 MiB, 3 passes, 1 lane (matches the deployed server KDF)
    #[default]
    Interactive,
    /// 256 MiB, 3 passes, 1 lane
    Moderate,
    /// 1 MiB, 1 pass, 1 lane. Tests and local development only.
    Minimal,
}

impl KdfProfile {
    /// Memory cost in KiB
    pub const fn mem_cost_kib(self) -> u32 {
        match self {
            KdfProfile::Interactive => 65536,
            KdfProfile::Moderate => 262144,
            KdfProfile::Minimal => 1024,
        }
    }

    /// Time cost (passes)
    pub const fn time_cost(self) -> u32 {
        match self {
            KdfProfile::Interactive | KdfProfile::Moderate => 3,
            KdfProfile::Minimal => 1,
        }
    }

    /// Parallelism (lanes)
    pub const fn parallelism(self) -> u32 {
        1
    }
}

impl std::fmt::Display for KdfProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KdfProfile::Interactive => "interactive",
            KdfProfile::Moderate => "moderate",
            KdfProfile::Minimal => "minimal",
        };
        f.write_str(name)
    }
}

/// MasterKey wrapped under an Argon2id(password, salt) key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordEnvelope {
    /// ciphertext || tag
    #[serde(with = "b64")]
    pub encrypted_master_key: Vec<u8>,
    #[serde(with = "b64::array")]
    pub master_nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64::array")]
    pub argon_salt: [u8; SALT_SIZE],
}

/// How the phrase key of a [`RecoveryEnvelope`] is derived.
///
/// Exactly one scheme is supported. Any other tag on the wire fails to
/// deserialize and surfaces as [`CustodyError::MalformedEnvelope`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryScheme {
    /// Argon2id over the BIP-39 seed with the envelope's stored salt
    #[default]
    #[serde(rename = "argon2id")]
    Argon2idWithSalt,
}

/// MasterKey wrapped under a key derived from the recovery phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryEnvelope {
    #[serde(with = "b64")]
    pub wrapped_master_key: Vec<u8>,
    #[serde(with = "b64::array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64::array")]
    pub salt: [u8; SALT_SIZE],
    #[serde(default)]
    pub scheme: RecoveryScheme,
}

/// X25519 identity: public key in clear, private key wrapped by the MasterKey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEnvelope {
    #[serde(rename = "encryptedX25519Priv", with = "b64")]
    pub encrypted_private_key: Vec<u8>,
    #[serde(rename = "x25519PrivNonce", with = "b64::array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(rename = "publicKey", with = "b64::array")]
    pub public_key: [u8; 32],
}

/// A per-file key wrapped under the MasterKey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileKeyEnvelope {
    #[serde(with = "b64")]
    pub file_key_cipher: Vec<u8>,
    #[serde(with = "b64::array")]
    pub key_nonce: [u8; NONCE_SIZE],
}

/// One AEAD-sealed slice of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChunk {
    pub index: u64,
    #[serde(with = "b64::array")]
    pub nonce: [u8; NONCE_SIZE],
    /// ciphertext || tag
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// A whole encrypted file: one key envelope, ordered chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFile {
    pub envelope: FileKeyEnvelope,
    pub chunk_size: u64,
    pub plaintext_size: u64,
    pub chunks: Vec<EncryptedChunk>,
}

/// Everything the persistence collaborator stores for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub password_envelope: PasswordEnvelope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryEnvelope>,
}

macro_rules! json_codec {
    ($($ty:ty),+ $(,)?) => {$(
        impl $ty {
            /// Serialize to the JSON wire format
            pub fn to_json(&self) -> CustodyResult<String> {
                serde_json::to_string(self)
                    .map_err(|e| CustodyError::MalformedEnvelope(format!("serialization: {e}")))
            }

            /// Parse from the JSON wire format
            pub fn from_json(data: &str) -> CustodyResult<Self> {
                serde_json::from_str(data)
                    .map_err(|e| CustodyError::MalformedEnvelope(format!("deserialization: {e}")))
            }
        }
    )+};
}

json_codec!(
    PasswordEnvelope,
    RecoveryEnvelope,
    IdentityEnvelope,
    FileKeyEnvelope,
    EncryptedFile,
    VaultRecord,
);

/// Standard base64 helpers; the only encoding used at the boundary.
pub fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub fn base64_decode(s: &str) -> CustodyResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| CustodyError::MalformedEnvelope(format!("base64 decode: {e}")))
}

/// serde adapters: `Vec<u8>` and `[u8; N]` as standard base64 strings
mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::base64_decode(&s).map_err(serde::de::Error::custom)
    }

    pub mod array {
        use serde::{Deserializer, Serializer};

        pub fn serialize<S: Serializer, const N: usize>(
            bytes: &[u8; N],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            super::serialize(bytes, serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
            deserializer: D,
        ) -> Result<[u8; N], D::Error> {
            let bytes = super::deserialize(deserializer)?;
            let len = bytes.len();
            bytes.try_into().map_err(|_| {
                serde::de::Error::custom(format!("expected {N} bytes, got {len}"))
            })
        }
    }
}
