//! BIP-39 recovery phrase generation, validation, and key derivation
//!
//! A 12-word English mnemonic (128 bits of entropy + 4-bit checksum) is
//! generated once when recovery is enabled and shown to the user exactly once.
//! It is never stored; only the master key wrapped under its derived key is.
//!
//! Phrase key = Argon2id(context || BIP-39 seed, stored 16-byte salt).

use bip39::Mnemonic;
use secrecy::{ExposeSecret, SecretString};
use vaultkey_core::{CustodyError, CustodyResult, KdfProfile};
use zeroize::Zeroizing;

use crate::kdf::{derive_key, WrappingKey};
use crate::random;

/// Number of words in a recovery phrase
pub const PHRASE_WORDS: usize = 12;

/// 12 words = 128 bits of entropy
const PHRASE_ENTROPY_BYTES: usize = 16;

/// Domain separation for the phrase KDF input
const PHRASE_KEY_CONTEXT: &[u8] = b"vaultkey/recovery-phrase/v1";

/// A validated, normalized 12-word recovery phrase.
pub struct RecoveryPhrase {
    words: SecretString,
}

impl RecoveryPhrase {
    /// Generate a new phrase from 128 bits of OS randomness.
    pub fn generate() -> CustodyResult<Self> {
        let entropy = Zeroizing::new(random::random_array::<PHRASE_ENTROPY_BYTES>()?);
        let mnemonic = Mnemonic::from_entropy(&entropy[..])
            .map_err(|e| CustodyError::Other(anyhow::anyhow!("BIP-39 generation failed: {e}")))?;
        Ok(Self {
            words: SecretString::from(mnemonic.to_string()),
        })
    }

    /// Normalize and validate user input. Word-list or checksum failures are
    /// reported as `InvalidPhrase` before any decryption is attempted.
    pub fn parse(input: &str) -> CustodyResult<Self> {
        let normalized = Zeroizing::new(normalize_phrase(input));
        parse_mnemonic(&normalized)?;
        Ok(Self {
            words: SecretString::from(normalized.as_str()),
        })
    }

    /// The phrase as space-separated words, for the one-time display.
    pub fn expose(&self) -> &str {
        self.words.expose_secret()
    }

    pub fn word_count(&self) -> usize {
        self.expose().split(' ').count()
    }

    /// Derive the key that wraps the master key in a recovery envelope.
    pub fn derive_key(&self, salt: &[u8], profile: KdfProfile) -> CustodyResult<WrappingKey> {
        let mnemonic = parse_mnemonic(self.expose())?;
        let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));

        let mut input = Zeroizing::new(Vec::with_capacity(PHRASE_KEY_CONTEXT.len() + seed.len()));
        input.extend_from_slice(PHRASE_KEY_CONTEXT);
        input.extend_from_slice(&seed[..]);

        derive_key(&input, salt, profile)
    }
}

impl std::fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryPhrase")
            .field("words", &"[REDACTED]")
            .finish()
    }
}

/// Trim, lowercase, and collapse every run of whitespace (including the
/// non-breaking spaces and newlines that PDFs leave behind) to one space.
pub fn normalize_phrase(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when `input` normalizes to a 12-word phrase with a valid checksum.
pub fn validate_phrase(input: &str) -> bool {
    parse_mnemonic(&normalize_phrase(input)).is_ok()
}

fn parse_mnemonic(normalized: &str) -> CustodyResult<Mnemonic> {
    let count = normalized.split_whitespace().count();
    if count != PHRASE_WORDS {
        return Err(CustodyError::InvalidPhrase(format!(
            "expected {PHRASE_WORDS} words, got {count}"
        )));
    }
    Mnemonic::parse_normalized(normalized).map_err(|e| CustodyError::InvalidPhrase(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // BIP-39 test vector: all-zero 128-bit entropy
    const VECTOR: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_phrase() {
        let phrase = RecoveryPhrase::generate().unwrap();
        assert_eq!(phrase.word_count(), PHRASE_WORDS);
        assert!(validate_phrase(phrase.expose()));
    }

    #[test]
    fn test_generated_phrases_differ() {
        let a = RecoveryPhrase::generate().unwrap();
        let b = RecoveryPhrase::generate().unwrap();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_known_vector_validates() {
        assert!(validate_phrase(VECTOR));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        // Last word changed: every word is in the list but the checksum breaks
        let bad = VECTOR.replace("about", "abandon");
        assert!(!validate_phrase(&bad));
        assert!(matches!(
            RecoveryPhrase::parse(&bad),
            Err(CustodyError::InvalidPhrase(_))
        ));
    }

    #[test]
    fn test_unknown_word_rejected() {
        let bad = VECTOR.replace("about", "zzzzz");
        assert!(matches!(
            RecoveryPhrase::parse(&bad),
            Err(CustodyError::InvalidPhrase(_))
        ));
    }

    #[test]
    fn test_wrong_word_count_rejected() {
        let err = RecoveryPhrase::parse("abandon abandon about").unwrap_err();
        assert!(err.to_string().contains("expected 12 words, got 3"));
    }

    #[test]
    fn test_24_word_phrase_rejected() {
        let entropy = [7u8; 32];
        let long = Mnemonic::from_entropy(&entropy).unwrap().to_string();
        assert!(!validate_phrase(&long));
    }

    #[test]
    fn test_pasted_phrase_normalized() {
        let messy = "  ABANDON abandon\tabandon\nabandon abandon\u{a0}abandon \
                     abandon   abandon abandon abandon abandon About \r\n";
        let phrase = RecoveryPhrase::parse(messy).unwrap();
        assert_eq!(phrase.expose(), normalize_phrase(VECTOR));
    }

    #[test]
    fn test_phrase_key_deterministic_per_salt() {
        let phrase = RecoveryPhrase::parse(VECTOR).unwrap();
        let salt = [5u8; 16];

        let k1 = phrase.derive_key(&salt, KdfProfile::Minimal).unwrap();
        let k2 = phrase.derive_key(&salt, KdfProfile::Minimal).unwrap();
        let k3 = phrase.derive_key(&[6u8; 16], KdfProfile::Minimal).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn test_phrase_key_rejects_bad_salt() {
        let phrase = RecoveryPhrase::parse(VECTOR).unwrap();
        assert!(matches!(
            phrase.derive_key(&[0u8; 12], KdfProfile::Minimal),
            Err(CustodyError::InvalidSalt { .. })
        ));
    }

    #[test]
    fn test_debug_redacted() {
        let phrase = RecoveryPhrase::parse(VECTOR).unwrap();
        assert!(!format!("{phrase:?}").contains("abandon"));
    }

    proptest! {
        #[test]
        fn prop_normalize_idempotent(input in "[a-zA-Z \t\n\u{a0}]{0,80}") {
            let once = normalize_phrase(&input);
            let twice = normalize_phrase(&once);
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(validate_phrase(&once), validate_phrase(&twice));
        }

        #[test]
        fn prop_whitespace_and_case_do_not_matter(sep in "[ \t\n]{1,4}", upper in any::<bool>()) {
            let words: Vec<&str> = VECTOR.split_whitespace().collect();
            let mut pasted = words.join(sep.as_str());
            if upper {
                pasted = pasted.to_uppercase();
            }
            prop_assert!(validate_phrase(&pasted));
        }
    }
}
