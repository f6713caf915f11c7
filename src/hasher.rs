//! Privacy-preserving word hashing.
//!
//! Ignored words are stored and synced as keyed BLAKE2b-256 digests.
//! The user salt is derived from the master encryption key, so every
//! machine sharing that key computes identical hashes (sync can dedupe),
//! while the application-wide pepper keys the MAC so the remote store
//! cannot brute-force the dictionary offline.

use blake2::digest::consts::U32;
use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::{Blake2b, Blake2bMac, Digest};

type Blake2b256 = Blake2b<U32>;
type Blake2bMac256 = Blake2bMac<U32>;

/// Application-wide pepper, baked into the binary.
const PEPPER: [u8; 32] = [
    0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f, 0x1a, 0x2b, 0x3c,
    0x4d, 0x5e, 0x6f, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f,
    0x1a, 0x2b,
];

const SALT_CONTEXT: &[u8] = b"ignored_words_user_salt_derivation";

/// Hashes words under a salt derived from the 32-byte master key.
pub struct WordHasher {
    user_salt: [u8; 32],
}

impl WordHasher {
    /// Derives the per-user salt `H(master_key || context)` once.
    pub fn new(master_key: &[u8; 32]) -> Self {
        let mut h = Blake2b256::new();
        Digest::update(&mut h, master_key);
        Digest::update(&mut h, SALT_CONTEXT);
        let digest = h.finalize();
        let mut user_salt = [0u8; 32];
        user_salt.copy_from_slice(&digest);
        WordHasher { user_salt }
    }

    /// Keyed hash of a word, lowercased first so hashing is
    /// case-insensitive. Returns 64 hex characters.
    pub fn hash_word(&self, word: &str) -> String {
        let normalized = word.to_lowercase();
        // Pepper is the MAC key; salt and word are the message.
        let mut mac = Blake2bMac256::new_from_slice(&PEPPER)
            .expect("pepper length matches BLAKE2b key bounds");
        Update::update(&mut mac, &self.user_salt);
        Update::update(&mut mac, normalized.as_bytes());
        hex::encode(mac.finalize_fixed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_and_hex64() {
        let hasher = WordHasher::new(&[0u8; 32]);
        let a = hasher.hash_word("secret");
        let b = hasher.hash_word("Secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn deterministic_across_instances() {
        let first = WordHasher::new(&[0u8; 32]).hash_word("example");
        let second = WordHasher::new(&[0u8; 32]).hash_word("example");
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_keys_give_distinct_hashes() {
        let zero = WordHasher::new(&[0u8; 32]).hash_word("example");
        let one = WordHasher::new(&[1u8; 32]).hash_word("example");
        assert_ne!(zero, one);
    }
}
