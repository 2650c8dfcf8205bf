//! Content hashing helpers

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a string. Used for both raw fetch bodies and
/// normalized extracted text, so identical content always maps to the same
/// digest across the pipeline.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_hashes_identically() {
        assert_eq!(sha256_hex("broker review"), sha256_hex("broker review"));
    }

    #[test]
    fn single_character_change_alters_the_hash() {
        assert_ne!(sha256_hex("broker review"), sha256_hex("broker revieW"));
    }

    #[test]
    fn digest_is_hex_encoded_sha256() {
        let digest = sha256_hex("");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
