//! Digest helpers: SHA-256 over the canonical record encoding.

use sha2::{Digest, Sha256};

use crate::model::Payload;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Hash inputs (concatenate as bytes, SHA-256) and return lowercase hex.
pub fn hash_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hex::encode(hasher.finalize())
}

/// Canonical payload bytes: compact JSON in declared field order.
pub fn payload_bytes(payload: &Payload) -> Vec<u8> {
    // Payload holds only strings and unit enums; serialization cannot fail.
    serde_json::to_vec(payload).expect("payload json")
}

/// Digest of a record's content and position.
///
/// The message is the decimal sequence number, the previous digest, the
/// decimal timestamp and the payload JSON, concatenated without separators.
pub fn digest_of(
    sequence_number: u64,
    previous_digest: &str,
    created_at: i64,
    payload: &Payload,
) -> String {
    hash_concat(&[
        sequence_number.to_string().as_bytes(),
        previous_digest.as_bytes(),
        created_at.to_string().as_bytes(),
        &payload_bytes(payload),
    ])
}

/// True when `s` looks like a digest this crate produces (64 lowercase hex).
pub fn is_well_formed_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, Priority};

    #[test]
    fn hash_concat_matches_single_buffer() {
        assert_eq!(hash_concat(&[b"ab", b"c"]), hash_concat(&[b"abc"]));
        assert_eq!(
            hash_concat(&[b"abc"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_is_deterministic() {
        let p = Payload::booking("123", "CF", Priority::U, "TAC").unwrap();
        let a = digest_of(3, "abc", 1_700_000_000_000, &p);
        let b = digest_of(3, "abc", 1_700_000_000_000, &p);
        assert_eq!(a, b);
        assert!(is_well_formed_digest(&a));
    }

    #[test]
    fn digest_covers_every_input() {
        let p = Payload::booking("123", "CF", Priority::U, "TAC").unwrap();
        let base = digest_of(1, "abc", 10, &p);
        assert_ne!(base, digest_of(2, "abc", 10, &p));
        assert_ne!(base, digest_of(1, "abd", 10, &p));
        assert_ne!(base, digest_of(1, "abc", 11, &p));
        let mut q = p.clone();
        q.priority = Priority::B;
        assert_ne!(base, digest_of(1, "abc", 10, &q));
    }

    #[test]
    fn digest_message_layout() {
        let p = Payload::genesis();
        let json = serde_json::to_string(&p).unwrap();
        let expected = hash_concat(&[format!("0042{json}").as_bytes()]);
        assert_eq!(digest_of(0, "0", 42, &p), expected);
    }

    #[test]
    fn well_formed_digest() {
        assert!(is_well_formed_digest(&"a".repeat(64)));
        assert!(!is_well_formed_digest("0"));
        assert!(!is_well_formed_digest(&"A".repeat(64)));
        assert!(!is_well_formed_digest(&"g".repeat(64)));
    }
}
