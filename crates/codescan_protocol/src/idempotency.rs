//! Deterministic idempotency keys.
//!
//! Every event the pipeline publishes carries a `idempotency_key` derived by
//! hashing its identifying parts with SHA-256. This must stay byte-exact
//! across ports of this system, so the hash function itself (SHA-256, parts
//! joined by a `0x1F` unit separator, lowercase hex digest) is not
//! negotiable: don't swap it for a faster hash without updating every
//! consumer in lockstep.

use sha2::{Digest, Sha256};

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([SEP]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `idempotency_key` for a `code.submitted` event.
pub fn submitted_key(scan_id: &str, correlation_id: &str) -> String {
    hash_parts(&["code.submitted", scan_id, correlation_id])
}

/// `idempotency_key` for a `code.normalized` event.
pub fn normalized_key(scan_id: &str, file_id: i64, checksum: &str) -> String {
    hash_parts(&[
        "code.normalized",
        scan_id,
        &file_id.to_string(),
        checksum,
    ])
}

/// `idempotency_key` for a `code.candidates` event, keyed by the generated pair.
pub fn candidates_key(pair_id: &str) -> String {
    hash_parts(&["code.candidates", pair_id])
}

/// `idempotency_key` for a `code.scored` event.
pub fn scored_key(scan_id: &str) -> String {
    hash_parts(&["code.scored", scan_id])
}

/// `idempotency_key` for a `code.deadletter` event.
pub fn deadletter_key(service: &str, scan_id: &str, correlation_id: &str, error_code: &str) -> String {
    hash_parts(&["code.deadletter", service, scan_id, correlation_id, error_code])
}

/// Deterministic `pair_id = H(scan_id, min(file_a, file_b), max(file_a, file_b))`.
///
/// Callers are responsible for passing `file_a <= file_b` (canonical pair
/// ordering); this function does not reorder them.
pub fn pair_id(scan_id: &str, file_a: i64, file_b: i64) -> String {
    hash_parts(&[scan_id, &file_a.to_string(), &file_b.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            submitted_key("scan-1", "corr-1"),
            submitted_key("scan-1", "corr-1")
        );
    }

    #[test]
    fn hash_distinguishes_part_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc" thanks to the separator byte.
        let a = hash_parts(&["ab", "c"]);
        let b = hash_parts(&["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn pair_id_is_order_sensitive_in_inputs() {
        // The helper itself does not canonicalize order; callers must.
        assert_ne!(pair_id("scan-1", 1, 2), pair_id("scan-1", 2, 1));
    }

    #[test]
    fn sha256_matches_known_vector() {
        // sha256("") == e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let mut hasher = Sha256::new();
        hasher.update(b"");
        let digest: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
