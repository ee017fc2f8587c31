//! Identity hashing
//!
//! Peers are addressed by a truncated SHA-256 of an opaque local user
//! identifier. The hash is a routing key only; it is sent in the clear and
//! carries no authentication.

use sha2::{Digest, Sha256};

use crate::types::PeerHash;

/// Derive the 4-byte wire identity from an opaque local user identifier.
pub fn identity_hash(user_id: &str) -> PeerHash {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    PeerHash::from_bytes(&digest)
}

/// Derive the 8-byte extended identity used for cross-component keys where
/// the 4-byte form is too collision-prone for local bookkeeping.
pub fn extended_identity_hash(user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Deterministic, symmetric identifier for a matched pair.
///
/// Sorts the two hex-rendered hashes lexicographically and hashes the
/// concatenation, so both sides derive the same id regardless of who
/// proposed the match. This is a display-layer convenience key: it is not
/// collision-resistant against deliberately crafted identities and must not
/// be used as a security boundary.
pub fn match_id(a: &PeerHash, b: &PeerHash) -> String {
    let (lo, hi) = {
        let sa = a.to_string();
        let sb = b.to_string();
        if sa <= sb {
            (sa, sb)
        } else {
            (sb, sa)
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
