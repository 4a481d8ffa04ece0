//! Deterministic per-user client identity.
//!
//! The protocol's version vectors are keyed by client id, so every device a
//! user syncs from needs a stable id across restarts. Rather than persist a
//! randomly generated id (which would require first-run bootstrapping to
//! agree with the server on what it is), the id is derived from the
//! username alone: same username in, same id out, on any machine, forever.
//!
//! This is a deliberate simplification over per-device identity — two
//! devices logged in as the same user are indistinguishable to the version
//! vector. Acceptable for this system because the vector only needs to
//! detect *some* concurrent write happened, not attribute it to a specific
//! device.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Derive a client id from a username. Reshapes the first 16 bytes of the
/// SHA-256 digest of the lowercased username into UUID form so the id reads
/// like any other id in the system.
pub fn derive_client_id(username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_username_always_derives_the_same_id() {
        assert_eq!(derive_client_id("alice"), derive_client_id("alice"));
    }

    #[test]
    fn derivation_is_case_and_whitespace_insensitive() {
        assert_eq!(derive_client_id("Alice"), derive_client_id(" alice "));
    }

    #[test]
    fn different_usernames_derive_different_ids() {
        assert_ne!(derive_client_id("alice"), derive_client_id("bob"));
    }

    #[test]
    fn derived_id_is_a_well_formed_uuid() {
        let id = derive_client_id("alice");
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
