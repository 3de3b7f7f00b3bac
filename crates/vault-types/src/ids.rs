//! Content and node identities.
//!
//! Every [`Key`](crate::key::Key) and every peer in the overlay is named by a
//! 512-bit identity. Identities are totally ordered byte-wise, which is the
//! only ordering the core relies on; XOR-closeness is a routing-layer
//! concern and lives outside this crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Width, in bytes, of a content/node identity (512 bits).
pub const IDENTITY_BYTES: usize = 64;

/// A 512-bit identity: the content id of a [`Key`](crate::key::Key), or a
/// peer's node id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(pub [u8; IDENTITY_BYTES]);

impl Identity {
    /// Builds an identity from the BLAKE3 hash of `bytes`, padded to 512
    /// bits. Used by tests and the bootstrap tool to derive content names
    /// deterministically; production identities are supplied by the
    /// (out-of-scope) key-derivation layer.
    pub fn derive_from(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        let mut out = [0u8; IDENTITY_BYTES];
        out[..32].copy_from_slice(digest.as_bytes());
        out[32..].copy_from_slice(digest.as_bytes());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_prefix(&self.0))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_prefix(&self.0))
    }
}

fn hex_prefix(bytes: &[u8; IDENTITY_BYTES]) -> String {
    bytes[..8].iter().map(|b| format!("{b:02x}")).collect()
}

impl From<[u8; IDENTITY_BYTES]> for Identity {
    fn from(value: [u8; IDENTITY_BYTES]) -> Self {
        Self(value)
    }
}

/// Identity of a peer (vault process) in the overlay.
pub type NodeId = Identity;

/// Identity of a close group, derived from the key it is responsible for.
///
/// A group id and a node id share a representation (both are 512-bit
/// identities) but are never interchangeable: a [`GroupId`] names a set of
/// peers, a [`NodeId`] names one of them.
pub type GroupId = Identity;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(Identity::derive_from(b"a"), Identity::derive_from(b"a"));
        assert_ne!(Identity::derive_from(b"a"), Identity::derive_from(b"b"));
    }

    #[test]
    fn ordering_is_total_and_byte_wise() {
        let low = Identity([0u8; IDENTITY_BYTES]);
        let mut high_bytes = [0u8; IDENTITY_BYTES];
        high_bytes[0] = 1;
        let high = Identity(high_bytes);
        assert!(low < high);
    }
}
