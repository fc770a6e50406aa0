//! Opaque key and signature types.
//!
//! The mirror receives signatures that were already verified by the layer
//! that decoded them from the network, and hands proofs to consumers that
//! re-verify where needed. Inside the mirror a public key is therefore just
//! an identity and a signature just bytes to carry.

use std::fmt;

/// An opaque 32-byte validator public key.
///
/// Used only for identity comparison and ordering; no key math happens here.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create a public key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes as a slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An opaque signature.
///
/// Variable length to remain agnostic over the hosting engine's signature
/// scheme.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the signature carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.len().min(8);
        write!(f, "Signature({}..)", hex::encode(&self.0[..shown]))
    }
}
