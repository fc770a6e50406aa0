//! Cryptographic hash type using Blake3.

use std::fmt;

/// A 32-byte cryptographic hash.
///
/// Safe to use as a HashMap key; all hashing operations are deterministic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Size of hash in bytes.
    pub const BYTES: usize = 32;

    /// Zero hash (all bytes are 0x00).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create hash from bytes using Blake3.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(*hash.as_bytes())
    }

    /// Create a Hash from raw hash bytes (without hashing).
    ///
    /// # Panics
    ///
    /// Panics if bytes length is not exactly 32.
    pub fn from_hash_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 32, "Hash must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Self(arr)
    }

    /// Create hash from multiple byte slices.
    ///
    /// Each part is length-prefixed so that part boundaries are unambiguous.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Convert hash to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated hex keeps log lines readable.
        write!(f, "Hash({}..)", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Content-hashing scheme injected into the mirror.
///
/// The mirror never hashes anything itself; the hosting engine decides the
/// scheme and the mirror only records the resulting identities.
pub trait HashScheme: Send + Sync {
    /// Hash an ordered list of validator public keys.
    fn pub_keys(&self, keys: &[crate::PublicKey]) -> Hash;

    /// Hash an ordered list of validator vote powers.
    fn vote_powers(&self, powers: &[u64]) -> Hash;
}

/// The default [`HashScheme`], hashing length-prefixed parts with Blake3.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3HashScheme;

impl HashScheme for Blake3HashScheme {
    fn pub_keys(&self, keys: &[crate::PublicKey]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"PUB_KEYS");
        hasher.update(&(keys.len() as u64).to_le_bytes());
        for key in keys {
            hasher.update(key.as_bytes());
        }
        Hash(*hasher.finalize().as_bytes())
    }

    fn vote_powers(&self, powers: &[u64]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"VOTE_POWERS");
        hasher.update(&(powers.len() as u64).to_le_bytes());
        for power in powers {
            hasher.update(&power.to_le_bytes());
        }
        Hash(*hasher.finalize().as_bytes())
    }
}
