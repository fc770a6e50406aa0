//! Aggregate signature proofs over a common message.
//!
//! A proof collects signatures from an ordered validator set over one
//! message (e.g. "precommit height 5 round 0 block X"). Proofs merge
//! monotonically: a merge can only add signers, never remove them, so two
//! proofs for the same `(height, round, block_hash)` converge regardless of
//! merge order.
//!
//! The mirror treats proofs as opaque: it clones them, merges sparse commit
//! evidence into them, and inspects the signer bitfield for vote power. The
//! concrete scheme is injected; [`SimpleProofScheme`] is the shipped
//! implementation, an index-keyed signature collection with no aggregation
//! math (verification happens before anything reaches the mirror).

use crate::{Hash, PublicKey, Signature, SignerBitfield};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Errors from proof mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// The public key is not part of the proof's validator set.
    #[error("signer is not in the proof's validator set")]
    UnknownSigner,
}

/// Result of merging sparse signatures into a proof.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseMergeResult {
    /// Whether the merge added at least one signature the proof did not
    /// already contain.
    pub increased_signatures: bool,
}

/// A single signature in sparse form: the signer's index in the round's
/// ordered validator set, plus the signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseSignature {
    /// Index of the signer in the validator set identified by the
    /// surrounding proof's `pub_key_hash`.
    pub key_index: u16,
    /// The signature bytes.
    pub signature: Signature,
}

/// The wire form of a proof: only the signatures actually present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseSignatureProof {
    /// Hash of the ordered validator public keys the indices refer to.
    pub pub_key_hash: Hash,
    /// Present signatures, ordered by key index.
    pub signatures: Vec<SparseSignature>,
}

/// An aggregate signature proof over one common message.
///
/// Object-safe so the mirror can hold proofs from any scheme. Implementations
/// must keep the signer bitfield monotonic: bits are only ever gained.
pub trait CommonSignatureProof: fmt::Debug + Send + Sync {
    /// Hash of the ordered validator public keys this proof covers.
    fn pub_key_hash(&self) -> Hash;

    /// Add a single verified signature from a known validator.
    ///
    /// Adding a signature that is already present is a no-op.
    fn add_signature(&mut self, signature: Signature, pub_key: &PublicKey)
        -> Result<(), ProofError>;

    /// Merge sparse signatures into this proof.
    ///
    /// Entries for unknown indices or a mismatched key hash are ignored.
    fn merge_sparse(&mut self, sparse: &SparseSignatureProof) -> SparseMergeResult;

    /// The bitfield of validator indices that have signed.
    fn signature_bitfield(&self) -> &SignerBitfield;

    /// Export the present signatures in sparse wire form.
    fn to_sparse(&self) -> SparseSignatureProof;

    /// Clone into a new boxed proof.
    fn boxed_clone(&self) -> Box<dyn CommonSignatureProof>;
}

impl Clone for Box<dyn CommonSignatureProof> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Map from voted block hash (`None` = nil) to the aggregate proof of votes
/// for it.
pub type ProofMap = HashMap<Option<Hash>, Box<dyn CommonSignatureProof>>;

/// Scheme for creating empty proofs, injected into the mirror.
pub trait SignatureProofScheme: Send + Sync {
    /// Create an empty proof for `sign_content`, covering the given ordered
    /// validator keys.
    fn new_proof(
        &self,
        sign_content: Vec<u8>,
        pub_keys: &[PublicKey],
        pub_key_hash: Hash,
    ) -> Box<dyn CommonSignatureProof>;
}

/// The shipped [`SignatureProofScheme`]: plain signature collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleProofScheme;

impl SignatureProofScheme for SimpleProofScheme {
    fn new_proof(
        &self,
        sign_content: Vec<u8>,
        pub_keys: &[PublicKey],
        pub_key_hash: Hash,
    ) -> Box<dyn CommonSignatureProof> {
        Box::new(SimpleSignatureProof::new(sign_content, pub_keys, pub_key_hash))
    }
}

/// A [`CommonSignatureProof`] that stores each signature verbatim, keyed by
/// validator index.
#[derive(Debug, Clone)]
pub struct SimpleSignatureProof {
    sign_content: Vec<u8>,
    pub_key_hash: Hash,
    pub_keys: Vec<PublicKey>,
    bitfield: SignerBitfield,
    signatures: BTreeMap<u16, Signature>,
}

impl SimpleSignatureProof {
    /// Create an empty proof over the given ordered validator keys.
    pub fn new(sign_content: Vec<u8>, pub_keys: &[PublicKey], pub_key_hash: Hash) -> Self {
        Self {
            sign_content,
            pub_key_hash,
            pub_keys: pub_keys.to_vec(),
            bitfield: SignerBitfield::new(pub_keys.len()),
            signatures: BTreeMap::new(),
        }
    }

    /// The message the collected signatures sign.
    pub fn sign_content(&self) -> &[u8] {
        &self.sign_content
    }
}

impl CommonSignatureProof for SimpleSignatureProof {
    fn pub_key_hash(&self) -> Hash {
        self.pub_key_hash
    }

    fn add_signature(
        &mut self,
        signature: Signature,
        pub_key: &PublicKey,
    ) -> Result<(), ProofError> {
        let index = self
            .pub_keys
            .iter()
            .position(|k| k == pub_key)
            .ok_or(ProofError::UnknownSigner)?;

        if !self.bitfield.get(index) {
            self.bitfield.set(index);
            self.signatures.insert(index as u16, signature);
        }
        Ok(())
    }

    fn merge_sparse(&mut self, sparse: &SparseSignatureProof) -> SparseMergeResult {
        if sparse.pub_key_hash != self.pub_key_hash {
            // Signatures indexed against a different validator set cannot be
            // mapped onto this proof's bitfield.
            return SparseMergeResult::default();
        }

        let mut increased = false;
        for entry in &sparse.signatures {
            let index = entry.key_index as usize;
            if index >= self.pub_keys.len() || self.bitfield.get(index) {
                continue;
            }
            self.bitfield.set(index);
            self.signatures.insert(entry.key_index, entry.signature.clone());
            increased = true;
        }

        SparseMergeResult {
            increased_signatures: increased,
        }
    }

    fn signature_bitfield(&self) -> &SignerBitfield {
        &self.bitfield
    }

    fn to_sparse(&self) -> SparseSignatureProof {
        SparseSignatureProof {
            pub_key_hash: self.pub_key_hash,
            signatures: self
                .signatures
                .iter()
                .map(|(index, signature)| SparseSignature {
                    key_index: *index,
                    signature: signature.clone(),
                })
                .collect(),
        }
    }

    fn boxed_clone(&self) -> Box<dyn CommonSignatureProof> {
        Box::new(self.clone())
    }
}
