//! Validator set types.

use crate::PublicKey;

/// A single committee member: a public key with its vote power.
///
/// Validator sets are ordered; a validator's position in the set is its
/// index in every signer bitfield for that round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    /// Public key identifying the validator.
    pub pub_key: PublicKey,

    /// Voting power (stake weight).
    pub power: u64,
}

/// Project the ordered public keys out of a validator set.
pub fn pub_keys(validators: &[Validator]) -> Vec<PublicKey> {
    validators.iter().map(|v| v.pub_key).collect()
}

/// Project the ordered vote powers out of a validator set.
pub fn vote_powers(validators: &[Validator]) -> Vec<u64> {
    validators.iter().map(|v| v.power).collect()
}
