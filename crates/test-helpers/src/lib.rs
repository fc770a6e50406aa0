//! Shared fixtures for argus tests.
//!
//! [`TestCommittee`] builds a deterministic validator set and produces the
//! signed artifacts tests feed into the mirror: vote proofs, commit proofs
//! and proposed blocks. Signatures are synthetic — verification happens
//! upstream of everything under test here — but they are unique per signer
//! and target, so dedup and merge behavior is exercised honestly.

mod committee;

pub use committee::TestCommittee;
