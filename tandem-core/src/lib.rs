//! # Tandem: two-party vertical federated learning
//!
//! Tandem trains models cooperatively between two data holders who share the
//! same set of samples but own disjoint feature columns. Neither party ever
//! reveals raw rows or labels to the other: sample alignment happens through
//! a private set intersection over blinded identifiers, and the training
//! rounds exchange only additively homomorphic ciphertexts and the plaintext
//! pieces each party is entitled to see.
//!
//! This crate contains the protocol-independent building blocks:
//!
//! - [`common`]: task types and training hyperparameters shared with the
//!   orchestrating node.
//! - [`crypto`]: the Paillier cryptosystem, the commutative blinding cipher
//!   used for set intersection, and the PRNG utilities backing both.
//! - [`fixed`]: fixed-precision encoding of real numbers into the integers
//!   the cryptosystem operates on.
//! - [`message`]: the byte-precise wire format of the learner protocol.
//!
//! The protocol state machine itself lives in the `tandem-learner` crate.

pub mod common;
pub mod crypto;
pub mod fixed;
pub mod message;
