//! The wire messages of the vertical learning protocol.
//!
//! A message is a fixed header (type tag, flags, round number) followed by
//! the sender and receiver addresses and the tag-specific payload fields,
//! all encoded as length-value items in a stable order. Cryptographic blobs
//! (blinded id sets, encrypted part bytes, ciphertext lists, decrypted
//! grad/cost pieces) are opaque byte fields at this layer; their internal
//! layout belongs to the crypto and process code.
//!
//! Local messages the learner posts to itself share the same union so that
//! one dispatch covers both directions; only a subset of tags ever crosses
//! the wire.

pub(crate) mod buffer;
#[allow(clippy::module_inception)]
pub(crate) mod message;
pub(crate) mod payload;
pub(crate) mod traits;

pub use self::{
    buffer::{write_lv, LvReader, MessageBuffer},
    message::{Header, Message, Tag},
    payload::{EncGradCost, GradCost, PartBytes, Payload, Pubkey, ReEnc, Status},
    traits::{FromBytes, ToBytes},
};

/// An error that signals a failure when trying to parse a message.
pub type DecodeError = anyhow::Error;
