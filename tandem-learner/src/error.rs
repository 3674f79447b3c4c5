//! The learner error taxonomy.

use thiserror::Error;

use tandem_core::{common::InvalidTrainParams, crypto::PaillierError, message::DecodeError};

/// The coarse classes the orchestrator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: message, sample file or hyperparameters.
    Param,
    /// A local fault: serialization, cryptography, shape mismatch.
    Internal,
    /// A peer call failed; retried before turning fatal.
    Transient,
    /// The peer and we disagree about the state of the protocol.
    Protocol,
}

/// Everything that can go wrong while a learner runs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode message: {0}")]
    Decode(DecodeError),

    #[error("{0}")]
    InvalidParams(#[from] InvalidTrainParams),

    #[error("sample column {0:?} not found")]
    MissingColumn(String),

    #[error("failed to parse sample file: {0}")]
    SampleFile(#[from] csv::Error),

    #[error("invalid numeric sample value {0:?}")]
    InvalidSample(String),

    #[error("duplicate sample id {0:?}")]
    DuplicateId(String),

    #[error("sample id sets have no common element")]
    EmptyIntersection,

    #[error("message from unexpected party {0:?}")]
    UnknownParty(String),

    #[error("re-blinded id set has {actual} elements, local set has {expected}")]
    IdSetMismatch { expected: usize, actual: usize },

    #[error("homomorphic keys have not been exchanged")]
    KeysNotExchanged,

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] PaillierError),

    #[error("peer contribution has {actual} entries, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("internal state error: {0}")]
    Internal(String),

    #[error("rpc to peer failed after {attempts} attempts: {last}")]
    Rpc { attempts: u32, last: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(_)
            | Error::InvalidParams(_)
            | Error::MissingColumn(_)
            | Error::SampleFile(_)
            | Error::InvalidSample(_)
            | Error::UnknownParty(_) => ErrorKind::Param,
            Error::Crypto(_)
            | Error::ShapeMismatch { .. }
            | Error::Serialize(_)
            | Error::Internal(_) => ErrorKind::Internal,
            Error::Rpc { .. } => ErrorKind::Transient,
            Error::DuplicateId(_)
            | Error::EmptyIntersection
            | Error::IdSetMismatch { .. }
            | Error::KeysNotExchanged => ErrorKind::Protocol,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}
