//! Message payloads.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use derive_more::From;

use crate::message::{
    buffer::{write_lv, LvReader},
    message::Tag,
    DecodeError,
    ToBytes,
};

/// Blinded id sets exchanged during set intersection.
///
/// The request direction carries `enc_ids` (the sender's singly-blinded
/// ids) and the response direction `re_enc_ids` (those ids blinded again by
/// the receiver); the respective other field stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReEnc {
    pub enc_ids: Vec<u8>,
    pub re_enc_ids: Vec<u8>,
}

/// A party's serialized homomorphic public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pubkey {
    pub key: Vec<u8>,
}

/// A party's encrypted per-sample contributions for one training round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartBytes {
    pub parts: Vec<u8>,
}

/// A party's own gradient and cost, encrypted under the receiver's key for
/// decryption service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncGradCost {
    pub enc_grad: Vec<u8>,
    pub enc_cost: Vec<u8>,
}

/// Decrypted gradient and cost pieces destined for the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradCost {
    pub grad_bytes: Vec<u8>,
    pub cost_bytes: Vec<u8>,
}

/// A party's stop decision for the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub stopped: bool,
}

/// The payload of a [`Message`].
///
/// [`Message`]: crate::message::Message
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum Payload {
    /// Payload of the local control messages, which carry nothing beyond
    /// the header.
    Empty,
    ReEnc(ReEnc),
    Pubkey(Pubkey),
    PartBytes(PartBytes),
    EncGradCost(EncGradCost),
    GradCost(GradCost),
    Status(Status),
}

impl ToBytes for Payload {
    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        match self {
            Payload::Empty => {}
            Payload::ReEnc(re_enc) => {
                write_lv(buffer, &re_enc.enc_ids);
                write_lv(buffer, &re_enc.re_enc_ids);
            }
            Payload::Pubkey(pubkey) => write_lv(buffer, &pubkey.key),
            Payload::PartBytes(part_bytes) => write_lv(buffer, &part_bytes.parts),
            Payload::EncGradCost(enc) => {
                write_lv(buffer, &enc.enc_grad);
                write_lv(buffer, &enc.enc_cost);
            }
            Payload::GradCost(plain) => {
                write_lv(buffer, &plain.grad_bytes);
                write_lv(buffer, &plain.cost_bytes);
            }
            Payload::Status(status) => write_lv(buffer, &[status.stopped as u8]),
        }
    }
}

impl Payload {
    /// Decodes the payload fields that belong to the given tag.
    pub(crate) fn from_reader(tag: Tag, reader: &mut LvReader<'_>) -> Result<Self, DecodeError> {
        let payload = match tag {
            Tag::PsiAskReEnc | Tag::PsiReEnc => Payload::ReEnc(ReEnc {
                enc_ids: reader.next()?.to_vec(),
                re_enc_ids: reader.next()?.to_vec(),
            }),
            Tag::HomoPubkey => Payload::Pubkey(Pubkey {
                key: reader.next()?.to_vec(),
            }),
            Tag::TrainPartBytes => Payload::PartBytes(PartBytes {
                parts: reader.next()?.to_vec(),
            }),
            Tag::TrainEncGradCost => Payload::EncGradCost(EncGradCost {
                enc_grad: reader.next()?.to_vec(),
                enc_cost: reader.next()?.to_vec(),
            }),
            Tag::TrainGradAndCost => Payload::GradCost(GradCost {
                grad_bytes: reader.next()?.to_vec(),
                cost_bytes: reader.next()?.to_vec(),
            }),
            Tag::TrainStatus => Payload::Status(Status {
                stopped: reader.next_bool()?,
            }),
            _ => Payload::Empty,
        };
        Ok(payload)
    }

    /// Checks that the payload variant matches the tag it travels under.
    pub(crate) fn matches(&self, tag: Tag) -> bool {
        matches!(
            (tag, self),
            (Tag::PsiAskReEnc, Payload::ReEnc(_))
                | (Tag::PsiReEnc, Payload::ReEnc(_))
                | (Tag::HomoPubkey, Payload::Pubkey(_))
                | (Tag::TrainPartBytes, Payload::PartBytes(_))
                | (Tag::TrainEncGradCost, Payload::EncGradCost(_))
                | (Tag::TrainGradAndCost, Payload::GradCost(_))
                | (Tag::TrainStatus, Payload::Status(_))
                | (
                    Tag::PsiEnc
                        | Tag::PsiIntersect
                        | Tag::TrainHup
                        | Tag::TrainLoop
                        | Tag::TrainCalLocalGradCost
                        | Tag::TrainCalEncGradCost
                        | Tag::TrainDecLocalGradCost
                        | Tag::TrainUpdCostGrad
                        | Tag::TrainCheckStatus
                        | Tag::TrainModels,
                    Payload::Empty,
                )
        )
    }

    /// Panics when a message is assembled with mismatched tag and payload;
    /// the typed constructors on [`Message`] make this unreachable.
    ///
    /// [`Message`]: crate::message::Message
    pub(crate) fn check(&self, tag: Tag) {
        if !self.matches(tag) {
            panic!("payload {:?} does not belong to tag {:?}", self, tag);
        }
    }
}
