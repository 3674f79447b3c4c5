//! Messages.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use anyhow::{anyhow, Context};

use crate::message::{
    buffer::{write_header, write_lv, LvReader, MessageBuffer},
    payload::{EncGradCost, GradCost, PartBytes, Payload, Pubkey, ReEnc, Status},
    DecodeError,
    FromBytes,
    ToBytes,
};

/// A tag that indicates the type of a [`Message`].
///
/// The numeric values are part of the wire contract and must never be
/// reassigned.
#[derive(Copy, Debug, Clone, Eq, PartialEq)]
pub enum Tag {
    /// Local kickoff: blind the local sample ids.
    PsiEnc,
    /// Local: ask the peer to blind our already-blinded ids.
    PsiAskReEnc,
    /// Wire: carry blinded ids in either direction.
    PsiReEnc,
    /// Local: try to compute the sample intersection.
    PsiIntersect,
    /// Local: hand over from intersection to training.
    TrainHup,
    /// Wire: the sender's homomorphic public key.
    HomoPubkey,
    /// Local: enter the training round carried in the header.
    TrainLoop,
    /// Local: compute and share the local round contributions.
    TrainCalLocalGradCost,
    /// Wire: the sender's encrypted round contributions.
    TrainPartBytes,
    /// Local: fold the peer contributions into an encrypted gradient.
    TrainCalEncGradCost,
    /// Wire: the sender's gradient/cost, encrypted under the receiver's key.
    TrainEncGradCost,
    /// Local: decrypt the peer's gradient/cost for it.
    TrainDecLocalGradCost,
    /// Wire: decrypted gradient/cost pieces for the receiver.
    TrainGradAndCost,
    /// Local: apply the round's gradient and test convergence.
    TrainUpdCostGrad,
    /// Wire: the sender's stop decision for the round.
    TrainStatus,
    /// Local: check whether both parties have decided.
    TrainCheckStatus,
    /// Local terminal: extract and report the model.
    TrainModels,
}

impl TryFrom<u8> for Tag {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Tag::PsiEnc,
            2 => Tag::PsiAskReEnc,
            3 => Tag::PsiReEnc,
            4 => Tag::PsiIntersect,
            5 => Tag::TrainHup,
            6 => Tag::HomoPubkey,
            7 => Tag::TrainLoop,
            8 => Tag::TrainCalLocalGradCost,
            9 => Tag::TrainPartBytes,
            10 => Tag::TrainCalEncGradCost,
            11 => Tag::TrainEncGradCost,
            12 => Tag::TrainDecLocalGradCost,
            13 => Tag::TrainGradAndCost,
            14 => Tag::TrainUpdCostGrad,
            15 => Tag::TrainStatus,
            16 => Tag::TrainCheckStatus,
            17 => Tag::TrainModels,
            _ => return Err(anyhow!("invalid tag {}", value)),
        })
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> u8 {
        match tag {
            Tag::PsiEnc => 1,
            Tag::PsiAskReEnc => 2,
            Tag::PsiReEnc => 3,
            Tag::PsiIntersect => 4,
            Tag::TrainHup => 5,
            Tag::HomoPubkey => 6,
            Tag::TrainLoop => 7,
            Tag::TrainCalLocalGradCost => 8,
            Tag::TrainPartBytes => 9,
            Tag::TrainCalEncGradCost => 10,
            Tag::TrainEncGradCost => 11,
            Tag::TrainDecLocalGradCost => 12,
            Tag::TrainGradAndCost => 13,
            Tag::TrainUpdCostGrad => 14,
            Tag::TrainStatus => 15,
            Tag::TrainCheckStatus => 16,
            Tag::TrainModels => 17,
        }
    }
}

/// A header common to all [`Message`]s.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Header {
    /// The type of the message.
    pub tag: Tag,
    /// The training round the message belongs to. Zero outside training.
    pub round: u64,
    /// The sender's routable name. Empty on local messages until the send
    /// path fills it in.
    pub from: String,
    /// The receiver's routable name. Empty on local messages.
    pub to: String,
}

impl Header {
    fn local(tag: Tag, round: u64) -> Self {
        Self {
            tag,
            round,
            from: String::new(),
            to: String::new(),
        }
    }
}

/// A message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// The message payload.
    pub payload: Payload,
}

impl Message {
    fn new(tag: Tag, round: u64, payload: Payload) -> Self {
        payload.check(tag);
        Self {
            header: Header::local(tag, round),
            payload,
        }
    }

    pub fn psi_enc() -> Self {
        Self::new(Tag::PsiEnc, 0, Payload::Empty)
    }

    pub fn psi_ask_re_enc(enc_ids: Vec<u8>) -> Self {
        let re_enc = ReEnc {
            enc_ids,
            re_enc_ids: Vec::new(),
        };
        Self::new(Tag::PsiAskReEnc, 0, re_enc.into())
    }

    pub fn psi_re_enc_request(enc_ids: Vec<u8>, round: u64) -> Self {
        let re_enc = ReEnc {
            enc_ids,
            re_enc_ids: Vec::new(),
        };
        Self::new(Tag::PsiReEnc, round, re_enc.into())
    }

    pub fn psi_re_enc_response(re_enc_ids: Vec<u8>) -> Self {
        let re_enc = ReEnc {
            enc_ids: Vec::new(),
            re_enc_ids,
        };
        Self::new(Tag::PsiReEnc, 0, re_enc.into())
    }

    pub fn psi_intersect() -> Self {
        Self::new(Tag::PsiIntersect, 0, Payload::Empty)
    }

    pub fn train_hup() -> Self {
        Self::new(Tag::TrainHup, 0, Payload::Empty)
    }

    pub fn homo_pubkey(key: Vec<u8>, round: u64) -> Self {
        Self::new(Tag::HomoPubkey, round, Pubkey { key }.into())
    }

    pub fn train_loop(round: u64) -> Self {
        Self::new(Tag::TrainLoop, round, Payload::Empty)
    }

    pub fn train_cal_local_grad_cost(round: u64) -> Self {
        Self::new(Tag::TrainCalLocalGradCost, round, Payload::Empty)
    }

    pub fn train_part_bytes(parts: Vec<u8>, round: u64) -> Self {
        Self::new(Tag::TrainPartBytes, round, PartBytes { parts }.into())
    }

    pub fn train_cal_enc_grad_cost(round: u64) -> Self {
        Self::new(Tag::TrainCalEncGradCost, round, Payload::Empty)
    }

    pub fn train_enc_grad_cost(enc_grad: Vec<u8>, enc_cost: Vec<u8>, round: u64) -> Self {
        let payload = EncGradCost { enc_grad, enc_cost };
        Self::new(Tag::TrainEncGradCost, round, payload.into())
    }

    pub fn train_dec_local_grad_cost(round: u64) -> Self {
        Self::new(Tag::TrainDecLocalGradCost, round, Payload::Empty)
    }

    pub fn train_grad_and_cost(grad_bytes: Vec<u8>, cost_bytes: Vec<u8>, round: u64) -> Self {
        let payload = GradCost {
            grad_bytes,
            cost_bytes,
        };
        Self::new(Tag::TrainGradAndCost, round, payload.into())
    }

    pub fn train_upd_cost_grad(round: u64) -> Self {
        Self::new(Tag::TrainUpdCostGrad, round, Payload::Empty)
    }

    pub fn train_status(stopped: bool, round: u64) -> Self {
        Self::new(Tag::TrainStatus, round, Status { stopped }.into())
    }

    pub fn train_check_status(round: u64) -> Self {
        Self::new(Tag::TrainCheckStatus, round, Payload::Empty)
    }

    pub fn train_models(round: u64) -> Self {
        Self::new(Tag::TrainModels, round, Payload::Empty)
    }
}

impl ToBytes for Message {
    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        write_header(buffer, self.header.tag.into(), self.header.round);
        write_lv(buffer, self.header.from.as_bytes());
        write_lv(buffer, self.header.to.as_bytes());
        self.payload.to_bytes(buffer);
    }
}

impl FromBytes for Message {
    fn from_byte_slice(buffer: &[u8]) -> Result<Self, DecodeError> {
        let reader = MessageBuffer::new(buffer).context("not a valid message")?;
        let tag = Tag::try_from(reader.tag())?;
        let round = reader.round();
        let mut fields = LvReader::new(reader.payload());
        let from = fields.next_string().context("invalid sender address")?;
        let to = fields.next_string().context("invalid receiver address")?;
        let payload = Payload::from_reader(tag, &mut fields)
            .with_context(|| format!("invalid payload for tag {:?}", tag))?;
        fields.finish()?;
        Ok(Self {
            header: Header {
                tag,
                round,
                from,
                to,
            },
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: &Message) -> Message {
        Message::from_byte_slice(&message.to_vec()).unwrap()
    }

    #[test]
    fn test_wire_message_round_trips() {
        let mut message = Message::psi_re_enc_request(vec![0xaa; 8], 0);
        message.header.from = "party-a".into();
        message.header.to = "party-b".into();
        assert_eq!(round_trip(&message), message);

        let mut message = Message::train_enc_grad_cost(vec![1, 2, 3], vec![4, 5], 7);
        message.header.from = "party-b".into();
        message.header.to = "party-a".into();
        assert_eq!(round_trip(&message), message);

        let message = Message::train_status(true, 3);
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_local_message_round_trips() {
        assert_eq!(round_trip(&Message::psi_enc()), Message::psi_enc());
        assert_eq!(round_trip(&Message::train_loop(5)), Message::train_loop(5));
    }

    #[test]
    fn test_invalid_tag_is_rejected() {
        let mut bytes = Message::train_loop(1).to_vec();
        bytes[0] = 0xff;
        assert!(Message::from_byte_slice(&bytes).is_err());
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let bytes = Message::train_status(false, 2).to_vec();
        assert!(Message::from_byte_slice(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_round_is_carried_in_the_header() {
        let message = round_trip(&Message::train_part_bytes(vec![9; 4], 11));
        assert_eq!(message.header.round, 11);
        assert_eq!(message.header.tag, Tag::TrainPartBytes);
    }
}
