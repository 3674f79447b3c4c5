//! Two-party private set intersection over blinded sample ids.
//!
//! Both parties blind their own id column, have the peer blind it a second
//! time, and locally double-blind the peer's set while answering. Since the
//! blinding commutes, the doubly-blinded sets can be intersected directly:
//! matching elements correspond to shared ids, and the element bytes give
//! both parties the same canonical row order without any extra agreement.

use std::collections::HashSet;

use num::bigint::BigUint;
use tracing::debug;

use tandem_core::crypto::{decode_id_set, encode_id_set, BlindKey};

use crate::{error::Error, samples::SampleSet};

/// The PSI engine of one party. Owned by its learner; all state transitions
/// run under the learner's lock.
#[derive(Debug)]
pub struct TwoPartyPsi {
    address: String,
    peer: String,
    key: BlindKey,
    table: SampleSet,
    ids: Vec<String>,
    /// Our ids, blinded by us and then by the peer; in our row order.
    self_double: Option<Vec<BigUint>>,
    /// The peer's ids, blinded by the peer and then by us; in its row order.
    other_double: Option<Vec<BigUint>>,
    /// The computed alignment, cached so repeated intersection attempts
    /// stay idempotent.
    result: Option<(Vec<Vec<String>>, Vec<String>)>,
}

impl TwoPartyPsi {
    /// Parses the sample blob and prepares a fresh engine.
    ///
    /// # Errors
    /// Fails if the blob is not valid CSV or the id column is absent.
    pub fn new(address: &str, samples: &[u8], id_name: &str, peer: &str) -> Result<Self, Error> {
        let table = SampleSet::parse(samples)?;
        let id_index = table
            .column(id_name)
            .ok_or_else(|| Error::MissingColumn(id_name.to_string()))?;
        let ids = table.rows.iter().map(|row| row[id_index].clone()).collect();
        Ok(Self {
            address: address.to_string(),
            peer: peer.to_string(),
            key: BlindKey::generate(),
            table,
            ids,
            self_double: None,
            other_double: None,
            result: None,
        })
    }

    /// Blinds the local id column for transmission to the peer.
    ///
    /// # Errors
    /// Fails if the id column contains duplicates, which would make the
    /// alignment ambiguous.
    pub fn encrypt_sample_id_set(&mut self) -> Result<Vec<u8>, Error> {
        let mut seen = HashSet::new();
        for id in &self.ids {
            if !seen.insert(id.as_str()) {
                return Err(Error::DuplicateId(id.clone()));
            }
        }
        let elements: Vec<_> = self.ids.iter().map(|id| self.key.blind(id.as_bytes())).collect();
        debug!(
            party = %self.address,
            ids = elements.len(),
            "blinded local sample ids"
        );
        Ok(encode_id_set(&elements))
    }

    /// Blinds the peer's already-blinded ids a second time, preserving
    /// their order, and returns the result for the peer.
    pub fn re_encrypt_id_set(&mut self, party: &str, enc_ids: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_party(party)?;
        let elements = decode_id_set(enc_ids).map_err(|e| Error::Decode(e.into()))?;
        let re_blinded: Vec<_> = elements.iter().map(|el| self.key.blind_again(el)).collect();
        Ok(encode_id_set(&re_blinded))
    }

    /// Consumes the doubly-blinded version of our own ids returned by the
    /// peer. Returns `true` once every expected peer has answered; with a
    /// single peer that is immediately.
    pub fn set_re_encrypt_id_set(&mut self, party: &str, re_enc_ids: &[u8]) -> Result<bool, Error> {
        self.check_party(party)?;
        let elements = decode_id_set(re_enc_ids).map_err(|e| Error::Decode(e.into()))?;
        if elements.len() != self.ids.len() {
            return Err(Error::IdSetMismatch {
                expected: self.ids.len(),
                actual: elements.len(),
            });
        }
        self.self_double = Some(elements);
        Ok(true)
    }

    /// Stashes the doubly-blinded version of the peer's ids that we produced
    /// while answering its re-encryption request.
    pub fn set_other_final_re_encrypt_id_set(
        &mut self,
        party: &str,
        re_enc_ids: &[u8],
    ) -> Result<(), Error> {
        self.check_party(party)?;
        let elements = decode_id_set(re_enc_ids).map_err(|e| Error::Decode(e.into()))?;
        self.other_double = Some(elements);
        Ok(())
    }

    /// Attempts the intersection. Returns `None` while either doubly-blinded
    /// set is still missing; afterwards the aligned local rows (header row
    /// first) and the shared ids, both in the canonical order given by the
    /// doubly-blinded element bytes.
    ///
    /// # Errors
    /// An empty intersection is fatal.
    pub fn intersect_parts(&mut self) -> Result<Option<(Vec<Vec<String>>, Vec<String>)>, Error> {
        if let Some(result) = &self.result {
            return Ok(Some(result.clone()));
        }
        let (self_double, other_double) = match (&self.self_double, &self.other_double) {
            (Some(ours), Some(theirs)) => (ours, theirs),
            _ => return Ok(None),
        };

        let membership: HashSet<&BigUint> = other_double.iter().collect();
        let mut hits: Vec<(&BigUint, usize)> = self_double
            .iter()
            .enumerate()
            .filter(|(_, element)| membership.contains(element))
            .map(|(row, element)| (element, row))
            .collect();
        if hits.is_empty() {
            return Err(Error::EmptyIntersection);
        }
        hits.sort();

        let mut rows = Vec::with_capacity(hits.len() + 1);
        rows.push(self.table.header.clone());
        let mut ids = Vec::with_capacity(hits.len());
        for (_, row) in &hits {
            rows.push(self.table.rows[*row].clone());
            ids.push(self.ids[*row].clone());
        }
        debug!(
            party = %self.address,
            shared = ids.len(),
            local = self.ids.len(),
            "sample intersection computed"
        );
        self.result = Some((rows, ids));
        Ok(self.result.clone())
    }

    fn check_party(&self, party: &str) -> Result<(), Error> {
        if party == self.peer {
            Ok(())
        } else {
            Err(Error::UnknownParty(party.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn engine(address: &str, peer: &str, samples: &[u8]) -> TwoPartyPsi {
        TwoPartyPsi::new(address, samples, "id", peer).unwrap()
    }

    type Alignment = (Vec<Vec<String>>, Vec<String>);

    /// Drives both engines through the full exchange, the way the learners
    /// do over the wire.
    fn run(a: &mut TwoPartyPsi, b: &mut TwoPartyPsi) -> Result<(Alignment, Alignment), Error> {
        let enc_a = a.encrypt_sample_id_set()?;
        let enc_b = b.encrypt_sample_id_set()?;

        let re_a = b.re_encrypt_id_set("a", &enc_a)?;
        b.set_other_final_re_encrypt_id_set("a", &re_a)?;
        assert!(a.set_re_encrypt_id_set("b", &re_a)?);

        let re_b = a.re_encrypt_id_set("b", &enc_b)?;
        a.set_other_final_re_encrypt_id_set("b", &re_b)?;
        assert!(b.set_re_encrypt_id_set("a", &re_b)?);

        let ours = a.intersect_parts()?.expect("a has both sets");
        let theirs = b.intersect_parts()?.expect("b has both sets");
        Ok((ours, theirs))
    }

    #[test]
    fn test_both_parties_agree_on_the_intersection() {
        let mut a = engine("a", "b", b"id,x1\n1,0.2\n2,0.8\n3,0.5\n5,0.1\n");
        let mut b = engine("b", "a", b"id,x2,y\n4,0.4,0\n1,1.0,0\n2,1.2,1\n3,0.9,1\n");
        let ((rows_a, ids_a), (rows_b, ids_b)) = run(&mut a, &mut b).unwrap();

        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a.len(), 3);
        let mut sorted = ids_a.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["1", "2", "3"]);

        // row i of each party refers to the same sample id
        assert_eq!(rows_a[0], vec!["id", "x1"]);
        assert_eq!(rows_b[0], vec!["id", "x2", "y"]);
        for (i, id) in ids_a.iter().enumerate() {
            assert_eq!(&rows_a[i + 1][0], id);
            assert_eq!(&rows_b[i + 1][0], id);
        }
    }

    #[test]
    fn test_intersection_is_idempotent() {
        let mut a = engine("a", "b", b"id,x1\n1,0.2\n2,0.8\n");
        let mut b = engine("b", "a", b"id,x2\n2,1.2\n1,1.0\n");
        run(&mut a, &mut b).unwrap();
        let first = a.intersect_parts().unwrap();
        assert_eq!(a.intersect_parts().unwrap(), first);
    }

    #[test]
    fn test_empty_intersection_is_fatal() {
        let mut a = engine("a", "b", b"id,x1\n1,0.2\n2,0.8\n");
        let mut b = engine("b", "a", b"id,x2\n3,1.2\n4,1.0\n");
        let err = run(&mut a, &mut b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(matches!(err, Error::EmptyIntersection));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut a = engine("a", "b", b"id,x1\n1,0.2\n1,0.8\n");
        let err = a.encrypt_sample_id_set().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(matches!(err, Error::DuplicateId(id) if id == "1"));
    }

    #[test]
    fn test_missing_id_column() {
        let err = TwoPartyPsi::new("a", b"key,x1\n1,0.2\n", "id", "b").unwrap_err();
        assert!(matches!(err, Error::MissingColumn(name) if name == "id"));
    }

    #[test]
    fn test_mismatched_re_encrypted_set_is_rejected() {
        let mut a = engine("a", "b", b"id,x1\n1,0.2\n2,0.8\n");
        let mut b = engine("b", "a", b"id,x2\n1,1.0\n");
        let enc_a = a.encrypt_sample_id_set().unwrap();
        // drop one element from the peer's answer
        let re_a = b.re_encrypt_id_set("a", &enc_a).unwrap();
        let truncated = &re_a[..re_a.len() - tandem_core::crypto::GROUP_ELEMENT_LENGTH];
        let err = a.set_re_encrypt_id_set("b", truncated).unwrap_err();
        assert!(matches!(err, Error::IdSetMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_unknown_party_is_rejected() {
        let mut a = engine("a", "b", b"id,x1\n1,0.2\n");
        assert!(matches!(
            a.re_encrypt_id_set("mallory", &[]),
            Err(Error::UnknownParty(party)) if party == "mallory"
        ));
    }
}
