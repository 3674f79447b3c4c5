//! Commutative blinding of sample identifiers.
//!
//! Identifiers are hashed into the quadratic-residue subgroup of a fixed
//! 2048-bit safe-prime group (RFC 3526, group 14) and raised to a per-party
//! secret exponent. Exponentiation commutes, so two parties that each apply
//! their own key in either order arrive at the same doubly-blinded element:
//! `E_a(E_b(x)) = E_b(E_a(x))`. Equality of doubly-blinded elements therefore
//! reveals equality of the underlying identifiers and nothing else.

use num::{bigint::BigUint, traits::identities::One};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::crypto::{hash::Sha256, prng::generate_integer};

/// Serialized size of a group element in bytes.
pub const GROUP_ELEMENT_LENGTH: usize = 256;

/// The 2048-bit MODP prime of RFC 3526, group 14.
const MODP_2048: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

/// Errors related to blinded identifier encodings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlindError {
    #[error("blinded id set length {0} is not a multiple of the element size")]
    InvalidSetLength(usize),
}

/// A party's secret blinding key.
pub struct BlindKey {
    exponent: BigUint,
    p: BigUint,
}

impl BlindKey {
    /// Generates a fresh blinding key.
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut ChaCha20Rng::from_entropy())
    }

    /// Generates a blinding key from the given PRNG, for reproducible keys.
    pub fn generate_with_rng(prng: &mut ChaCha20Rng) -> Self {
        // parsing a vetted constant cannot fail
        let p = BigUint::parse_bytes(MODP_2048, 16).unwrap();
        // the subgroup of quadratic residues has prime order q = (p - 1) / 2;
        // any exponent in [2, q) is invertible there
        let q = (&p - BigUint::one()) >> 1;
        let exponent = generate_integer(prng, &(q - BigUint::from(2_u8))) + BigUint::from(2_u8);
        Self { exponent, p }
    }

    /// Blinds a raw identifier: hash into the group, square into the
    /// quadratic-residue subgroup, then apply the secret exponent.
    pub fn blind(&self, id: &[u8]) -> BigUint {
        let digest = BigUint::from_bytes_be(Sha256::hash(id).as_slice()) % &self.p;
        let residue = &digest * &digest % &self.p;
        residue.modpow(&self.exponent, &self.p)
    }

    /// Applies the secret exponent to an element already blinded by the
    /// other party.
    pub fn blind_again(&self, element: &BigUint) -> BigUint {
        element.modpow(&self.exponent, &self.p)
    }
}

impl std::fmt::Debug for BlindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlindKey").field("exponent", &"[redacted]").finish()
    }
}

/// Serializes a set of blinded identifiers as fixed-width big-endian
/// elements, preserving order.
pub fn encode_id_set(elements: &[BigUint]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(elements.len() * GROUP_ELEMENT_LENGTH);
    for element in elements {
        let raw = element.to_bytes_be();
        bytes.resize(bytes.len() + GROUP_ELEMENT_LENGTH - raw.len(), 0);
        bytes.extend_from_slice(&raw);
    }
    bytes
}

/// Deserializes a set of blinded identifiers.
///
/// # Errors
/// Fails if the buffer is not a whole number of fixed-width elements.
pub fn decode_id_set(bytes: &[u8]) -> Result<Vec<BigUint>, BlindError> {
    if bytes.len() % GROUP_ELEMENT_LENGTH != 0 {
        return Err(BlindError::InvalidSetLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(GROUP_ELEMENT_LENGTH)
        .map(BigUint::from_bytes_be)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> BlindKey {
        BlindKey::generate_with_rng(&mut ChaCha20Rng::from_seed([seed; 32]))
    }

    #[test]
    fn test_blinding_commutes() {
        let a = key(1);
        let b = key(2);
        for id in [&b"alice"[..], b"bob", b"3", b""] {
            let ab = b.blind_again(&a.blind(id));
            let ba = a.blind_again(&b.blind(id));
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_distinct_ids_stay_distinct() {
        let a = key(3);
        assert_ne!(a.blind(b"1"), a.blind(b"2"));
    }

    #[test]
    fn test_id_set_round_trip() {
        let a = key(4);
        let elements: Vec<_> = ["1", "2", "3"].iter().map(|id| a.blind(id.as_bytes())).collect();
        let bytes = encode_id_set(&elements);
        assert_eq!(bytes.len(), 3 * GROUP_ELEMENT_LENGTH);
        assert_eq!(decode_id_set(&bytes).unwrap(), elements);
    }

    #[test]
    fn test_ragged_id_set_is_rejected() {
        assert_eq!(
            decode_id_set(&[0_u8; GROUP_ELEMENT_LENGTH + 1]).unwrap_err(),
            BlindError::InvalidSetLength(GROUP_ELEMENT_LENGTH + 1)
        );
    }
}
