//! Byte layouts of the cryptographic blobs that ride inside messages.
//!
//! The message layer treats part bytes, ciphertext lists and decrypted
//! grad/cost pieces as opaque fields; this module owns their internal
//! length-value layout.

use num::bigint::BigInt;

use tandem_core::{
    crypto::Ciphertext,
    message::{write_lv, LvReader},
};

use crate::error::Error;

/// The peer's encrypted per-sample series for one round, all under the
/// peer's own key: the residual share for the gradient, and the constant
/// and linear cost coefficients.
#[derive(Debug, Clone)]
pub(crate) struct EncryptedParts {
    pub share: Vec<Ciphertext>,
    pub cost_const: Vec<Ciphertext>,
    pub cost_lin: Vec<Ciphertext>,
}

pub(crate) fn encode_parts(parts: &EncryptedParts) -> Vec<u8> {
    let mut bytes = Vec::new();
    write_lv(&mut bytes, &encode_ct_list(&parts.share));
    write_lv(&mut bytes, &encode_ct_list(&parts.cost_const));
    write_lv(&mut bytes, &encode_ct_list(&parts.cost_lin));
    bytes
}

pub(crate) fn decode_parts(bytes: &[u8]) -> Result<EncryptedParts, Error> {
    let mut reader = LvReader::new(bytes);
    let share = decode_ct_list(reader.next().map_err(Error::Decode)?)?;
    let cost_const = decode_ct_list(reader.next().map_err(Error::Decode)?)?;
    let cost_lin = decode_ct_list(reader.next().map_err(Error::Decode)?)?;
    reader.finish().map_err(Error::Decode)?;
    for series in [&cost_const, &cost_lin] {
        if series.len() != share.len() {
            return Err(Error::ShapeMismatch {
                expected: share.len(),
                actual: series.len(),
            });
        }
    }
    Ok(EncryptedParts {
        share,
        cost_const,
        cost_lin,
    })
}

pub(crate) fn encode_ct_list(list: &[Ciphertext]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for ciphertext in list {
        write_lv(&mut bytes, &ciphertext.to_bytes());
    }
    bytes
}

pub(crate) fn decode_ct_list(bytes: &[u8]) -> Result<Vec<Ciphertext>, Error> {
    let mut reader = LvReader::new(bytes);
    let mut list = Vec::new();
    while !reader.is_empty() {
        list.push(Ciphertext::from_slice(reader.next().map_err(Error::Decode)?)?);
    }
    Ok(list)
}

pub(crate) fn encode_int_list(list: &[BigInt]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for value in list {
        write_lv(&mut bytes, &value.to_signed_bytes_be());
    }
    bytes
}

pub(crate) fn decode_int_list(bytes: &[u8]) -> Result<Vec<BigInt>, Error> {
    let mut reader = LvReader::new(bytes);
    let mut list = Vec::new();
    while !reader.is_empty() {
        list.push(BigInt::from_signed_bytes_be(reader.next().map_err(Error::Decode)?));
    }
    Ok(list)
}
