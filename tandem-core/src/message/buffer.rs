//! Message buffers and length-value field helpers.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::ops::Range;

use anyhow::anyhow;

use crate::message::DecodeError;

const TAG_FIELD: usize = 0;
const FLAGS_FIELD: usize = 1;
// reserved bytes keep the round field 4-byte aligned
const ROUND_FIELD: Range<usize> = 4..12;
pub(crate) const HEADER_LENGTH: usize = ROUND_FIELD.end;

/// A read wrapper around a buffer that contains a message.
///
/// It provides getters for the fixed header fields; the variable part of the
/// message is consumed through an [`LvReader`] over [`payload()`].
///
/// [`payload()`]: MessageBuffer::payload
pub struct MessageBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> MessageBuffer<T> {
    /// Performs bound checks on `bytes` and returns a new [`MessageBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are smaller than a minimal-sized message.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let len = bytes.as_ref().len();
        if len < HEADER_LENGTH {
            return Err(anyhow!("invalid buffer length: {} < {}", len, HEADER_LENGTH));
        }
        Ok(Self { inner: bytes })
    }

    /// Gets the tag field.
    pub fn tag(&self) -> u8 {
        self.inner.as_ref()[TAG_FIELD]
    }

    /// Gets the flags field.
    pub fn flags(&self) -> u8 {
        self.inner.as_ref()[FLAGS_FIELD]
    }

    /// Gets the round field.
    pub fn round(&self) -> u64 {
        // the range is exactly 8 bytes long, so the conversion cannot fail
        u64::from_be_bytes(self.inner.as_ref()[ROUND_FIELD].try_into().unwrap())
    }

    /// Gets the variable part of the message.
    pub fn payload(&self) -> &[u8] {
        &self.inner.as_ref()[HEADER_LENGTH..]
    }
}

/// Writes the fixed message header.
pub(crate) fn write_header(buffer: &mut Vec<u8>, tag: u8, round: u64) {
    buffer.push(tag);
    buffer.push(0); // flags
    buffer.extend_from_slice(&[0, 0]); // reserved
    buffer.extend_from_slice(&round.to_be_bytes());
}

/// Appends a length-value field. The 4-byte big-endian length counts the
/// whole field, length bytes included.
pub fn write_lv(buffer: &mut Vec<u8>, value: &[u8]) {
    let length = (value.len() + LENGTH_FIELD) as u32;
    buffer.extend_from_slice(&length.to_be_bytes());
    buffer.extend_from_slice(value);
}

const LENGTH_FIELD: usize = 4;

/// A sequential reader over length-value fields.
///
/// # Examples
/// ```
/// # use tandem_core::message::LvReader;
/// let bytes = vec![
///     0x00, 0x00, 0x00, 0x05, // length = 5
///     0xff, // value
/// ];
/// let mut reader = LvReader::new(&bytes);
/// assert_eq!(reader.next().unwrap(), &[0xff][..]);
/// assert!(reader.finish().is_ok());
/// ```
pub struct LvReader<'a> {
    bytes: &'a [u8],
}

impl<'a> LvReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Reads the next length-value field.
    ///
    /// # Errors
    /// Fails on a truncated length or value.
    pub fn next(&mut self) -> Result<&'a [u8], DecodeError> {
        if self.bytes.len() < LENGTH_FIELD {
            return Err(anyhow!("truncated length-value field"));
        }
        // the slice is exactly 4 bytes long, so the conversion cannot fail
        let length = u32::from_be_bytes(self.bytes[..LENGTH_FIELD].try_into().unwrap()) as usize;
        if length < LENGTH_FIELD || length > self.bytes.len() {
            return Err(anyhow!("invalid length-value field length: {}", length));
        }
        let value = &self.bytes[LENGTH_FIELD..length];
        self.bytes = &self.bytes[length..];
        Ok(value)
    }

    /// Reads the next field as a UTF-8 string.
    pub fn next_string(&mut self) -> Result<String, DecodeError> {
        let value = self.next()?;
        String::from_utf8(value.to_vec()).map_err(|_| anyhow!("invalid utf-8 in string field"))
    }

    /// Reads the next field as a boolean.
    pub fn next_bool(&mut self) -> Result<bool, DecodeError> {
        match self.next()? {
            [0] => Ok(false),
            [1] => Ok(true),
            value => Err(anyhow!("invalid boolean field of {} bytes", value.len())),
        }
    }

    /// Whether all fields have been consumed.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Checks that the buffer has been fully consumed.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} trailing bytes after the last field", self.bytes.len()))
        }
    }
}
