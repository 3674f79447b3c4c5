//! Serialization traits for message types.

use crate::message::DecodeError;

/// An interface for serializable message types.
///
/// See also [`FromBytes`] for deserialization.
pub trait ToBytes {
    /// Appends the encoded type to the given buffer.
    fn to_bytes(&self, buffer: &mut Vec<u8>);

    /// Encodes the type into a fresh buffer.
    fn to_vec(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.to_bytes(&mut buffer);
        buffer
    }
}

/// An interface for deserializable message types.
///
/// See also [`ToBytes`] for serialization.
pub trait FromBytes: Sized {
    /// Deserializes the type from the given buffer.
    ///
    /// # Errors
    /// Fails if the buffer does not contain a valid encoding of the type.
    fn from_byte_slice(buffer: &[u8]) -> Result<Self, DecodeError>;
}
