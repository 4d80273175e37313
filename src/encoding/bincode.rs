use super::EncodingError;
use crate::error::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Fixed-width little-endian integers, no size limit, exact-length decode.
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    options()
        .serialize(value)
        .map_err(|e| EncodingError::InvalidFormat(format!("Serialization failed: {}", e)).into())
}

/// Deserialize a value from a byte slice using bincode.
///
/// Trailing bytes are rejected: a record must decode exactly.
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    options()
        .deserialize(bytes)
        .map_err(|e| match *e {
            bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                EncodingError::TruncatedData.into()
            }
            bincode::ErrorKind::InvalidUtf8Encoding(_) => EncodingError::InvalidUtf8.into(),
            _ => EncodingError::InvalidFormat(format!("Deserialization failed: {}", e)).into(),
        })
}
