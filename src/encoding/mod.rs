pub mod bincode;
pub mod keycode;

use crate::error::Result;

/// Trait for encoding keys with order preservation.
///
/// Keys must maintain lexicographic ordering after encoding: the AVL tree
/// compares rank keys as raw bytes, so the encoded order is the ranking.
pub trait Key {
    /// Encode the key to bytes while preserving sort order
    fn encode(&self) -> Vec<u8>;

    /// Decode bytes back to the original key type
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Error type for encoding operations
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Invalid encoding format: {0}")]
    InvalidFormat(String),
    #[error("Truncated data")]
    TruncatedData,
    #[error("Invalid UTF-8 sequence")]
    InvalidUtf8,
}
