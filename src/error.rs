use std::io;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::format::{Formatter, Raw};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid header")]
    InvalidHeader,

    #[error("Failed to decode {0}: {1}")]
    Decode(&'static str, io::Error),

    #[error("Failed to encode {0}: {1}")]
    Encode(&'static str, io::Error),

    #[error("Corrupted log: {0}")]
    CorruptedLog(String),

    /// An earlier append or sync failed. The log takes no more writes until
    /// it is reopened.
    #[error("Log is unusable after an earlier write failure")]
    LogFailed,

    #[error("Store directory is locked by another process: {0}")]
    Locked(io::Error),

    #[error("Mutex was poisoned")]
    MutexPoisoned,

    /// Failure reported by a foreign `ByteStore` backend.
    #[error("Store failure: {0}")]
    Store(String),

    #[error("Malformed record at {}: {reason}", Raw::key(.key))]
    MalformedRecord { key: Vec<u8>, reason: String },

    #[error("Dangling reference to {}", Raw::key(.key))]
    DanglingReference { key: Vec<u8> },

    #[error("Rank key {} is already occupied", Raw::key(.key))]
    Occupied { key: Vec<u8> },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Invalid tree name: {0:?}")]
    InvalidTreeName(String),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl Error {
    /// Integrity faults: the persisted tree can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MalformedRecord { .. }
                | Error::DanglingReference { .. }
                | Error::Integrity(_)
                | Error::CorruptedLog(_)
                | Error::Encoding(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}
