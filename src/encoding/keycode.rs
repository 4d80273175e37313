use std::fmt;

use serde::{Deserialize, Serialize};

use super::{EncodingError, Key};
use crate::error::Result;

/// Byte separating the count field from the tie-breaker field.
pub const SEPARATOR: u8 = b'/';

const COUNT_LEN: usize = 8;
const TIE_LEN: usize = 8;

/// Encoded length of every rank key: count, separator, tie-breaker.
pub const RANK_KEY_LEN: usize = COUNT_LEN + 1 + TIE_LEN;

/// How entities with equal counts are ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TieBreak {
    /// Earlier-created entities (smaller tie-breaker) rank higher.
    #[default]
    OlderFirst,
    /// Later-created entities (larger tie-breaker) rank higher.
    NewerFirst,
}

impl TieBreak {
    fn apply(self, tie_breaker: u64) -> u64 {
        match self {
            TieBreak::OlderFirst => u64::MAX - tie_breaker,
            TieBreak::NewerFirst => tie_breaker,
        }
    }
}

/// Encode a count with order preservation
pub fn encode_count(count: i64) -> [u8; COUNT_LEN] {
    // Flip the sign bit to ensure negative numbers sort before positive
    let unsigned = (count as u64) ^ (1u64 << 63);
    unsigned.to_be_bytes()
}

/// Decode a count from its 8 byte big-endian form
pub fn decode_count(bytes: [u8; COUNT_LEN]) -> i64 {
    // Flip the sign bit back
    (u64::from_be_bytes(bytes) ^ (1u64 << 63)) as i64
}

/// Order-preserving address of a tree node: `(count, tie-breaker)` packed so
/// that comparing the raw bytes compares the ranks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RankKey([u8; RANK_KEY_LEN]);

impl RankKey {
    pub fn new(count: i64, tie_breaker: u64, policy: TieBreak) -> Self {
        let mut buf = [0u8; RANK_KEY_LEN];
        buf[..COUNT_LEN].copy_from_slice(&encode_count(count));
        buf[COUNT_LEN] = SEPARATOR;
        buf[COUNT_LEN + 1..].copy_from_slice(&policy.apply(tie_breaker).to_be_bytes());
        RankKey(buf)
    }

    pub fn count(&self) -> i64 {
        let mut buf = [0u8; COUNT_LEN];
        buf.copy_from_slice(&self.0[..COUNT_LEN]);
        decode_count(buf)
    }

    /// Recovers the caller's tie-breaker; the policy must be the one used at
    /// construction time.
    pub fn tie_breaker(&self, policy: TieBreak) -> u64 {
        // Both policies are involutions.
        policy.apply(self.stored_tie())
    }

    fn stored_tie(&self) -> u64 {
        let mut buf = [0u8; TIE_LEN];
        buf.copy_from_slice(&self.0[COUNT_LEN + 1..]);
        u64::from_be_bytes(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RankKey({self})")
    }
}

impl fmt::Display for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:016x}", self.count(), self.stored_tie())
    }
}

impl Key for RankKey {
    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RANK_KEY_LEN {
            return Err(EncodingError::TruncatedData.into());
        }
        if bytes.len() != RANK_KEY_LEN {
            return Err(EncodingError::InvalidFormat(format!(
                "Rank key must be {RANK_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
            .into());
        }
        if bytes[COUNT_LEN] != SEPARATOR {
            return Err(
                EncodingError::InvalidFormat("Missing rank key separator".to_string()).into(),
            );
        }

        let mut buf = [0u8; RANK_KEY_LEN];
        buf.copy_from_slice(bytes);
        Ok(RankKey(buf))
    }
}
