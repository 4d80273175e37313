use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::encoding::keycode::RankKey;
use crate::encoding::{bincode, EncodingError};
use crate::error::{Error, Result};
use crate::hasher;

/// A child pointer: the rank key of the child's record, resolved through the
/// store on demand.
pub type NodeRef = Option<RankKey>;

const CHECKSUM_LEN: usize = 8;

/// Persisted tree node. Its own rank key is the store address, not a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub payload: String,
    pub left: NodeRef,
    pub right: NodeRef,
    pub height: u32,
}

impl Node {
    pub fn leaf(payload: impl Into<String>) -> Self {
        Node {
            payload: payload.into(),
            left: None,
            right: None,
            height: 1,
        }
    }

    pub fn child(&self, dir: Dir) -> NodeRef {
        match dir {
            Dir::Left => self.left,
            Dir::Right => self.right,
        }
    }

    /// Points `dir` at `child`, returning whether the record changed.
    pub fn set_child(&mut self, dir: Dir, child: NodeRef) -> bool {
        let slot = match dir {
            Dir::Left => &mut self.left,
            Dir::Right => &mut self.right,
        };
        let changed = *slot != child;
        *slot = child;
        changed
    }

    /// Record layout: big-endian crc64 of the body, then the bincode body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut record = Vec::with_capacity(CHECKSUM_LEN + body.len());
        record
            .write_u64::<BigEndian>(hasher::checksum(&body))
            .map_err(|e| Error::Encode("checksum", e))?;
        record.extend_from_slice(&body);
        Ok(record)
    }

    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < CHECKSUM_LEN {
            return Err(EncodingError::TruncatedData.into());
        }
        let mut reader = record;
        let stored = reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("checksum", e))?;
        let mut body = Vec::with_capacity(reader.len());
        reader
            .read_to_end(&mut body)
            .map_err(|e| Error::Decode("body", e))?;

        let computed = hasher::checksum(&body);
        if stored != computed {
            return Err(EncodingError::InvalidFormat(format!(
                "checksum mismatch: stored {stored:016x}, computed {computed:016x}"
            ))
            .into());
        }
        bincode::deserialize(&body)
    }
}

/// Which child a descent took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Left,
    Right,
}
