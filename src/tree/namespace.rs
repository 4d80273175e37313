use crate::encoding::keycode::{RankKey, RANK_KEY_LEN};
use crate::encoding::Key;
use crate::error::{Error, Result};

const ROOT: &[u8] = b"root";
const NODE: &[u8] = b"n/";
const ENTITY: &[u8] = b"e/";

/// Key layout of one named tree inside a shared store:
///
/// ```text
/// <name>/root           root pointer
/// <name>/n/<rank key>   node record
/// <name>/e/<entity>     reverse index record
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    prefix: Vec<u8>,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidTreeName(name.to_string()));
        }
        let mut prefix = name.as_bytes().to_vec();
        prefix.push(b'/');
        Ok(Self {
            name: name.to_string(),
            prefix,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_key(&self) -> Vec<u8> {
        self.join(ROOT, &[])
    }

    pub fn node_key(&self, key: &RankKey) -> Vec<u8> {
        self.join(NODE, key.as_bytes())
    }

    pub fn entity_key(&self, entity: &str) -> Vec<u8> {
        self.join(ENTITY, entity.as_bytes())
    }

    fn join(&self, kind: &[u8], tail: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + kind.len() + tail.len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(kind);
        key.extend_from_slice(tail);
        key
    }
}

/// A store key classified by the record it addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey<'a> {
    Root { tree: &'a str },
    Node { tree: &'a str, key: RankKey },
    Entity { tree: &'a str, entity: &'a str },
}

impl<'a> RecordKey<'a> {
    /// Parses a raw store key; `None` for keys outside any tree layout.
    pub fn parse(raw: &'a [u8]) -> Option<Self> {
        let split = raw.iter().position(|b| *b == b'/')?;
        let tree = std::str::from_utf8(&raw[..split]).ok()?;
        let rest = &raw[split + 1..];

        if rest == ROOT {
            Some(RecordKey::Root { tree })
        } else if let Some(tail) = rest.strip_prefix(NODE) {
            if tail.len() != RANK_KEY_LEN {
                return None;
            }
            let key = RankKey::decode(tail).ok()?;
            Some(RecordKey::Node { tree, key })
        } else if let Some(tail) = rest.strip_prefix(ENTITY) {
            let entity = std::str::from_utf8(tail).ok()?;
            Some(RecordKey::Entity { tree, entity })
        } else {
            None
        }
    }
}
