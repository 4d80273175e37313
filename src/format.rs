//! Human-readable rendering of store keys and values for logs and error
//! messages.

use itertools::Itertools as _;

use crate::encoding::keycode::RankKey;
use crate::encoding::Key;
use crate::tree::{Node, RecordKey};

/// Formats encoded keys and values.
pub trait Formatter {
    /// Formats a key.
    fn key(key: &[u8]) -> String;

    /// Formats a value. Also takes the key to determine the kind of value.
    fn value(key: &[u8], value: &[u8]) -> String;

    /// Formats a key/value pair.
    fn key_value(key: &[u8], value: &[u8]) -> String {
        Self::key_maybe_value(key, Some(value))
    }

    /// Formats a key/value pair, where the value may not exist.
    fn key_maybe_value(key: &[u8], value: Option<&[u8]>) -> String {
        let fmtkey = Self::key(key);
        let fmtvalue = value.map_or("None".to_string(), |v| Self::value(key, v));
        format!("{fmtkey} -> {fmtvalue}")
    }
}

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }
}

impl Formatter for Raw {
    fn key(key: &[u8]) -> String {
        Self::bytes(key)
    }

    fn value(_key: &[u8], value: &[u8]) -> String {
        Self::bytes(value)
    }
}

/// Formats records laid out by [`crate::tree::Namespace`]. Falls back to
/// [`Raw`] for anything it cannot decode.
pub struct Records;

impl Records {
    fn rank_key(bytes: &[u8]) -> String {
        RankKey::decode(bytes).map_or_else(|_| Raw::bytes(bytes), |key| key.to_string())
    }

    fn node_ref(child: Option<RankKey>) -> String {
        child.map_or("-".to_string(), |key| key.to_string())
    }
}

impl Formatter for Records {
    fn key(key: &[u8]) -> String {
        match RecordKey::parse(key) {
            Some(RecordKey::Root { tree }) => format!("{tree}:root"),
            Some(RecordKey::Node { tree, key }) => format!("{tree}:node({key})"),
            Some(RecordKey::Entity { tree, entity }) => format!("{tree}:entity({entity:?})"),
            None => Raw::key(key),
        }
    }

    fn value(key: &[u8], value: &[u8]) -> String {
        if value.is_empty() {
            return "tombstone".to_string();
        }
        match RecordKey::parse(key) {
            Some(RecordKey::Root { .. }) | Some(RecordKey::Entity { .. }) => Self::rank_key(value),
            Some(RecordKey::Node { .. }) => match Node::decode(value) {
                Ok(node) => format!(
                    "{:?} [{} {}] h={}",
                    node.payload,
                    Self::node_ref(node.left),
                    Self::node_ref(node.right),
                    node.height
                ),
                Err(_) => Raw::bytes(value),
            },
            None => Raw::bytes(value),
        }
    }
}
