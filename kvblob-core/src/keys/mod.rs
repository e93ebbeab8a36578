//! Key layout for blob metadata and chunk records
//!
//! Two key families live under one namespace:
//!
//! ```text
//! (namespace, "meta", name)          -> metadata record
//! (namespace, "data", name, offset)  -> chunk bytes
//! ```
//!
//! Because tuples pack into order-preserving bytes, scanning the data prefix
//! of a blob yields its chunks by ascending offset, and a metadata prefix scan
//! yields every blob whose name starts with a given string.

mod tuple;

pub use tuple::{Element, Tuple};

use crate::error::{KvBlobError, Result};
use crate::DEFAULT_NAMESPACE;

const METADATA_FAMILY: &str = "meta";
const DATA_FAMILY: &str = "data";

/// Builds and parses keys for one blob namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn family(&self, family: &str) -> Tuple {
        Tuple::new().push(self.namespace.as_str()).push(family)
    }

    /// Key of the metadata record for `name`
    pub fn metadata_key(&self, name: &str) -> Vec<u8> {
        self.family(METADATA_FAMILY).push(name).pack()
    }

    /// Key of the chunk of `name` starting at byte `offset`
    pub fn data_key(&self, name: &str, offset: u64) -> Vec<u8> {
        self.family(DATA_FAMILY).push(name).push(offset).pack()
    }

    /// Longest chunk key `name` can have
    pub fn max_data_key_len(&self, name: &str) -> usize {
        self.data_key(name, u64::MAX).len()
    }

    /// Prefix shared by every chunk key of `name`, and only of `name`
    pub fn data_prefix(&self, name: &str) -> Vec<u8> {
        self.family(DATA_FAMILY).push(name).pack()
    }

    /// Prefix shared by the metadata keys of every blob whose name starts
    /// with `name_prefix`
    ///
    /// The name is written without its terminator so that partial names match.
    pub fn metadata_prefix(&self, name_prefix: &str) -> Vec<u8> {
        let mut prefix = self.family(METADATA_FAMILY).pack();
        prefix.push(tuple::STRING_CODE);
        tuple::encode_escaped(&mut prefix, name_prefix.as_bytes());
        prefix
    }

    /// Recover the blob name from a metadata key
    pub fn decode_metadata_key(&self, key: &[u8]) -> Result<String> {
        let mut elements = self.unpack_family(key, METADATA_FAMILY, 3)?.into_iter();
        match elements.nth(2) {
            Some(Element::String(name)) => Ok(name),
            _ => Err(invalid(key, "expected blob name")),
        }
    }

    /// Recover the blob name and chunk offset from a data key
    pub fn decode_data_key(&self, key: &[u8]) -> Result<(String, u64)> {
        let elements = self.unpack_family(key, DATA_FAMILY, 4)?;
        let offset = elements[3]
            .as_int()
            .ok_or_else(|| invalid(key, "expected chunk offset"))?;
        match elements.into_iter().nth(2) {
            Some(Element::String(name)) => Ok((name, offset)),
            _ => Err(invalid(key, "expected blob name")),
        }
    }

    fn unpack_family(&self, key: &[u8], family: &str, arity: usize) -> Result<Vec<Element>> {
        let tuple = Tuple::unpack(key)?;
        if tuple.len() != arity {
            return Err(invalid(key, "wrong number of components"));
        }
        let namespace_matches =
            tuple.get(0).and_then(Element::as_str) == Some(self.namespace.as_str());
        let family_matches = tuple.get(1).and_then(Element::as_str) == Some(family);
        if !namespace_matches || !family_matches {
            return Err(invalid(key, "key belongs to another namespace or family"));
        }
        Ok(tuple.into_elements())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

fn invalid(key: &[u8], reason: &str) -> KvBlobError {
    KvBlobError::InvalidKey(format!("{}: {}", reason, hex::encode(key)))
}
