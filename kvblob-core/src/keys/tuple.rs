//! Order-preserving tuple encoding.
//!
//! A subset of the FoundationDB tuple layer: UTF-8 strings and unsigned
//! integers. Packed tuples compare byte-wise in the same order as their
//! elements, so prefix scans return keys in component order and integers sort
//! numerically rather than as text.
//!
//! | Code | Type | Encoding |
//! |------|------|----------|
//! | 0x02 | String | UTF-8, `0x00` escaped as `0x00 0xFF`, terminated by `0x00` |
//! | 0x14 | Int zero | single byte |
//! | 0x15-0x1C | Positive int | `0x14 + n`, then `n` big-endian bytes |

use crate::error::{KvBlobError, Result};

/// UTF-8 string type code.
pub(crate) const STRING_CODE: u8 = 0x02;

/// Integer zero type code (pivot point for integer encoding).
const INT_ZERO_CODE: u8 = 0x14;

/// Largest positive integer type code (8 payload bytes).
const INT_MAX_CODE: u8 = INT_ZERO_CODE + 8;

/// Escape byte following an embedded null.
const NULL_ESCAPE: u8 = 0xFF;

/// A single typed tuple component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Element {
    String(String),
    Int(u64),
}

impl Element {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Element::String(s) => Some(s),
            Element::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Element::Int(n) => Some(*n),
            Element::String(_) => None,
        }
    }
}

impl From<&str> for Element {
    fn from(s: &str) -> Self {
        Element::String(s.to_string())
    }
}

impl From<String> for Element {
    fn from(s: String) -> Self {
        Element::String(s)
    }
}

impl From<u64> for Element {
    fn from(n: u64) -> Self {
        Element::Int(n)
    }
}

/// An ordered collection of typed elements that packs into sortable bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple {
    elements: Vec<Element>,
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an element onto the tuple (builder pattern)
    pub fn push<E: Into<Element>>(mut self, element: E) -> Self {
        self.elements.push(element.into());
        self
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn into_elements(self) -> Vec<Element> {
        self.elements
    }

    /// Pack the tuple into bytes
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.elements.len() * 8);
        for element in &self.elements {
            match element {
                Element::String(s) => {
                    out.push(STRING_CODE);
                    encode_escaped(&mut out, s.as_bytes());
                    out.push(0x00);
                }
                Element::Int(n) => encode_uint(&mut out, *n),
            }
        }
        out
    }

    /// Unpack bytes produced by [`Tuple::pack`]
    pub fn unpack(data: &[u8]) -> Result<Self> {
        let mut elements = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (element, consumed) = decode_element(data, offset)?;
            elements.push(element);
            offset += consumed;
        }
        Ok(Self { elements })
    }
}

/// Append bytes with embedded nulls escaped; no terminator is written.
pub(crate) fn encode_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == 0x00 {
            out.push(NULL_ESCAPE);
        }
    }
}

fn encode_uint(out: &mut Vec<u8>, n: u64) {
    if n == 0 {
        out.push(INT_ZERO_CODE);
        return;
    }
    let be = n.to_be_bytes();
    let skip = (n.leading_zeros() / 8) as usize;
    let len = be.len() - skip;
    out.push(INT_ZERO_CODE + len as u8);
    out.extend_from_slice(&be[skip..]);
}

fn decode_element(data: &[u8], offset: usize) -> Result<(Element, usize)> {
    let code = data[offset];
    match code {
        STRING_CODE => {
            let (bytes, consumed) = decode_escaped(data, offset + 1)?;
            let s = String::from_utf8(bytes).map_err(|e| {
                KvBlobError::InvalidKey(format!("invalid UTF-8 at offset {}: {}", offset, e))
            })?;
            Ok((Element::String(s), consumed + 1))
        }
        INT_ZERO_CODE..=INT_MAX_CODE => {
            let size = (code - INT_ZERO_CODE) as usize;
            let end = offset + 1 + size;
            if end > data.len() {
                return Err(KvBlobError::InvalidKey(format!(
                    "unexpected end of input at offset {}",
                    offset
                )));
            }
            let n = data[offset + 1..end]
                .iter()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64);
            Ok((Element::Int(n), 1 + size))
        }
        _ => Err(KvBlobError::InvalidKey(format!(
            "unknown type code 0x{:02X} at offset {}",
            code, offset
        ))),
    }
}

/// Decode an escaped byte string starting at `start`.
///
/// Returns the bytes and the number of input bytes consumed, terminator included.
fn decode_escaped(data: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let mut result = Vec::new();
    let mut i = start;
    while i < data.len() {
        match data[i] {
            0x00 if data.get(i + 1) == Some(&NULL_ESCAPE) => {
                result.push(0x00);
                i += 2;
            }
            0x00 => return Ok((result, i - start + 1)),
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Err(KvBlobError::InvalidKey(format!(
        "missing null terminator at offset {}",
        start
    )))
}
