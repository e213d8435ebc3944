//! Bencode codec
//!
//! This module provides a bencode decoder and canonical encoder. The
//! decoder reports the byte offset of every rejection; the encoder
//! always emits dict keys in sorted byte order, which is what the
//! info-hash derivation in `metainfo` relies on.
//!
//! Bencode format:
//! - Integers:   `i<number>e`        Example: `i42e`
//! - Strings:    `<length>:<data>`   Example: `4:spam`
//! - Lists:      `l<items>e`         Example: `l4:spami42ee`
//! - Dicts:      `d<pairs>e`         Example: `d3:cow3:moo4:spam4:eggse`

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, ParseErrorKind, Result};

/// Maximum allowed length for a bencode string (100 MiB)
/// This prevents malicious torrents from causing memory exhaustion
const MAX_STRING_LENGTH: usize = 100 * 1024 * 1024;

/// Maximum nesting depth for lists and dicts
const MAX_DEPTH: usize = 1000;

/// A bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Integer value (can be negative)
    Integer(i64),
    /// Byte string (not necessarily valid UTF-8)
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<BencodeValue>),
    /// Dictionary with byte string keys
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl fmt::Debug for BencodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "Integer({})", n),
            Self::Bytes(b) => {
                // Try to display as UTF-8 if valid, otherwise show length
                if let Ok(s) = std::str::from_utf8(b) {
                    if s.len() <= 50 {
                        write!(f, "Bytes(\"{}\")", s)
                    } else {
                        write!(f, "Bytes(\"{}...\" [{} bytes])", &s[..50], b.len())
                    }
                } else {
                    write!(f, "Bytes([{} bytes])", b.len())
                }
            }
            Self::List(l) => f.debug_tuple("List").field(l).finish(),
            Self::Dict(d) => {
                let readable: BTreeMap<String, &BencodeValue> = d
                    .iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).to_string(), v))
                    .collect();
                f.debug_tuple("Dict").field(&readable).finish()
            }
        }
    }
}

/// Cursor over the input, tracking the absolute byte offset for errors
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn err(&self, kind: ParseErrorKind) -> EngineError {
        EngineError::parse(kind, self.pos)
    }

    fn parse_value(&mut self, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(self.err(ParseErrorKind::DepthExceeded));
        }
        match self.peek() {
            None => Err(self.err(ParseErrorKind::UnexpectedEof)),
            Some(b'i') => self.parse_integer(),
            Some(b'l') => self.parse_list(depth),
            Some(b'd') => self.parse_dict(depth),
            Some(b'0'..=b'9') => Ok(BencodeValue::Bytes(self.parse_bytes()?)),
            Some(_) => Err(self.err(ParseErrorKind::InvalidMarker)),
        }
    }

    /// Parse an integer: i<number>e
    fn parse_integer(&mut self) -> Result<BencodeValue> {
        let start = self.pos;
        self.pos += 1; // skip 'i'

        let end = self.data[self.pos..]
            .iter()
            .position(|&c| c == b'e')
            .ok_or(EngineError::parse(ParseErrorKind::Unterminated, start))?;

        let num_str = std::str::from_utf8(&self.data[self.pos..self.pos + end])
            .map_err(|_| EngineError::parse(ParseErrorKind::BadInteger, start))?;

        // Reject empty payloads, leading zeros (except "0"), and negative zero
        let digits = num_str.strip_prefix('-').unwrap_or(num_str);
        if digits.is_empty()
            || (digits.len() > 1 && digits.starts_with('0'))
            || num_str == "-0"
        {
            return Err(EngineError::parse(ParseErrorKind::BadInteger, start));
        }

        let value = num_str
            .parse::<i64>()
            .map_err(|_| EngineError::parse(ParseErrorKind::BadInteger, start))?;

        self.pos += end + 1; // skip digits and 'e'
        Ok(BencodeValue::Integer(value))
    }

    /// Parse a byte string: <length>:<data>
    fn parse_bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        let colon = self.data[self.pos..]
            .iter()
            .position(|&c| c == b':')
            .ok_or(EngineError::parse(ParseErrorKind::BadLengthPrefix, start))?;

        let len_str = std::str::from_utf8(&self.data[self.pos..self.pos + colon])
            .map_err(|_| EngineError::parse(ParseErrorKind::BadLengthPrefix, start))?;
        if len_str.is_empty() || !len_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EngineError::parse(ParseErrorKind::BadLengthPrefix, start));
        }

        let len = len_str
            .parse::<usize>()
            .map_err(|_| EngineError::parse(ParseErrorKind::BadLengthPrefix, start))?;
        if len > MAX_STRING_LENGTH {
            return Err(EngineError::parse(ParseErrorKind::BadLengthPrefix, start));
        }

        let data_start = self.pos + colon + 1;
        let data_end = data_start + len;
        if data_end > self.data.len() {
            return Err(EngineError::parse(ParseErrorKind::UnexpectedEof, start));
        }

        self.pos = data_end;
        Ok(self.data[data_start..data_end].to_vec())
    }

    /// Parse a list: l<items>e
    fn parse_list(&mut self, depth: usize) -> Result<BencodeValue> {
        let start = self.pos;
        self.pos += 1; // skip 'l'

        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(EngineError::parse(ParseErrorKind::Unterminated, start)),
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(BencodeValue::List(items));
                }
                Some(_) => items.push(self.parse_value(depth + 1)?),
            }
        }
    }

    /// Parse a dictionary: d<pairs>e
    ///
    /// Keys may arrive in any order (the wild contains encoders that do
    /// not sort); the BTreeMap normalizes them. Duplicate keys keep the
    /// last occurrence.
    fn parse_dict(&mut self, depth: usize) -> Result<BencodeValue> {
        let start = self.pos;
        self.pos += 1; // skip 'd'

        let mut items = BTreeMap::new();
        loop {
            match self.peek() {
                None => return Err(EngineError::parse(ParseErrorKind::Unterminated, start)),
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(BencodeValue::Dict(items));
                }
                Some(b'0'..=b'9') => {
                    let key = self.parse_bytes()?;
                    let value = self.parse_value(depth + 1)?;
                    items.insert(key, value);
                }
                Some(_) => return Err(self.err(ParseErrorKind::NonStringKey)),
            }
        }
    }
}

impl BencodeValue {
    /// Decode a complete bencode value, rejecting trailing data
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let value = decoder.parse_value(0)?;
        if decoder.pos != data.len() {
            return Err(EngineError::parse(
                ParseErrorKind::TrailingData,
                decoder.pos,
            ));
        }
        Ok(value)
    }

    /// Encode to bencode bytes in canonical form (sorted dict keys)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    /// Encode to an existing buffer
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Integer(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::Bytes(b) => {
                buf.extend_from_slice(b.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(b);
            }
            Self::List(l) => {
                buf.push(b'l');
                for item in l {
                    item.encode_to(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(d) => {
                buf.push(b'd');
                for (k, v) in d {
                    buf.extend_from_slice(k.len().to_string().as_bytes());
                    buf.push(b':');
                    buf.extend_from_slice(k);
                    v.encode_to(buf);
                }
                buf.push(b'e');
            }
        }
    }

    // Accessor methods

    /// Get as string (UTF-8)
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as unsigned integer
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Integer(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get as dict
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Get dict value by key
    pub fn get(&self, key: &str) -> Option<&BencodeValue> {
        match self {
            Self::Dict(d) => d.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Check if this is a dict
    pub fn is_dict(&self) -> bool {
        matches!(self, Self::Dict(_))
    }
}
