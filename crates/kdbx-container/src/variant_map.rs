//! VariantDictionary codec used by the KDF parameters and public custom data
//!
//! Layout: u16 version, then entries `{type:u8, key_len:u32, key, value_len:u32, value}`
//! terminated by a single `0x00` type byte. All integers are little-endian.

use crate::error::{EncodingError, Error, ParseError, Result};
use crate::wire;
use std::io::Cursor;

/// Version written on save. The high byte is the critical version.
pub const VARIANT_MAP_VERSION: u16 = 0x0100;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTES: u8 = 0x42;

/// A single typed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantValue {
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl VariantValue {
    fn type_code(&self) -> u8 {
        match self {
            VariantValue::UInt32(_) => TYPE_UINT32,
            VariantValue::UInt64(_) => TYPE_UINT64,
            VariantValue::Bool(_) => TYPE_BOOL,
            VariantValue::Int32(_) => TYPE_INT32,
            VariantValue::Int64(_) => TYPE_INT64,
            VariantValue::String(_) => TYPE_STRING,
            VariantValue::Bytes(_) => TYPE_BYTES,
        }
    }

    /// Human-readable type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            VariantValue::UInt32(_) => "u32",
            VariantValue::UInt64(_) => "u64",
            VariantValue::Bool(_) => "bool",
            VariantValue::Int32(_) => "i32",
            VariantValue::Int64(_) => "i64",
            VariantValue::String(_) => "string",
            VariantValue::Bytes(_) => "bytes",
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            VariantValue::UInt32(v) => v.to_le_bytes().to_vec(),
            VariantValue::UInt64(v) => v.to_le_bytes().to_vec(),
            VariantValue::Bool(v) => vec![u8::from(*v)],
            VariantValue::Int32(v) => v.to_le_bytes().to_vec(),
            VariantValue::Int64(v) => v.to_le_bytes().to_vec(),
            VariantValue::String(v) => v.as_bytes().to_vec(),
            VariantValue::Bytes(v) => v.clone(),
        }
    }

    fn decode(type_code: u8, value: Vec<u8>) -> Result<Self> {
        Ok(match type_code {
            TYPE_UINT32 => VariantValue::UInt32(u32::from_le_bytes(fixed(&value, "u32 value")?)),
            TYPE_UINT64 => VariantValue::UInt64(u64::from_le_bytes(fixed(&value, "u64 value")?)),
            TYPE_BOOL => {
                let [b] = fixed::<1>(&value, "bool value")?;
                VariantValue::Bool(b != 0)
            }
            TYPE_INT32 => VariantValue::Int32(i32::from_le_bytes(fixed(&value, "i32 value")?)),
            TYPE_INT64 => VariantValue::Int64(i64::from_le_bytes(fixed(&value, "i64 value")?)),
            TYPE_STRING => VariantValue::String(String::from_utf8(value).map_err(EncodingError::from)?),
            TYPE_BYTES => VariantValue::Bytes(value),
            other => return Err(ParseError::UnknownVariantType(other).into()),
        })
    }
}

fn fixed<const N: usize>(value: &[u8], field: &'static str) -> Result<[u8; N]> {
    value.try_into().map_err(|_| {
        Error::from(ParseError::InvalidFieldLength {
            field,
            expected: N,
            actual: value.len(),
        })
    })
}

/// Ordered key/value map. Insertion order is preserved on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantMap {
    version: u16,
    entries: Vec<(String, VariantValue)>,
}

impl VariantMap {
    pub fn new() -> Self {
        Self {
            version: VARIANT_MAP_VERSION,
            entries: Vec::new(),
        }
    }

    /// Version read from the input (informational only)
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&VariantValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or replaces `key`, keeping its original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: VariantValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: VariantValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariantValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.get(key) {
            None => Ok(None),
            Some(VariantValue::UInt32(v)) => Ok(Some(*v)),
            Some(_) => Err(wrong_type(key, "u32")),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(VariantValue::UInt64(v)) => Ok(Some(*v)),
            Some(_) => Err(wrong_type(key, "u64")),
        }
    }

    pub fn get_bytes(&self, key: &str) -> Result<Option<&[u8]>> {
        match self.get(key) {
            None => Ok(None),
            Some(VariantValue::Bytes(v)) => Ok(Some(v.as_slice())),
            Some(_) => Err(wrong_type(key, "bytes")),
        }
    }

    /// Decode a serialized map
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let version = wire::read_u16(&mut cursor, "variant map version")?;
        let mut entries = Vec::new();

        loop {
            let type_code = wire::read_u8(&mut cursor, "variant map entry")?;
            if type_code == TYPE_END {
                break;
            }

            let key_len = wire::read_u32(&mut cursor, "variant map key length")? as usize;
            let key = wire::read_vec(&mut cursor, key_len, "variant map key")?;
            let key = String::from_utf8(key).map_err(EncodingError::from)?;

            let value_len = wire::read_u32(&mut cursor, "variant map value length")? as usize;
            let value = wire::read_vec(&mut cursor, value_len, "variant map value")?;

            entries.push((key, VariantValue::decode(type_code, value)?));
        }

        Ok(Self { version, entries })
    }

    /// Encode with the current version and a trailing terminator
    ///
    /// Fails only when a key or value is too long for its u32 length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = VARIANT_MAP_VERSION.to_le_bytes().to_vec();
        for (key, value) in &self.entries {
            let encoded = value.encode();
            out.push(value.type_code());
            out.extend_from_slice(&wire::frame_len(key.len(), "variant map key")?.to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&wire::frame_len(encoded.len(), "variant map value")?.to_le_bytes());
            out.extend_from_slice(&encoded);
        }
        out.push(TYPE_END);
        Ok(out)
    }
}

fn wrong_type(key: &str, expected: &'static str) -> Error {
    ParseError::KdfFieldType {
        key: key.to_string(),
        expected,
    }
    .into()
}
