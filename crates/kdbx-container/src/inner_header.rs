//! Inner header codec
//!
//! Sits at the start of the decrypted payload and carries the protected
//! value stream cipher settings plus any attachments. The XML document
//! follows directly after the terminator.

use crate::error::{ParseError, Result, UnsupportedError};
use crate::wire;
use rand::{CryptoRng, RngCore};
use std::io::Cursor;
use zeroize::Zeroizing;

/// Length of generated stream keys
pub const STREAM_KEY_LEN: usize = 64;

const TYPE_END: u8 = 0;
const TYPE_STREAM_CIPHER_ID: u8 = 1;
const TYPE_STREAM_KEY: u8 = 2;
const TYPE_BINARY: u8 = 3;

/// Stream cipher used for protected values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCipherKind {
    Salsa20,
    ChaCha20,
}

impl StreamCipherKind {
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            2 => Ok(StreamCipherKind::Salsa20),
            3 => Ok(StreamCipherKind::ChaCha20),
            other => Err(UnsupportedError::UnknownStreamCipher(other).into()),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            StreamCipherKind::Salsa20 => 2,
            StreamCipherKind::ChaCha20 => 3,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct InnerHeader {
    pub stream_cipher: StreamCipherKind,
    stream_key: Zeroizing<Vec<u8>>,
    /// Attachment fields, kept opaque and in file order
    pub binaries: Vec<Vec<u8>>,
}

impl InnerHeader {
    pub fn new(stream_cipher: StreamCipherKind, stream_key: Vec<u8>, binaries: Vec<Vec<u8>>) -> Self {
        Self {
            stream_cipher,
            stream_key: Zeroizing::new(stream_key),
            binaries,
        }
    }

    /// ChaCha20 with a fresh random 64-byte key
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, binaries: Vec<Vec<u8>>) -> Self {
        let mut stream_key = vec![0u8; STREAM_KEY_LEN];
        rng.fill_bytes(&mut stream_key);
        Self::new(StreamCipherKind::ChaCha20, stream_key, binaries)
    }

    pub fn stream_key(&self) -> &[u8] {
        &self.stream_key
    }

    /// Parse the inner header, returning it with the document bytes that follow
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut cursor = Cursor::new(data);
        let mut stream_cipher = None;
        let mut stream_key = None;
        let mut binaries = Vec::new();

        loop {
            let field_type = wire::read_u8(&mut cursor, "inner header field type")?;
            if field_type == TYPE_END {
                break;
            }

            let len = wire::read_u32(&mut cursor, "inner header field length")? as usize;
            let value = wire::read_vec(&mut cursor, len, "inner header field value")?;
            match field_type {
                TYPE_STREAM_CIPHER_ID => {
                    let id: [u8; 4] =
                        value
                            .as_slice()
                            .try_into()
                            .map_err(|_| ParseError::InvalidFieldLength {
                                field: "stream cipher ID",
                                expected: 4,
                                actual: value.len(),
                            })?;
                    stream_cipher = Some(StreamCipherKind::from_id(u32::from_le_bytes(id))?);
                }
                TYPE_STREAM_KEY => stream_key = Some(Zeroizing::new(value)),
                TYPE_BINARY => binaries.push(value),
                other => return Err(ParseError::UnknownInnerHeaderType(other).into()),
            }
        }

        let header = Self {
            stream_cipher: stream_cipher
                .ok_or(ParseError::MissingInnerHeaderField("stream cipher ID"))?,
            stream_key: stream_key.ok_or(ParseError::MissingInnerHeaderField("stream key"))?,
            binaries,
        };
        let rest = &data[cursor.position() as usize..];
        tracing::debug!(
            "Parsed inner header: stream cipher {:?}, {} binaries",
            header.stream_cipher,
            header.binaries.len()
        );
        Ok((header, rest))
    }

    /// Serialize, ending with a bare terminator byte
    ///
    /// Fails only when an attachment is too long for its u32 length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        push_field(&mut out, TYPE_STREAM_CIPHER_ID, &self.stream_cipher.id().to_le_bytes())?;
        push_field(&mut out, TYPE_STREAM_KEY, &self.stream_key)?;
        for binary in &self.binaries {
            push_field(&mut out, TYPE_BINARY, binary)?;
        }
        out.push(TYPE_END);
        Ok(out)
    }
}

fn push_field(out: &mut Vec<u8>, field_type: u8, value: &[u8]) -> Result<()> {
    let len = wire::frame_len(value.len(), "inner header field")?;
    out.push(field_type);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value);
    Ok(())
}

impl std::fmt::Debug for InnerHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerHeader")
            .field("stream_cipher", &self.stream_cipher)
            .field("stream_key", &"***")
            .field("binaries", &self.binaries.len())
            .finish()
    }
}
