//! Error types for kdbx-container

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for kdbx-container operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing a container
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or truncated input, wrong signature/version, missing field
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Hash or HMAC mismatch: tampering or a wrong password
    #[error("Integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    /// Unknown or recognized-but-unimplemented algorithm
    #[error("Unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// Invalid UTF-8, base64 or similar encoding problem
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Key derivation primitive failed
    #[error("Key derivation failed: {0}")]
    Kdf(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Group not found: {0}")]
    GroupNotFound(Uuid),

    /// Protected-value offsets ran past the end of the keystream
    #[error("Protected value keystream exhausted")]
    KeystreamExhausted,

    /// IO error from the underlying reader or writer
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for header hash/HMAC and block HMAC failures
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

/// Structural problems with the container bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid KDBX signature: {sig1:#010x} {sig2:#010x}")]
    WrongSignature { sig1: u32, sig2: u32 },

    #[error("Unsupported KDBX version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Truncated {context}")]
    Truncated { context: &'static str },

    #[error("Invalid length for {field}: expected {expected}, got {actual}")]
    InvalidFieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Missing header field: {0}")]
    MissingHeaderField(&'static str),

    #[error("Missing KDF parameter: {0}")]
    MissingKdfField(&'static str),

    #[error("KDF parameter {key} has the wrong type, expected {expected}")]
    KdfFieldType { key: String, expected: &'static str },

    #[error("Invalid KDF parameter {name}: {reason}")]
    InvalidKdfParameter { name: &'static str, reason: String },

    #[error("Unknown variant map value type {0:#04x}")]
    UnknownVariantType(u8),

    #[error("Unknown inner header type {0}")]
    UnknownInnerHeaderType(u8),

    #[error("Missing inner header field: {0}")]
    MissingInnerHeaderField(&'static str),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Malformed document: {0}")]
    Document(String),

    #[error("Missing document element: {0}")]
    MissingElement(&'static str),
}

/// Authentication failures. Decryption stops at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Header hash mismatch")]
    HeaderHashMismatch,

    #[error("Header HMAC mismatch (invalid password or corrupted file)")]
    HeaderHmacMismatch,

    #[error("Block {index} HMAC verification failed, data compromised")]
    BlockHmacMismatch { index: u64 },

    #[error("Invalid cipher padding")]
    InvalidPadding,
}

/// Algorithms that are recognized but not available, or not recognized at all
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedError {
    #[error("Unknown cipher {0}")]
    UnknownCipher(Uuid),

    #[error("Unknown KDF {0}")]
    UnknownKdf(Uuid),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("Unknown inner stream cipher {0}")]
    UnknownStreamCipher(u32),

    #[error("Unsupported Argon2 version {0:#x}")]
    Argon2Version(u32),
}

/// Text and binary encoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("{field} is {len} bytes, too long for a u32 length prefix")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("XML write failed: {0}")]
    XmlWrite(String),
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Encoding(EncodingError::Utf8(err))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Encoding(EncodingError::Base64(err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
