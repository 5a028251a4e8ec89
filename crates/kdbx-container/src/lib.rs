//! kdbx-container - KDBX4 encrypted password-database container
//!
//! Reads and writes the KDBX4 file format: an authenticated outer header,
//! a password-derived key schedule (Argon2d, Argon2id or AES-KDF), an
//! HMAC-chained block stream around an AES-CBC body, and an inner header
//! whose stream key protects individual values in the XML document.
//!
//! [`Database`] is the high-level entry point. The lower layers are public
//! so callers can drive the container with their own document format.

pub mod block;
pub mod body;
pub mod config;
pub mod container;
mod database;
mod entry;
mod error;
mod group;
pub mod header;
pub mod inner_header;
pub mod kdf;
mod meta;
pub mod protected;
pub mod times;
pub mod variant_map;
mod wire;
pub mod xml;

pub use body::CipherKind;
pub use config::{ContainerConfig, KdfAlgorithm, KdfConfig};
pub use database::{Database, DatabaseMetadata};
pub use entry::{Entry, EntryBuilder, SecureString, Value};
pub use error::{EncodingError, Error, IntegrityError, ParseError, Result, UnsupportedError};
pub use group::{Group, GroupBuilder};
pub use meta::{MemoryProtection, Meta};
pub use protected::ProtectedStream;
pub use times::Times;

// Re-export types that users might need
pub use uuid::Uuid;
