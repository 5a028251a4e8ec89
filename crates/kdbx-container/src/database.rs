//! Database operations for KDBX4 files

use crate::config::ContainerConfig;
use crate::container::{self, Passthrough};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::meta::Meta;
use crate::variant_map::VariantMap;
use crate::xml;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use uuid::Uuid;

/// A password database: metadata, the group tree and the settings it is
/// saved with
///
/// Update methods return a new database and leave `self` untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    meta: Meta,
    root: Group,
    /// Attachments and public custom data carried through unchanged
    passthrough: Passthrough,
    config: ContainerConfig,
}

/// Metadata about the database (for display without walking the tree)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    pub description: String,
    pub entry_count: usize,
    pub group_count: usize,
}

impl Database {
    /// Create a new empty database; the root group carries the database name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: Group::new(name.clone()),
            meta: Meta::new(name),
            passthrough: Passthrough::default(),
            config: ContainerConfig::default(),
        }
    }

    /// Open a database from bytes with a password
    pub fn open(data: &[u8], password: &str) -> Result<Self> {
        Self::open_from(&mut Cursor::new(data), password)
    }

    pub fn open_from<R: Read>(reader: &mut R, password: &str) -> Result<Self> {
        let mut opened = container::decrypt(reader, password)?;
        let document = xml::read_document(&opened.document, &mut opened.stream)?;
        tracing::debug!(
            "Parsed document ({} groups, {} entries)",
            document.root.group_count(),
            document.root.all_entries().len()
        );
        Ok(Self {
            meta: document.meta,
            root: document.root,
            passthrough: Passthrough {
                public_custom_data: opened.public_custom_data,
                binaries: opened.binaries,
            },
            config: opened.config,
        })
    }

    /// Save the database to bytes, seeding from the OS random source
    pub fn save(&self, password: &str) -> Result<Vec<u8>> {
        self.save_with_rng(password, &mut OsRng)
    }

    pub fn save_with_rng<R: RngCore + CryptoRng>(&self, password: &str, rng: &mut R) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.save_to(&mut out, password, rng)?;
        Ok(out)
    }

    /// Write the database to `writer`. Nothing is written if serialization fails.
    pub fn save_to<W, R>(&self, writer: &mut W, password: &str, rng: &mut R) -> Result<()>
    where
        W: Write,
        R: RngCore + CryptoRng,
    {
        container::encrypt(writer, password, &self.config, &self.passthrough, rng, |stream| {
            xml::write_document(&self.meta, &self.root, stream)
        })
    }

    pub fn with_config(&self, config: ContainerConfig) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    pub fn with_meta(&self, meta: Meta) -> Self {
        Self {
            meta,
            ..self.clone()
        }
    }

    /// Add or replace an entry in the group `group_uuid`
    ///
    /// Standard fields are protected according to the memory protection
    /// settings in [`Meta`].
    pub fn with_entry(&self, group_uuid: &Uuid, entry: Entry) -> Result<Self> {
        let keys = self.meta.memory_protection.protected_keys();
        let entry = entry.protecting(&keys);
        let root = self
            .root
            .updating(group_uuid, |group| group.with_entry(entry))
            .ok_or(Error::GroupNotFound(*group_uuid))?;
        Ok(Self {
            root,
            ..self.clone()
        })
    }

    pub fn without_entry(&self, uuid: &Uuid) -> Result<Self> {
        let root = self
            .root
            .without_entry(uuid)
            .ok_or(Error::EntryNotFound(*uuid))?;
        Ok(Self {
            root,
            ..self.clone()
        })
    }

    /// Add or replace a subgroup of `parent_uuid`
    pub fn with_group(&self, parent_uuid: &Uuid, group: Group) -> Result<Self> {
        let root = self
            .root
            .updating(parent_uuid, |parent| parent.with_group(group))
            .ok_or(Error::GroupNotFound(*parent_uuid))?;
        Ok(Self {
            root,
            ..self.clone()
        })
    }

    pub fn name(&self) -> &str {
        &self.meta.database_name
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Attachment blobs from the inner header, in file order
    pub fn binaries(&self) -> &[Vec<u8>] {
        &self.passthrough.binaries
    }

    pub fn public_custom_data(&self) -> Option<&VariantMap> {
        self.passthrough.public_custom_data.as_ref()
    }

    /// Get database metadata
    pub fn metadata(&self) -> DatabaseMetadata {
        DatabaseMetadata {
            name: self.meta.database_name.clone(),
            description: self.meta.database_description.clone(),
            entry_count: self.root.all_entries().len(),
            group_count: self.root.group_count(),
        }
    }

    /// All entries, depth-first in document order
    pub fn entries(&self) -> Vec<&Entry> {
        self.root.all_entries()
    }

    pub fn find_entry(&self, uuid: &Uuid) -> Option<&Entry> {
        self.root.find_entry(uuid)
    }

    pub fn find_group(&self, uuid: &Uuid) -> Option<&Group> {
        self.root.find_group(uuid)
    }

    /// Search entries by query
    pub fn search(&self, query: &str) -> Vec<&Entry> {
        let query_lower = query.to_lowercase();
        self.root
            .all_entries()
            .into_iter()
            .filter(|entry| entry.matches(&query_lower))
            .collect()
    }
}
