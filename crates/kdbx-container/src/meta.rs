//! Database-wide metadata

use crate::entry::{NOTES, PASSWORD, TITLE, URL, USERNAME};
use crate::times;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const GENERATOR: &str = "kdbx-container";

/// Which standard fields are stored as protected values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProtection {
    pub protect_title: bool,
    pub protect_username: bool,
    pub protect_password: bool,
    pub protect_url: bool,
    pub protect_notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            protect_title: false,
            protect_username: false,
            protect_password: true,
            protect_url: false,
            protect_notes: false,
        }
    }
}

impl MemoryProtection {
    /// Keys of the standard fields that must be protected
    pub fn protected_keys(&self) -> Vec<&'static str> {
        [
            (self.protect_title, TITLE),
            (self.protect_username, USERNAME),
            (self.protect_password, PASSWORD),
            (self.protect_url, URL),
            (self.protect_notes, NOTES),
        ]
        .into_iter()
        .filter_map(|(on, key)| on.then_some(key))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub generator: String,
    pub database_name: String,
    pub database_name_changed: DateTime<Utc>,
    pub database_description: String,
    pub default_username: String,
    /// `#RRGGBB`, empty when the database has no color
    pub color: String,
    pub memory_protection: MemoryProtection,
    pub recycle_bin_enabled: bool,
    /// Nil when no recycle bin group exists yet
    pub recycle_bin_uuid: Uuid,
    /// Plugin and client key/value pairs, kept in document order
    pub custom_data: Vec<(String, String)>,
}

impl Meta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            generator: GENERATOR.to_string(),
            database_name: name.into(),
            database_name_changed: times::now(),
            database_description: String::new(),
            default_username: String::new(),
            color: String::new(),
            memory_protection: MemoryProtection::default(),
            recycle_bin_enabled: true,
            recycle_bin_uuid: Uuid::nil(),
            custom_data: Vec::new(),
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            database_name: name.into(),
            database_name_changed: times::now(),
            ..self.clone()
        }
    }

    pub fn with_description(&self, description: impl Into<String>) -> Self {
        Self {
            database_description: description.into(),
            ..self.clone()
        }
    }

    pub fn with_default_username(&self, username: impl Into<String>) -> Self {
        Self {
            default_username: username.into(),
            ..self.clone()
        }
    }

    pub fn with_color(&self, color: impl Into<String>) -> Self {
        Self {
            color: color.into(),
            ..self.clone()
        }
    }

    pub fn custom_data(&self, key: &str) -> Option<&str> {
        self.custom_data
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a custom data item, replacing an existing key in place
    pub fn with_custom_data(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        let mut custom_data = self.custom_data.clone();
        match custom_data.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => custom_data.push((key, value)),
        }
        Self {
            custom_data,
            ..self.clone()
        }
    }

    pub fn without_custom_data(&self, key: &str) -> Self {
        Self {
            custom_data: self
                .custom_data
                .iter()
                .filter(|(k, _)| k != key)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::new("")
    }
}
