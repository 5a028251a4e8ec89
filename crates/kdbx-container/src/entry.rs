//! Entry types and operations

use crate::times::Times;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const TITLE: &str = "Title";
pub const USERNAME: &str = "UserName";
pub const PASSWORD: &str = "Password";
pub const URL: &str = "URL";
pub const NOTES: &str = "Notes";

/// A secure string that is zeroed on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString(***)")
    }
}

/// A string field value. Protected values go through the stream cipher on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unprotected(String),
    Protected(SecureString),
}

impl Value {
    pub fn protected(s: impl Into<String>) -> Self {
        Value::Protected(SecureString::new(s))
    }

    pub fn unprotected(s: impl Into<String>) -> Self {
        Value::Unprotected(s.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Value::Unprotected(s) => s,
            Value::Protected(s) => s.as_str(),
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, Value::Protected(_))
    }

    /// Same text, protected
    pub fn into_protected(self) -> Self {
        match self {
            Value::Unprotected(s) => Value::Protected(SecureString::new(s)),
            protected => protected,
        }
    }
}

/// A password entry
///
/// Update methods return a new entry with `times.last_modification` bumped;
/// the original is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub uuid: Uuid,
    pub icon_id: u32,
    pub times: Times,
    pub tags: Vec<String>,
    /// String fields in document order
    fields: Vec<(String, Value)>,
    /// Previous versions, oldest first
    pub history: Vec<Entry>,
}

impl Entry {
    pub fn new() -> Self {
        Self::with_uuid(Uuid::new_v4())
    }

    /// Empty entry with a specific UUID (used when loading)
    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            icon_id: 0,
            times: Times::now(),
            tags: Vec::new(),
            fields: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.value(key).map(Value::as_str)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn title(&self) -> Option<&str> {
        self.get(TITLE)
    }

    pub fn username(&self) -> Option<&str> {
        self.get(USERNAME)
    }

    pub fn password(&self) -> Option<&str> {
        self.get(PASSWORD)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(URL)
    }

    pub fn notes(&self) -> Option<&str> {
        self.get(NOTES)
    }

    /// Set or replace a field, keeping its position when it already exists
    pub fn with_field(&self, key: impl Into<String>, value: Value) -> Self {
        let mut entry = self.clone();
        entry.set_field(key.into(), value);
        entry.times = self.times.modified();
        entry
    }

    pub fn without_field(&self, key: &str) -> Self {
        let mut entry = self.clone();
        entry.fields.retain(|(k, _)| k != key);
        entry.times = self.times.modified();
        entry
    }

    pub fn with_title(&self, title: impl Into<String>) -> Self {
        self.with_field(TITLE, Value::unprotected(title))
    }

    pub fn with_username(&self, username: impl Into<String>) -> Self {
        self.with_field(USERNAME, Value::unprotected(username))
    }

    pub fn with_password(&self, password: impl Into<String>) -> Self {
        self.with_field(PASSWORD, Value::protected(password))
    }

    pub fn with_url(&self, url: impl Into<String>) -> Self {
        self.with_field(URL, Value::unprotected(url))
    }

    pub fn with_notes(&self, notes: impl Into<String>) -> Self {
        self.with_field(NOTES, Value::unprotected(notes))
    }

    pub fn with_tags(&self, tags: Vec<String>) -> Self {
        let mut entry = self.clone();
        entry.tags = tags;
        entry.times = self.times.modified();
        entry
    }

    /// Same entry with the current version pushed onto its history
    pub fn with_snapshot(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.history.clear();
        let mut entry = self.clone();
        entry.history.push(snapshot);
        entry
    }

    /// Promote the named fields to protected values
    pub fn protecting(&self, keys: &[&str]) -> Self {
        let mut entry = self.clone();
        for (key, value) in entry.fields.iter_mut() {
            if keys.contains(&key.as_str()) && !value.is_protected() {
                *value = value.clone().into_protected();
            }
        }
        entry
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.times.is_expired(at)
    }

    /// Case-insensitive match on title, username, URL, notes and tags
    pub fn matches(&self, query_lower: &str) -> bool {
        [TITLE, USERNAME, URL, NOTES]
            .iter()
            .filter_map(|key| self.get(key))
            .any(|v| v.to_lowercase().contains(query_lower))
            || self
                .tags
                .iter()
                .any(|t| t.to_lowercase().contains(query_lower))
    }

    pub(crate) fn set_field(&mut self, key: String, value: Value) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating entries
pub struct EntryBuilder {
    entry: Entry,
}

impl EntryBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        let mut entry = Entry::new();
        entry.set_field(TITLE.to_string(), Value::unprotected(title));
        Self { entry }
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.entry.uuid = uuid;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.entry.set_field(USERNAME.to_string(), Value::unprotected(username));
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.entry.set_field(PASSWORD.to_string(), Value::protected(password));
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.entry.set_field(URL.to_string(), Value::unprotected(url));
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.entry.set_field(NOTES.to_string(), Value::unprotected(notes));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entry.set_field(key.into(), value);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.entry.tags.push(tag.into());
        self
    }

    pub fn icon_id(mut self, icon_id: u32) -> Self {
        self.entry.icon_id = icon_id;
        self
    }

    pub fn times(mut self, times: Times) -> Self {
        self.entry.times = times;
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.entry.times.expiry = expires;
        self.entry.times.expires = true;
        self
    }

    pub fn build(self) -> Entry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = Entry::new();
        assert!(entry.title().is_none());
        assert!(entry.password().is_none());
        assert_eq!(entry.times.creation, entry.times.last_modification);
    }

    #[test]
    fn test_entry_builder() {
        let entry = EntryBuilder::new("GitHub")
            .username("user@example.com")
            .password("secret123")
            .url("https://github.com")
            .notes("My GitHub account")
            .tag("work")
            .tag("dev")
            .field("2FA", Value::unprotected("enabled"))
            .build();

        assert_eq!(entry.title(), Some("GitHub"));
        assert_eq!(entry.username(), Some("user@example.com"));
        assert_eq!(entry.password(), Some("secret123"));
        assert!(entry.value(PASSWORD).unwrap().is_protected());
        assert_eq!(entry.url(), Some("https://github.com"));
        assert_eq!(entry.tags, vec!["work", "dev"]);
        assert_eq!(entry.get("2FA"), Some("enabled"));
        let keys: Vec<&str> = entry.fields().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Title", "UserName", "Password", "URL", "Notes", "2FA"]);
    }

    #[test]
    fn test_updates_leave_original_untouched() {
        let mut original = EntryBuilder::new("Mail").build();
        original.times.last_modification = original.times.creation - chrono::Duration::days(1);

        let updated = original.with_username("me").with_title("Mail 2");
        assert_eq!(original.username(), None);
        assert_eq!(original.title(), Some("Mail"));
        assert_eq!(updated.username(), Some("me"));
        assert_eq!(updated.title(), Some("Mail 2"));
        assert!(updated.times.last_modification > original.times.last_modification);
        assert_eq!(updated.uuid, original.uuid);
        // replaced in place
        assert_eq!(updated.fields().next().map(|(k, _)| k), Some("Title"));
    }

    #[test]
    fn test_without_field() {
        let entry = EntryBuilder::new("x").url("https://x").build();
        let stripped = entry.without_field(URL);
        assert!(stripped.url().is_none());
        assert!(entry.url().is_some());
    }

    #[test]
    fn test_protecting() {
        let entry = EntryBuilder::new("x").username("u").build().protecting(&[USERNAME]);
        assert!(entry.value(USERNAME).unwrap().is_protected());
        assert!(!entry.value(TITLE).unwrap().is_protected());
    }

    #[test]
    fn test_snapshot() {
        let entry = EntryBuilder::new("v1").build();
        let next = entry.with_snapshot().with_title("v2");
        assert_eq!(next.history.len(), 1);
        assert_eq!(next.history[0].title(), Some("v1"));
        assert_eq!(next.title(), Some("v2"));
    }

    #[test]
    fn test_entry_expiry() {
        let now = crate::times::now();
        let entry = Entry::new();
        assert!(!entry.is_expired(now));

        let expired = EntryBuilder::new("Test")
            .expires(now - chrono::Duration::hours(1))
            .build();
        assert!(expired.is_expired(now));

        let later = EntryBuilder::new("Test")
            .expires(now + chrono::Duration::hours(1))
            .build();
        assert!(!later.is_expired(now));
    }

    #[test]
    fn test_secure_string_is_redacted() {
        let value = Value::protected("hunter2");
        assert!(!format!("{:?}", value).contains("hunter2"));
    }
}
