//! KeePass XML document reading and writing
//!
//! Reading builds a small element tree first. Protected values are
//! decrypted as their closing tag is seen, which is exactly document order,
//! so values inside elements this crate does not model still advance the
//! keystream. Writing walks the model in the same order it is read back.

use crate::entry::{Entry, SecureString, Value};
use crate::error::{EncodingError, Error, ParseError, Result};
use crate::group::Group;
use crate::meta::{MemoryProtection, Meta};
use crate::protected::{self, ProtectedStream};
use crate::times::{self, Times};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;
use xml::common::XmlVersion;
use xml::reader::{ParserConfig, XmlEvent as ReadEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriteEvent};
use zeroize::Zeroizing;

/// Parsed document: metadata plus the root group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub meta: Meta,
    pub root: Group,
}

struct Node {
    name: String,
    protected: bool,
    text: Zeroizing<String>,
    children: Vec<Node>,
}

impl Node {
    fn new(name: String, protected: bool) -> Self {
        Self {
            name,
            protected,
            text: Zeroizing::new(String::new()),
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

/// Parse document bytes, decrypting protected values through `stream`
pub fn read_document(data: &[u8], stream: &mut ProtectedStream) -> Result<Document> {
    let root = read_tree(data, stream)?;
    if root.name != "KeePassFile" {
        return Err(ParseError::Document(format!("unexpected root element <{}>", root.name)).into());
    }
    let meta = parse_meta(root.child("Meta").ok_or(ParseError::MissingElement("Meta"))?)?;
    let group = root
        .child("Root")
        .ok_or(ParseError::MissingElement("Root"))?
        .child("Group")
        .ok_or(ParseError::MissingElement("Root/Group"))?;
    Ok(Document {
        meta,
        root: parse_group(group)?,
    })
}

fn read_tree(data: &[u8], stream: &mut ProtectedStream) -> Result<Node> {
    let reader = ParserConfig::new().create_reader(data);
    let mut stack: Vec<Node> = Vec::new();
    let mut root = None;

    for event in reader {
        match event.map_err(|e| ParseError::Document(e.to_string()))? {
            ReadEvent::StartElement {
                name, attributes, ..
            } => {
                let protected = attributes.iter().any(|a| {
                    a.name.local_name == "Protected" && a.value.eq_ignore_ascii_case("true")
                });
                stack.push(Node::new(name.local_name, protected));
            }
            ReadEvent::Characters(text) | ReadEvent::Whitespace(text) | ReadEvent::CData(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            ReadEvent::EndElement { .. } => {
                let mut node = stack
                    .pop()
                    .ok_or_else(|| ParseError::Document("unbalanced end tag".to_string()))?;
                if node.protected {
                    let key = stack
                        .last()
                        .and_then(|parent| parent.text_of("Key"))
                        .unwrap_or(&node.name)
                        .to_string();
                    node.text = Zeroizing::new(stream.decode_value(&key, &node.text, true)?);
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            _ => {}
        }
    }

    root.ok_or_else(|| ParseError::Document("empty document".to_string()).into())
}

fn parse_bool(text: &str) -> Result<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if text.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(ParseError::Document(format!("invalid boolean {:?}", text)).into())
    }
}

fn parse_number<T: FromStr>(text: &str, field: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| ParseError::Document(format!("invalid {} {:?}", field, text)).into())
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    let bytes = BASE64.decode(text.trim())?;
    Uuid::from_slice(&bytes).map_err(|_| EncodingError::InvalidUuid(text.to_string()).into())
}

fn encode_uuid(uuid: &Uuid) -> String {
    BASE64.encode(uuid.as_bytes())
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn parse_meta(node: &Node) -> Result<Meta> {
    let mut meta = Meta::new(node.text_of("DatabaseName").unwrap_or_default());
    if let Some(generator) = node.text_of("Generator") {
        meta.generator = generator.to_string();
    }
    if let Some(changed) = node.text_of("DatabaseNameChanged") {
        meta.database_name_changed = times::decode(changed)?;
    }
    meta.database_description = node.text_of("DatabaseDescription").unwrap_or_default().to_string();
    meta.default_username = node.text_of("DefaultUserName").unwrap_or_default().to_string();
    meta.color = node.text_of("Color").unwrap_or_default().trim().to_string();
    if let Some(mp) = node.child("MemoryProtection") {
        let flag = |name: &str, default: bool| -> Result<bool> {
            mp.text_of(name).map(parse_bool).unwrap_or(Ok(default))
        };
        let defaults = MemoryProtection::default();
        meta.memory_protection = MemoryProtection {
            protect_title: flag("ProtectTitle", defaults.protect_title)?,
            protect_username: flag("ProtectUserName", defaults.protect_username)?,
            protect_password: flag("ProtectPassword", defaults.protect_password)?,
            protect_url: flag("ProtectURL", defaults.protect_url)?,
            protect_notes: flag("ProtectNotes", defaults.protect_notes)?,
        };
    }
    if let Some(enabled) = node.text_of("RecycleBinEnabled") {
        meta.recycle_bin_enabled = parse_bool(enabled)?;
    }
    if let Some(uuid) = node.text_of("RecycleBinUUID") {
        meta.recycle_bin_uuid = parse_uuid(uuid)?;
    }
    if let Some(custom) = node.child("CustomData") {
        for item in custom.children_named("Item") {
            let key = item
                .text_of("Key")
                .ok_or(ParseError::MissingElement("CustomData/Item/Key"))?;
            let value = item.text_of("Value").unwrap_or_default();
            meta.custom_data.push((key.to_string(), value.to_string()));
        }
    }
    Ok(meta)
}

fn parse_times(node: Option<&Node>) -> Result<Times> {
    let mut times = Times::now();
    let Some(node) = node else {
        return Ok(times);
    };
    for (name, slot) in [
        ("CreationTime", &mut times.creation),
        ("LastModificationTime", &mut times.last_modification),
        ("LastAccessTime", &mut times.last_access),
        ("ExpiryTime", &mut times.expiry),
        ("LocationChanged", &mut times.location_changed),
    ] {
        if let Some(text) = node.text_of(name) {
            *slot = times::decode(text)?;
        }
    }
    if let Some(expires) = node.text_of("Expires") {
        times.expires = parse_bool(expires)?;
    }
    if let Some(count) = node.text_of("UsageCount") {
        times.usage_count = parse_number(count, "usage count")?;
    }
    Ok(times)
}

fn parse_entry(node: &Node) -> Result<Entry> {
    let uuid = parse_uuid(node.text_of("UUID").ok_or(ParseError::MissingElement("Entry/UUID"))?)?;
    let mut entry = Entry::with_uuid(uuid);
    if let Some(icon) = node.text_of("IconID") {
        entry.icon_id = parse_number(icon, "icon ID")?;
    }
    entry.times = parse_times(node.child("Times"))?;

    // KeePass separates tags with semicolons, some writers use commas
    if let Some(tags) = node.text_of("Tags") {
        let separator = if tags.contains(';') { ';' } else { ',' };
        entry.tags = tags
            .split(separator)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    for field in node.children_named("String") {
        let key = field.text_of("Key").ok_or(ParseError::MissingElement("String/Key"))?;
        let value = match field.child("Value") {
            Some(v) if v.protected => Value::Protected(SecureString::new(v.text.as_str())),
            Some(v) => Value::Unprotected(protected::decode_unprotected(key, &v.text)?),
            None => Value::Unprotected(String::new()),
        };
        entry.set_field(key.to_string(), value);
    }

    if let Some(history) = node.child("History") {
        entry.history = history
            .children_named("Entry")
            .map(parse_entry)
            .collect::<Result<_>>()?;
    }
    Ok(entry)
}

fn parse_group(node: &Node) -> Result<Group> {
    let uuid = parse_uuid(node.text_of("UUID").ok_or(ParseError::MissingElement("Group/UUID"))?)?;
    let mut group = Group::with_uuid(uuid, node.text_of("Name").unwrap_or_default());
    group.notes = node.text_of("Notes").unwrap_or_default().to_string();
    if let Some(icon) = node.text_of("IconID") {
        group.icon_id = parse_number(icon, "icon ID")?;
    }
    group.times = parse_times(node.child("Times"))?;
    if let Some(expanded) = node.text_of("IsExpanded") {
        group.is_expanded = parse_bool(expanded)?;
    }
    group.entries = node
        .children_named("Entry")
        .map(parse_entry)
        .collect::<Result<_>>()?;
    group.groups = node
        .children_named("Group")
        .map(parse_group)
        .collect::<Result<_>>()?;
    Ok(group)
}

/// Serialize a document, encrypting protected values through `stream`
pub fn write_document(meta: &Meta, root: &Group, stream: &mut ProtectedStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut writer = DocumentWriter {
        events: EmitterConfig::new()
            .perform_indent(true)
            .create_writer(&mut out),
        stream,
    };
    writer.emit(WriteEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: Some(true),
    })?;
    writer.start("KeePassFile")?;
    writer.meta(meta)?;
    writer.start("Root")?;
    writer.group(root)?;
    writer.start("DeletedObjects")?;
    writer.end()?;
    writer.end()?;
    writer.end()?;
    drop(writer);
    Ok(out)
}

struct DocumentWriter<'a, W: Write> {
    events: EventWriter<W>,
    stream: &'a mut ProtectedStream,
}

impl<W: Write> DocumentWriter<'_, W> {
    fn emit<'e>(&mut self, event: impl Into<WriteEvent<'e>>) -> Result<()> {
        self.events
            .write(event)
            .map_err(|e| Error::from(EncodingError::XmlWrite(e.to_string())))
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.emit(WriteEvent::start_element(name))
    }

    fn end(&mut self) -> Result<()> {
        self.emit(WriteEvent::end_element())
    }

    fn leaf(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(name)?;
        if !text.is_empty() {
            self.emit(WriteEvent::characters(text))?;
        }
        self.end()
    }

    fn meta(&mut self, meta: &Meta) -> Result<()> {
        self.start("Meta")?;
        self.leaf("Generator", &meta.generator)?;
        self.leaf("DatabaseName", &meta.database_name)?;
        self.leaf("DatabaseNameChanged", &times::encode(&meta.database_name_changed))?;
        self.leaf("DatabaseDescription", &meta.database_description)?;
        self.leaf("DefaultUserName", &meta.default_username)?;
        self.leaf("Color", &meta.color)?;
        let mp = &meta.memory_protection;
        self.start("MemoryProtection")?;
        self.leaf("ProtectTitle", bool_text(mp.protect_title))?;
        self.leaf("ProtectUserName", bool_text(mp.protect_username))?;
        self.leaf("ProtectPassword", bool_text(mp.protect_password))?;
        self.leaf("ProtectURL", bool_text(mp.protect_url))?;
        self.leaf("ProtectNotes", bool_text(mp.protect_notes))?;
        self.end()?;
        self.leaf("RecycleBinEnabled", bool_text(meta.recycle_bin_enabled))?;
        self.leaf("RecycleBinUUID", &encode_uuid(&meta.recycle_bin_uuid))?;
        self.start("CustomData")?;
        for (key, value) in &meta.custom_data {
            self.start("Item")?;
            self.leaf("Key", key)?;
            self.leaf("Value", value)?;
            self.end()?;
        }
        self.end()?;
        self.end()
    }

    fn times(&mut self, times: &Times) -> Result<()> {
        self.start("Times")?;
        self.leaf("CreationTime", &times::encode(&times.creation))?;
        self.leaf("LastModificationTime", &times::encode(&times.last_modification))?;
        self.leaf("LastAccessTime", &times::encode(&times.last_access))?;
        self.leaf("ExpiryTime", &times::encode(&times.expiry))?;
        self.leaf("Expires", bool_text(times.expires))?;
        self.leaf("UsageCount", &times.usage_count.to_string())?;
        self.leaf("LocationChanged", &times::encode(&times.location_changed))?;
        self.end()
    }

    fn group(&mut self, group: &Group) -> Result<()> {
        self.start("Group")?;
        self.leaf("UUID", &encode_uuid(&group.uuid))?;
        self.leaf("Name", &group.name)?;
        self.leaf("Notes", &group.notes)?;
        self.leaf("IconID", &group.icon_id.to_string())?;
        self.times(&group.times)?;
        self.leaf("IsExpanded", bool_text(group.is_expanded))?;
        for entry in &group.entries {
            self.entry(entry)?;
        }
        for child in &group.groups {
            self.group(child)?;
        }
        self.end()
    }

    fn entry(&mut self, entry: &Entry) -> Result<()> {
        self.start("Entry")?;
        self.leaf("UUID", &encode_uuid(&entry.uuid))?;
        self.leaf("IconID", &entry.icon_id.to_string())?;
        self.leaf("Tags", &entry.tags.join(";"))?;
        self.times(&entry.times)?;
        for (key, value) in entry.fields() {
            self.start("String")?;
            self.leaf("Key", key)?;
            self.value(key, value)?;
            self.end()?;
        }
        if !entry.history.is_empty() {
            self.start("History")?;
            for old in &entry.history {
                self.entry(old)?;
            }
            self.end()?;
        }
        self.end()
    }

    fn value(&mut self, key: &str, value: &Value) -> Result<()> {
        match value {
            Value::Protected(secret) => {
                let wire = self.stream.encode_value(key, secret.as_str(), true)?;
                self.emit(WriteEvent::start_element("Value").attr("Protected", "True"))?;
                if !wire.is_empty() {
                    self.emit(WriteEvent::characters(&wire))?;
                }
                self.end()
            }
            Value::Unprotected(plain) => {
                let wire = protected::encode_unprotected(key, plain);
                self.leaf("Value", &wire)
            }
        }
    }
}
