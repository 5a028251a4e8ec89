//! Group types and operations

use crate::entry::Entry;
use crate::times::Times;
use uuid::Uuid;

/// A group (folder) holding entries and subgroups in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub notes: String,
    pub icon_id: u32,
    pub times: Times,
    /// Whether this group is expanded in the UI
    pub is_expanded: bool,
    pub entries: Vec<Entry>,
    pub groups: Vec<Group>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(Uuid::new_v4(), name)
    }

    /// Create a new group with a specific UUID (used when loading)
    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            notes: String::new(),
            icon_id: 48,
            times: Times::now(),
            is_expanded: true,
            entries: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            times: self.times.modified(),
            ..self.clone()
        }
    }

    pub fn with_notes(&self, notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            times: self.times.modified(),
            ..self.clone()
        }
    }

    /// Add or replace (by UUID) an entry directly in this group
    pub fn with_entry(&self, entry: Entry) -> Self {
        let mut group = self.clone();
        match group.entries.iter_mut().find(|e| e.uuid == entry.uuid) {
            Some(slot) => *slot = entry,
            None => group.entries.push(entry),
        }
        group.times = self.times.modified();
        group
    }

    /// Add or replace (by UUID) a direct subgroup
    pub fn with_group(&self, child: Group) -> Self {
        let mut group = self.clone();
        match group.groups.iter_mut().find(|g| g.uuid == child.uuid) {
            Some(slot) => *slot = child,
            None => group.groups.push(child),
        }
        group.times = self.times.modified();
        group
    }

    /// Remove an entry anywhere below this group. Returns `None` when absent.
    pub fn without_entry(&self, uuid: &Uuid) -> Option<Self> {
        if let Some(pos) = self.entries.iter().position(|e| &e.uuid == uuid) {
            let mut group = self.clone();
            group.entries.remove(pos);
            group.times = self.times.modified();
            return Some(group);
        }
        self.groups.iter().enumerate().find_map(|(i, child)| {
            child.without_entry(uuid).map(|updated| {
                let mut group = self.clone();
                group.groups[i] = updated;
                group
            })
        })
    }

    /// Apply `update` to the group with `uuid` (this one or any descendant)
    pub fn updating<F>(&self, uuid: &Uuid, update: F) -> Option<Self>
    where
        F: FnOnce(&Group) -> Group,
    {
        self.updating_inner(uuid, &mut Some(update))
    }

    fn updating_inner<F>(&self, uuid: &Uuid, update: &mut Option<F>) -> Option<Self>
    where
        F: FnOnce(&Group) -> Group,
    {
        if &self.uuid == uuid {
            return update.take().map(|f| f(self));
        }
        self.groups.iter().enumerate().find_map(|(i, child)| {
            child.updating_inner(uuid, update).map(|updated| {
                let mut group = self.clone();
                group.groups[i] = updated;
                group
            })
        })
    }

    pub fn find_entry(&self, uuid: &Uuid) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| &e.uuid == uuid)
            .or_else(|| self.groups.iter().find_map(|g| g.find_entry(uuid)))
    }

    pub fn find_group(&self, uuid: &Uuid) -> Option<&Group> {
        if &self.uuid == uuid {
            return Some(self);
        }
        self.groups.iter().find_map(|g| g.find_group(uuid))
    }

    /// All entries below this group, depth-first in document order
    pub fn all_entries(&self) -> Vec<&Entry> {
        let mut out = Vec::new();
        self.collect_entries(&mut out);
        out
    }

    fn collect_entries<'a>(&'a self, out: &mut Vec<&'a Entry>) {
        out.extend(self.entries.iter());
        for group in &self.groups {
            group.collect_entries(out);
        }
    }

    /// Number of groups below and including this one
    pub fn group_count(&self) -> usize {
        1 + self.groups.iter().map(Group::group_count).sum::<usize>()
    }
}

/// Builder for creating groups
pub struct GroupBuilder {
    group: Group,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            group: Group::new(name),
        }
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.group.uuid = uuid;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.group.notes = notes.into();
        self
    }

    pub fn icon_id(mut self, icon_id: u32) -> Self {
        self.group.icon_id = icon_id;
        self
    }

    pub fn expanded(mut self, expanded: bool) -> Self {
        self.group.is_expanded = expanded;
        self
    }

    pub fn entry(mut self, entry: Entry) -> Self {
        self.group.entries.push(entry);
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.group.groups.push(group);
        self
    }

    pub fn build(self) -> Group {
        self.group
    }
}
