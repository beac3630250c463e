//! Name/checksum diff between a local and a remote resource set.

use std::collections::HashMap;
use std::fmt;

use crate::resource::{Resource, ResourceSet};

/// Action required for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Only on the remote side; fetch it.
    Add,
    /// On both sides with different checksums; fetch the remote copy.
    Update,
    /// Only on the local side; drop it.
    Remove,
}

impl Flag {
    /// Whether the resource's data comes from the remote side.
    pub fn is_remote(self) -> bool {
        matches!(self, Flag::Add | Flag::Update)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flag::Add => "+++",
            Flag::Update => "!!!",
            Flag::Remove => "---",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub resource: Resource,
    pub flag: Flag,
}

/// Required actions keyed by resource name.
///
/// A resource that is identical on both sides is absent: presence always
/// means an action is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffMap {
    entries: HashMap<String, DiffEntry>,
}

impl DiffMap {
    pub fn get(&self, name: &str) -> Option<&DiffEntry> {
        self.entries.get(name)
    }

    pub fn flag(&self, name: &str) -> Option<Flag> {
        self.entries.get(name).map(|e| e.flag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.values()
    }

    /// Entries whose data has to be fetched remotely.
    pub fn remote_entries(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries.values().filter(|e| e.flag.is_remote())
    }

    pub fn count(&self, flag: Flag) -> usize {
        self.entries.values().filter(|e| e.flag == flag).count()
    }

    fn insert(&mut self, resource: Resource, flag: Flag) {
        self.entries
            .insert(resource.name.clone(), DiffEntry { resource, flag });
    }

    fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

/// Compute the actions that turn `local` into `remote`.
///
/// Every local resource starts out flagged [`Flag::Remove`]. Walking the
/// remote set in index order, an unknown name is flagged [`Flag::Add`]
/// (keyed by the remote resource), an identical checksum clears the local
/// entry, and a differing checksum re-flags the local resource
/// [`Flag::Update`].
pub fn diff(local: &ResourceSet, remote: &ResourceSet) -> DiffMap {
    let mut map = DiffMap {
        entries: HashMap::with_capacity(local.len()),
    };

    for resource in local {
        map.insert(resource.clone(), Flag::Remove);
    }

    for remote_resource in remote {
        match local.get(&remote_resource.name) {
            None => map.insert(remote_resource.clone(), Flag::Add),
            Some(local_resource) if local_resource.checksum == remote_resource.checksum => {
                map.remove(&local_resource.name)
            }
            Some(local_resource) => map.insert(local_resource.clone(), Flag::Update),
        }
    }

    map
}
