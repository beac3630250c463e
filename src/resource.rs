use std::collections::HashMap;
use std::fmt;

/// One named archive entry and the CRC-32 of its uncompressed content.
///
/// Two resources describe the same entry when their names match and hold
/// the same content when their checksums match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub name: String,
    pub checksum: u64,
}

impl Resource {
    pub fn new(name: impl Into<String>, checksum: u64) -> Self {
        Self {
            name: name.into(),
            checksum,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (crc={:#010x})", self.name, self.checksum)
    }
}

/// Ordered, name-unique collection of resources.
///
/// Order is archive entry order and is load-bearing: index offsets and
/// manifest placement depend on it.
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    resources: Vec<Resource>,
    by_name: HashMap<String, usize>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            resources: Vec::with_capacity(capacity),
            by_name: HashMap::with_capacity(capacity),
        }
    }

    /// Append a resource. Returns `false` and keeps the existing entry if
    /// the name is already present.
    pub fn insert(&mut self, resource: Resource) -> bool {
        if self.by_name.contains_key(&resource.name) {
            return false;
        }
        self.by_name
            .insert(resource.name.clone(), self.resources.len());
        self.resources.push(resource);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.by_name.get(name).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        for resource in iter {
            set.insert(resource);
        }
        set
    }
}
