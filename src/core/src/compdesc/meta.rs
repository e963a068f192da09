//! Element metadata, labels, and identities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity attribute always carrying the element name.
pub const SYSTEM_IDENTITY_NAME: &str = "name";

/// Identity attribute injected to tell apart elements sharing name and extra identity.
pub const SYSTEM_IDENTITY_VERSION: &str = "version";

/// Key/value set distinguishing an element within its list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(BTreeMap<String, String>);

impl Identity {
    pub fn new(name: &str) -> Self {
        let mut m = BTreeMap::new();
        m.insert(SYSTEM_IDENTITY_NAME.to_string(), name.to_string());
        Self(m)
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(SYSTEM_IDENTITY_NAME)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Canonical digest: the JSON encoding of the sorted attribute map.
    pub fn digest(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Whether every attribute of `self` is present with the same value in `other`.
    pub fn matches(&self, other: &Identity) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest())
    }
}

/// Named label with an arbitrary JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub signing: bool,
}

impl Label {
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            value,
            version: None,
            signing: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Label> {
        self.0.iter().find(|l| l.name == name)
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|l| &l.value)
    }

    /// Replace the value of an existing label or append a new one.
    pub fn set_value(&mut self, name: &str, value: Value) {
        match self.0.iter_mut().find(|l| l.name == name) {
            Some(l) => l.value = value,
            None => self.0.push(Label::new(name, value)),
        }
    }

    pub fn push(&mut self, label: Label) {
        self.0.push(label);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|l| l.name != name);
        before != self.0.len()
    }
}

impl From<Vec<Label>> for Labels {
    fn from(v: Vec<Label>) -> Self {
        Self(v)
    }
}

/// Common metadata of resources, sources, and references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementMeta {
    pub name: String,
    pub version: String,
    pub extra_identity: BTreeMap<String, String>,
    pub labels: Labels,
}

impl ElementMeta {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    pub fn with_extra_identity(mut self, key: &str, value: &str) -> Self {
        self.extra_identity.insert(key.to_string(), value.to_string());
        self
    }

    /// Identity without sibling disambiguation.
    pub fn raw_identity(&self) -> Identity {
        let mut id = Identity::from_map(self.extra_identity.clone());
        id.insert(SYSTEM_IDENTITY_NAME, &self.name);
        id
    }

    /// Identity of this element relative to `siblings`.
    ///
    /// If more than one sibling shares name and extra identity, the
    /// version becomes part of the identity.
    pub fn identity_in<E: Element>(&self, siblings: &[E]) -> Identity {
        let mut id = self.raw_identity();
        let colliding = siblings
            .iter()
            .map(Element::meta)
            .filter(|m| m.name == self.name && m.extra_identity == self.extra_identity)
            .count();
        if colliding > 1 {
            id.insert(SYSTEM_IDENTITY_VERSION, &self.version);
        }
        id
    }
}

/// An entry of one of the descriptor's element lists.
pub trait Element {
    fn meta(&self) -> &ElementMeta;
    fn meta_mut(&mut self) -> &mut ElementMeta;
}

/// Position of the element whose identity equals `id`.
pub fn index_of<E: Element>(list: &[E], id: &Identity) -> Option<usize> {
    list.iter()
        .position(|e| e.meta().identity_in(list) == *id)
}
