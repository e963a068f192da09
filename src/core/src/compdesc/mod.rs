//! Component descriptor model.
//!
//! The types here are the version-independent internal representation.
//! Serialized forms live in [`versions`]; [`codec`] picks the right one by
//! `meta.schemaVersion`.

pub mod codec;
mod default;
mod meta;
mod validate;
pub mod versions;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::typed::UnstructuredTypedObject;

pub use codec::{decode, decode_with, encode, DecodeOptions, EncodingFormat};
pub use default::default_component;
pub use meta::{
    index_of, Element, ElementMeta, Identity, Label, Labels, SYSTEM_IDENTITY_NAME,
    SYSTEM_IDENTITY_VERSION,
};
pub use validate::{is_identity_key, validate, validation_errors};

/// Schema version written when none is given.
pub const DEFAULT_SCHEMA_VERSION: &str = versions::v2::SCHEMA_VERSION;

/// How a resource relates to the component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRelation(String);

impl ResourceRelation {
    pub const LOCAL: &'static str = "local";
    pub const EXTERNAL: &'static str = "external";

    pub fn local() -> Self {
        Self(Self::LOCAL.to_string())
    }

    pub fn external() -> Self {
        Self(Self::EXTERNAL.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }

    pub fn is_valid(&self) -> bool {
        self.0 == Self::LOCAL || self.0 == Self::EXTERNAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceRelation {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub schema_version: String,
}

/// Reference from a resource to the source it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRef {
    pub identity_selector: BTreeMap<String, String>,
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    pub meta: ElementMeta,
    pub resource_type: String,
    pub relation: ResourceRelation,
    pub source_refs: Vec<SourceRef>,
    pub access: Option<UnstructuredTypedObject>,
}

impl Resource {
    pub fn new(meta: ElementMeta, resource_type: &str, relation: ResourceRelation) -> Self {
        Self {
            meta,
            resource_type: resource_type.to_string(),
            relation,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Source {
    pub meta: ElementMeta,
    pub source_type: String,
    pub access: Option<UnstructuredTypedObject>,
}

impl Source {
    pub fn new(meta: ElementMeta, source_type: &str) -> Self {
        Self {
            meta,
            source_type: source_type.to_string(),
            access: None,
        }
    }
}

/// Reference to another component version. `meta.name` is the local
/// name of the reference, `component_name` the referenced component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentReference {
    pub meta: ElementMeta,
    pub component_name: String,
}

impl ComponentReference {
    pub fn new(name: &str, component_name: &str, version: &str) -> Self {
        Self {
            meta: ElementMeta::new(name, version),
            component_name: component_name.to_string(),
        }
    }
}

impl Element for Resource {
    fn meta(&self) -> &ElementMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ElementMeta {
        &mut self.meta
    }
}

impl Element for Source {
    fn meta(&self) -> &ElementMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ElementMeta {
        &mut self.meta
    }
}

impl Element for ComponentReference {
    fn meta(&self) -> &ElementMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ElementMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentSpec {
    pub name: String,
    pub version: String,
    pub provider: String,
    pub labels: Labels,
    pub repository_contexts: Vec<UnstructuredTypedObject>,
    pub sources: Vec<Source>,
    pub references: Vec<ComponentReference>,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentDescriptor {
    pub metadata: Metadata,
    pub component: ComponentSpec,
}

fn set_element<E: Element>(list: &mut Vec<E>, elem: E) {
    let id = elem.meta().identity_in(list);
    match index_of(list, &id) {
        Some(i) => list[i] = elem,
        None => list.push(elem),
    }
}

impl ComponentDescriptor {
    /// A defaulted descriptor for a new component version.
    pub fn new(name: &str, version: &str, provider: &str) -> Self {
        let mut desc = Self {
            metadata: Metadata {
                schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            },
            component: ComponentSpec {
                name: name.to_string(),
                version: version.to_string(),
                provider: provider.to_string(),
                ..Default::default()
            },
        };
        default_component(&mut desc);
        desc
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn version(&self) -> &str {
        &self.component.version
    }

    pub fn resource_identity(&self, index: usize) -> Option<Identity> {
        let list = &self.component.resources;
        list.get(index).map(|r| r.meta.identity_in(list))
    }

    pub fn source_identity(&self, index: usize) -> Option<Identity> {
        let list = &self.component.sources;
        list.get(index).map(|s| s.meta.identity_in(list))
    }

    pub fn reference_identity(&self, index: usize) -> Option<Identity> {
        let list = &self.component.references;
        list.get(index).map(|r| r.meta.identity_in(list))
    }

    pub fn get_resource_index(&self, id: &Identity) -> Option<usize> {
        index_of(&self.component.resources, id)
    }

    pub fn get_source_index(&self, id: &Identity) -> Option<usize> {
        index_of(&self.component.sources, id)
    }

    pub fn get_reference_index(&self, id: &Identity) -> Option<usize> {
        index_of(&self.component.references, id)
    }

    pub fn get_resource_by_identity(&self, id: &Identity) -> Option<&Resource> {
        self.get_resource_index(id)
            .map(|i| &self.component.resources[i])
    }

    pub fn get_source_by_identity(&self, id: &Identity) -> Option<&Source> {
        self.get_source_index(id).map(|i| &self.component.sources[i])
    }

    pub fn get_reference_by_identity(&self, id: &Identity) -> Option<&ComponentReference> {
        self.get_reference_index(id)
            .map(|i| &self.component.references[i])
    }

    pub fn get_resources_by_name(&self, name: &str) -> Vec<&Resource> {
        self.component
            .resources
            .iter()
            .filter(|r| r.meta.name == name)
            .collect()
    }

    /// Replace the resource with the same identity, or append it.
    pub fn set_resource(&mut self, res: Resource) {
        set_element(&mut self.component.resources, res);
    }

    pub fn set_source(&mut self, src: Source) {
        set_element(&mut self.component.sources, src);
    }

    pub fn set_reference(&mut self, reference: ComponentReference) {
        set_element(&mut self.component.references, reference);
    }

    /// Append a repository context unless it already is the latest one.
    pub fn add_repository_context(&mut self, spec: UnstructuredTypedObject) {
        if self.component.repository_contexts.last() != Some(&spec) {
            self.component.repository_contexts.push(spec);
        }
    }
}
