//! Schema version `v2` of the component descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{unknown_fields, DescriptorVersion};
use crate::compdesc::codec::EncodingFormat;
use crate::compdesc::{
    ComponentDescriptor, ComponentReference, ComponentSpec, ElementMeta, Labels, Metadata,
    Resource, ResourceRelation, Source, SourceRef,
};
use crate::error::{OcmError, Result};
use crate::typed::UnstructuredTypedObject;

pub const SCHEMA_VERSION: &str = "v2";

/// Treat an explicit `null` like an absent field.
fn nullable<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptorV2 {
    #[serde(default)]
    pub meta: MetaV2,
    #[serde(default)]
    pub component: ComponentV2,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaV2 {
    #[serde(default)]
    pub schema_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentV2 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(default)]
    pub provider: String,
    #[serde(default, deserialize_with = "nullable")]
    pub repository_contexts: Vec<UnstructuredTypedObject>,
    #[serde(default, deserialize_with = "nullable")]
    pub sources: Vec<SourceV2>,
    #[serde(default, deserialize_with = "nullable")]
    pub component_references: Vec<ComponentReferenceV2>,
    #[serde(default, deserialize_with = "nullable")]
    pub resources: Vec<ResourceV2>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceV2 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub relation: String,
    #[serde(rename = "srcRefs", default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<SourceRefV2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<UnstructuredTypedObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRefV2 {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub identity_selector: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceV2 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<UnstructuredTypedObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReferenceV2 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub component_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

fn meta(name: String, version: String, extra_identity: BTreeMap<String, String>, labels: Labels) -> ElementMeta {
    ElementMeta {
        name,
        version,
        extra_identity,
        labels,
    }
}

impl From<ComponentDescriptorV2> for ComponentDescriptor {
    fn from(v: ComponentDescriptorV2) -> Self {
        let c = v.component;
        ComponentDescriptor {
            metadata: Metadata {
                schema_version: v.meta.schema_version,
            },
            component: ComponentSpec {
                name: c.name,
                version: c.version,
                provider: c.provider,
                labels: c.labels,
                repository_contexts: c.repository_contexts,
                sources: c
                    .sources
                    .into_iter()
                    .map(|s| Source {
                        meta: meta(s.name, s.version, s.extra_identity, s.labels),
                        source_type: s.source_type,
                        access: s.access,
                    })
                    .collect(),
                references: c
                    .component_references
                    .into_iter()
                    .map(|r| ComponentReference {
                        meta: meta(r.name, r.version, r.extra_identity, r.labels),
                        component_name: r.component_name,
                    })
                    .collect(),
                resources: c
                    .resources
                    .into_iter()
                    .map(|r| Resource {
                        meta: meta(r.name, r.version, r.extra_identity, r.labels),
                        resource_type: r.resource_type,
                        relation: ResourceRelation::from(r.relation.as_str()),
                        source_refs: r
                            .source_refs
                            .into_iter()
                            .map(|s| SourceRef {
                                identity_selector: s.identity_selector,
                                labels: s.labels,
                            })
                            .collect(),
                        access: r.access,
                    })
                    .collect(),
            },
        }
    }
}

impl From<&ComponentDescriptor> for ComponentDescriptorV2 {
    fn from(d: &ComponentDescriptor) -> Self {
        let c = &d.component;
        ComponentDescriptorV2 {
            meta: MetaV2 {
                schema_version: SCHEMA_VERSION.to_string(),
            },
            component: ComponentV2 {
                name: c.name.clone(),
                version: c.version.clone(),
                labels: c.labels.clone(),
                provider: c.provider.clone(),
                repository_contexts: c.repository_contexts.clone(),
                sources: c
                    .sources
                    .iter()
                    .map(|s| SourceV2 {
                        name: s.meta.name.clone(),
                        version: s.meta.version.clone(),
                        extra_identity: s.meta.extra_identity.clone(),
                        labels: s.meta.labels.clone(),
                        source_type: s.source_type.clone(),
                        access: s.access.clone(),
                    })
                    .collect(),
                component_references: c
                    .references
                    .iter()
                    .map(|r| ComponentReferenceV2 {
                        name: r.meta.name.clone(),
                        component_name: r.component_name.clone(),
                        version: r.meta.version.clone(),
                        extra_identity: r.meta.extra_identity.clone(),
                        labels: r.meta.labels.clone(),
                    })
                    .collect(),
                resources: c
                    .resources
                    .iter()
                    .map(|r| ResourceV2 {
                        name: r.meta.name.clone(),
                        version: r.meta.version.clone(),
                        extra_identity: r.meta.extra_identity.clone(),
                        labels: r.meta.labels.clone(),
                        resource_type: r.resource_type.clone(),
                        relation: r.relation.as_str().to_string(),
                        source_refs: r
                            .source_refs
                            .iter()
                            .map(|s| SourceRefV2 {
                                identity_selector: s.identity_selector.clone(),
                                labels: s.labels.clone(),
                            })
                            .collect(),
                        access: r.access.clone(),
                    })
                    .collect(),
            },
        }
    }
}

/// Codec for schema version `v2`.
pub struct V2;

impl DescriptorVersion for V2 {
    fn schema_version(&self) -> &'static str {
        SCHEMA_VERSION
    }

    fn decode(&self, doc: Value, strict: bool) -> Result<ComponentDescriptor> {
        let parsed: ComponentDescriptorV2 = serde_json::from_value(doc.clone()).map_err(|e| {
            OcmError::invalid("component descriptor", SCHEMA_VERSION, e.to_string())
        })?;
        if strict {
            let known = serde_json::to_value(&parsed)?;
            let unknown = unknown_fields(&doc, &known);
            if !unknown.is_empty() {
                return Err(OcmError::invalid(
                    "component descriptor",
                    format!("{}:{}", parsed.component.name, parsed.component.version),
                    format!("unknown fields: {}", unknown.join(", ")),
                ));
            }
        }
        Ok(parsed.into())
    }

    fn encode(&self, desc: &ComponentDescriptor, format: EncodingFormat) -> Result<Vec<u8>> {
        let wire = ComponentDescriptorV2::from(desc);
        match format {
            EncodingFormat::Yaml => Ok(serde_yaml::to_string(&wire)?.into_bytes()),
            EncodingFormat::Json => Ok(serde_json::to_vec(&wire)?),
        }
    }
}
