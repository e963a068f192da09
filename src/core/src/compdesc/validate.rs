//! Descriptor validation. All violations are collected, none short-circuits.

use std::collections::{BTreeMap, HashSet};

use super::meta::{Element, Labels, SYSTEM_IDENTITY_NAME};
use super::{ComponentDescriptor, ComponentReference, Resource, Source, SourceRef};
use crate::error::{OcmError, Result};
use crate::field::{FieldErrorKind, FieldPath, ValidationErrors};
use crate::typed::TypedObject;

const IDENTITY_KEY_MSG: &str =
    "must consist of lower case alphanumeric characters, '-', '_' or '+', and must start and end with an alphanumeric character";

/// Whether `s` is usable as an identity key or element name.
pub fn is_identity_key(s: &str) -> bool {
    let bytes = s.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) => {
            alnum(first)
                && alnum(last)
                && bytes
                    .iter()
                    .all(|&b| alnum(b) || b == b'-' || b == b'_' || b == b'+')
        }
        _ => false,
    }
}

/// Validate a descriptor, failing with the full list of violations.
pub fn validate(desc: &ComponentDescriptor) -> Result<()> {
    let errs = validation_errors(desc);
    if errs.is_empty() {
        Ok(())
    } else {
        Err(OcmError::Validation(errs))
    }
}

pub fn validation_errors(desc: &ComponentDescriptor) -> ValidationErrors {
    let mut errs = ValidationErrors::new();

    if desc.metadata.schema_version.is_empty() {
        errs.required(
            &FieldPath::new("meta").child("schemaVersion"),
            "must specify a version",
        );
    }

    let comp = &desc.component;
    let path = FieldPath::new("component");

    if comp.name.is_empty() {
        errs.required(&path.child("name"), "must specify a name");
    }
    if comp.version.is_empty() {
        errs.required(&path.child("version"), "must specify a version");
    }
    if comp.provider.is_empty() {
        errs.required(&path.child("provider"), "provider must be set");
    }
    validate_labels(&mut errs, &path.child("labels"), &comp.labels);

    for (i, ctx) in comp.repository_contexts.iter().enumerate() {
        if ctx.get_type().is_empty() {
            errs.required(
                &path.child("repositoryContexts").index(i).child("type"),
                "must specify a type",
            );
        }
    }

    validate_sources(&mut errs, &path.child("sources"), &comp.sources);
    validate_references(&mut errs, &path.child("componentReferences"), &comp.references);
    validate_resources(&mut errs, &path.child("resources"), &comp.resources, &comp.version);

    errs
}

fn validate_labels(errs: &mut ValidationErrors, path: &FieldPath, labels: &Labels) {
    let mut names = HashSet::new();
    for (i, label) in labels.iter().enumerate() {
        if label.name.is_empty() {
            errs.required(&path.index(i).child("name"), "must specify a name");
        }
        if !names.insert(label.name.as_str()) {
            errs.duplicate(&path.index(i), format!("duplicate label name {:?}", label.name));
        }
    }
}

fn validate_extra_identity(
    errs: &mut ValidationErrors,
    path: &FieldPath,
    identity: &BTreeMap<String, String>,
) {
    for key in identity.keys() {
        if key == SYSTEM_IDENTITY_NAME {
            errs.push(
                &path.key(key),
                FieldErrorKind::Forbidden,
                "name is a reserved system identity label",
            );
        } else if !is_identity_key(key) {
            errs.invalid(&path.key(key), IDENTITY_KEY_MSG);
        }
    }
}

/// Report elements whose identity digest was already seen.
fn check_unique<E: Element>(errs: &mut ValidationErrors, path: &FieldPath, list: &[E], what: &str) {
    let mut seen = HashSet::new();
    for (i, e) in list.iter().enumerate() {
        if !seen.insert(e.meta().identity_in(list).digest()) {
            errs.duplicate(&path.index(i), format!("duplicate {}", what));
        }
    }
}

fn validate_sources(errs: &mut ValidationErrors, path: &FieldPath, sources: &[Source]) {
    for (i, src) in sources.iter().enumerate() {
        let p = path.index(i);
        if src.meta.name.is_empty() {
            errs.required(&p.child("name"), "must specify a name");
        }
        if src.source_type.is_empty() {
            errs.required(&p.child("type"), "must specify a type");
        }
        validate_extra_identity(errs, &p.child("extraIdentity"), &src.meta.extra_identity);
        validate_labels(errs, &p.child("labels"), &src.meta.labels);
    }
    check_unique(errs, path, sources, "source");
}

fn validate_references(
    errs: &mut ValidationErrors,
    path: &FieldPath,
    references: &[ComponentReference],
) {
    for (i, r) in references.iter().enumerate() {
        let p = path.index(i);
        if r.component_name.is_empty() {
            errs.required(&p.child("componentName"), "must specify a component name");
        }
        if r.meta.name.is_empty() {
            errs.required(&p.child("name"), "must specify a name");
        }
        if r.meta.version.is_empty() {
            errs.required(&p.child("version"), "must specify a version");
        }
        validate_extra_identity(errs, &p.child("extraIdentity"), &r.meta.extra_identity);
        validate_labels(errs, &p.child("labels"), &r.meta.labels);
    }
    check_unique(errs, path, references, "component reference name");
}

fn validate_source_refs(errs: &mut ValidationErrors, path: &FieldPath, refs: &[SourceRef]) {
    for (i, r) in refs.iter().enumerate() {
        validate_labels(errs, &path.index(i).child("labels"), &r.labels);
    }
}

fn validate_resources(
    errs: &mut ValidationErrors,
    path: &FieldPath,
    resources: &[Resource],
    component_version: &str,
) {
    for (i, res) in resources.iter().enumerate() {
        let p = path.index(i);
        if res.meta.name.is_empty() {
            errs.required(&p.child("name"), "must specify a name");
        } else if !is_identity_key(&res.meta.name) {
            errs.invalid(&p.child("name"), IDENTITY_KEY_MSG);
        }
        if res.meta.version.is_empty() {
            errs.required(&p.child("version"), "must specify a version");
        }
        if !res.relation.is_valid() {
            errs.push(
                &p.child("relation"),
                FieldErrorKind::NotSupported,
                format!(
                    "relation {:?} must be one of \"local\", \"external\"",
                    res.relation.as_str()
                ),
            );
        }
        if res.resource_type.is_empty() {
            errs.required(&p.child("type"), "must specify a type");
        }
        if res.access.is_none() {
            errs.required(&p.child("access"), "must specify an access");
        }
        if res.relation.is_local()
            && !component_version.is_empty()
            && res.meta.version != component_version
        {
            errs.invalid(
                &p.child("version"),
                "version of local resources must match the component version",
            );
        }
        validate_extra_identity(errs, &p.child("extraIdentity"), &res.meta.extra_identity);
        validate_labels(errs, &p.child("labels"), &res.meta.labels);
        validate_source_refs(errs, &p.child("srcRefs"), &res.source_refs);
    }
    check_unique(errs, path, resources, "resource");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compdesc::{ElementMeta, Label, ResourceRelation};
    use crate::typed::UnstructuredTypedObject;
    use serde_json::json;

    fn access() -> Option<UnstructuredTypedObject> {
        Some(UnstructuredTypedObject::new("localBlob"))
    }

    fn resource(name: &str, version: &str, relation: ResourceRelation) -> Resource {
        let mut r = Resource::new(ElementMeta::new(name, version), "ociImage", relation);
        r.access = access();
        r
    }

    fn valid() -> ComponentDescriptor {
        let mut desc = ComponentDescriptor::new("github.com/acme/app", "1.0.0", "acme");
        desc.component
            .resources
            .push(resource("image", "1.0.0", ResourceRelation::local()));
        desc
    }

    #[test]
    fn test_identity_key() {
        assert!(is_identity_key("image"));
        assert!(is_identity_key("my-chart_v2+x"));
        assert!(is_identity_key("a"));
        assert!(!is_identity_key(""));
        assert!(!is_identity_key("-image"));
        assert!(!is_identity_key("image-"));
        assert!(!is_identity_key("Image"));
        assert!(!is_identity_key("my image"));
    }

    #[test]
    fn test_valid_descriptor() {
        assert!(validate(&valid()).is_ok());
    }

    #[test]
    fn test_collects_all_violations() {
        let mut desc = ComponentDescriptor::default();
        desc.component
            .resources
            .push(Resource::new(ElementMeta::new("Bad Name", ""), "", "remote".into()));
        let errs = validation_errors(&desc);
        assert!(errs.has("meta.schemaVersion", FieldErrorKind::Required));
        assert!(errs.has("component.name", FieldErrorKind::Required));
        assert!(errs.has("component.version", FieldErrorKind::Required));
        assert!(errs.has("component.provider", FieldErrorKind::Required));
        assert!(errs.has("component.resources[0].name", FieldErrorKind::Invalid));
        assert!(errs.has("component.resources[0].version", FieldErrorKind::Required));
        assert!(errs.has("component.resources[0].relation", FieldErrorKind::NotSupported));
        assert!(errs.has("component.resources[0].type", FieldErrorKind::Required));
        assert!(errs.has("component.resources[0].access", FieldErrorKind::Required));
    }

    #[test]
    fn test_local_resource_version_must_match() {
        let mut desc = valid();
        desc.component.resources[0].meta.version = "0.9.0".to_string();
        let errs = validation_errors(&desc);
        assert!(errs.has("component.resources[0].version", FieldErrorKind::Invalid));

        desc.component.resources[0].relation = ResourceRelation::external();
        assert!(validate(&desc).is_ok());
    }

    #[test]
    fn test_duplicate_resource_identity() {
        let mut desc = valid();
        desc.component
            .resources
            .push(resource("image", "1.0.0", ResourceRelation::local()));
        let errs = validation_errors(&desc);
        assert!(errs.has("component.resources[1]", FieldErrorKind::Duplicate));

        desc.component.resources[1]
            .meta
            .extra_identity
            .insert("platform".to_string(), "arm64".to_string());
        assert!(validate(&desc).is_ok());
    }

    #[test]
    fn test_versions_disambiguate_external_resources() {
        let mut desc = valid();
        desc.component
            .resources
            .push(resource("base", "1.0", ResourceRelation::external()));
        desc.component
            .resources
            .push(resource("base", "2.0", ResourceRelation::external()));
        assert!(validate(&desc).is_ok());
    }

    #[test]
    fn test_duplicate_sources_and_references() {
        let mut desc = valid();
        for _ in 0..2 {
            desc.component
                .sources
                .push(Source::new(ElementMeta::new("repo", "1.0.0"), "git"));
            desc.component.references.push(ComponentReference::new(
                "db",
                "acme.org/db",
                "1.0.0",
            ));
        }
        let errs = validation_errors(&desc);
        assert!(errs.has("component.sources[1]", FieldErrorKind::Duplicate));
        assert!(errs.has("component.componentReferences[1]", FieldErrorKind::Duplicate));
    }

    #[test]
    fn test_reference_requires_component_name() {
        let mut desc = valid();
        desc.component
            .references
            .push(ComponentReference::new("db", "", "1.0.0"));
        let errs = validation_errors(&desc);
        assert!(errs.has(
            "component.componentReferences[0].componentName",
            FieldErrorKind::Required
        ));
    }

    #[test]
    fn test_duplicate_labels() {
        let mut desc = valid();
        let labels = &mut desc.component.resources[0].meta.labels;
        labels.push(Label::new("purpose", json!("a")));
        labels.push(Label::new("purpose", json!("b")));
        let errs = validation_errors(&desc);
        assert!(errs.has("component.resources[0].labels[1]", FieldErrorKind::Duplicate));
    }

    #[test]
    fn test_extra_identity_keys() {
        let mut desc = valid();
        let extra = &mut desc.component.resources[0].meta.extra_identity;
        extra.insert("name".to_string(), "other".to_string());
        extra.insert("Bad Key".to_string(), "x".to_string());
        let errs = validation_errors(&desc);
        assert!(errs.has(
            "component.resources[0].extraIdentity[name]",
            FieldErrorKind::Forbidden
        ));
        assert!(errs.has(
            "component.resources[0].extraIdentity[Bad Key]",
            FieldErrorKind::Invalid
        ));
    }

    #[test]
    fn test_validate_returns_validation_error() {
        let mut desc = valid();
        desc.component.provider.clear();
        let err = validate(&desc).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
