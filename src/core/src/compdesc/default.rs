use super::meta::{Element, SYSTEM_IDENTITY_VERSION};
use super::{ComponentDescriptor, DEFAULT_SCHEMA_VERSION};

/// Apply defaults to a descriptor in place.
///
/// Sets the schema version if blank, gives local resources without a
/// version the component version, and makes colliding element identities
/// explicit by recording the version in their extra identity. Applying it
/// twice yields the same descriptor as applying it once.
pub fn default_component(desc: &mut ComponentDescriptor) {
    if desc.metadata.schema_version.is_empty() {
        desc.metadata.schema_version = DEFAULT_SCHEMA_VERSION.to_string();
    }

    let version = desc.component.version.clone();
    for res in desc.component.resources.iter_mut() {
        if res.relation.is_local() && res.meta.version.is_empty() {
            res.meta.version = version.clone();
        }
    }

    disambiguate(&mut desc.component.resources);
    disambiguate(&mut desc.component.sources);
}

fn disambiguate<E: Element>(list: &mut [E]) {
    let shared: &[E] = list;
    let ids: Vec<_> = shared.iter().map(|e| e.meta().identity_in(shared)).collect();
    for (elem, id) in list.iter_mut().zip(ids) {
        if let Some(v) = id.get(SYSTEM_IDENTITY_VERSION) {
            elem.meta_mut()
                .extra_identity
                .entry(SYSTEM_IDENTITY_VERSION.to_string())
                .or_insert_with(|| v.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compdesc::{ElementMeta, Resource, ResourceRelation, Source};

    fn local(name: &str, version: &str) -> Resource {
        Resource::new(ElementMeta::new(name, version), "blob", ResourceRelation::local())
    }

    #[test]
    fn test_defaults_schema_version() {
        let mut desc = ComponentDescriptor::default();
        default_component(&mut desc);
        assert_eq!(desc.metadata.schema_version, "v2");
    }

    #[test]
    fn test_local_resource_gets_component_version() {
        let mut desc = ComponentDescriptor::new("acme.org/app", "1.0.0", "acme");
        desc.component.resources.push(local("image", ""));
        let mut external = local("base", "");
        external.relation = ResourceRelation::external();
        desc.component.resources.push(external);
        default_component(&mut desc);
        assert_eq!(desc.component.resources[0].meta.version, "1.0.0");
        assert_eq!(desc.component.resources[1].meta.version, "");
    }

    #[test]
    fn test_explicit_local_version_is_kept() {
        let mut desc = ComponentDescriptor::new("acme.org/app", "1.0.0", "acme");
        desc.component.resources.push(local("image", "0.9.0"));
        default_component(&mut desc);
        assert_eq!(desc.component.resources[0].meta.version, "0.9.0");
    }

    #[test]
    fn test_collisions_record_version() {
        let mut desc = ComponentDescriptor::new("acme.org/app", "1.0.0", "acme");
        let mut a = local("image", "1.0.0");
        a.relation = ResourceRelation::external();
        let mut b = local("image", "2.0.0");
        b.relation = ResourceRelation::external();
        desc.component.resources.push(a);
        desc.component.resources.push(b);
        desc.component
            .sources
            .push(Source::new(ElementMeta::new("repo", "1"), "git"));
        default_component(&mut desc);
        assert_eq!(
            desc.component.resources[0].meta.extra_identity.get("version"),
            Some(&"1.0.0".to_string())
        );
        assert_eq!(
            desc.component.resources[1].meta.extra_identity.get("version"),
            Some(&"2.0.0".to_string())
        );
        assert!(desc.component.sources[0].meta.extra_identity.is_empty());
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let mut desc = ComponentDescriptor::new("acme.org/app", "1.0.0", "acme");
        desc.component.resources.push(local("image", ""));
        desc.component.resources.push(local("image", ""));
        desc.component.resources.push(local("chart", "1.0.0"));
        let mut once = desc.clone();
        default_component(&mut once);
        let mut twice = once.clone();
        default_component(&mut twice);
        assert_eq!(once, twice);
    }
}
