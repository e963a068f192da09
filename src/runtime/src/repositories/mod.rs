//! OCM repositories.
//!
//! A [`Repository`] hosts components, a [`ComponentAccess`] the versions of
//! one component, and a [`ComponentVersionAccess`] one version with its
//! descriptor and blobs.
//!
//! ```text
//! ┌────────────────┬─────────────────────────────┬──────────────────────────┐
//! │ Backend        │ Medium                      │ Local blob reference     │
//! ├────────────────┼─────────────────────────────┼──────────────────────────┤
//! │ comparch       │ single component archive    │ blob file name           │
//! │ genericocireg  │ any OCI store               │ blob digest              │
//! │ ctf            │ transport archive (OCI)     │ blob digest              │
//! └────────────────┴─────────────────────────────┴──────────────────────────┘
//! ```

pub mod comparch;
pub mod ctf;
pub mod genericocireg;
mod version;

use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::{Scheme, SchemeObject, TypedObject, UnstructuredTypedObject};
use ocm_core::{ComponentDescriptor, ComponentReference, Identity, Resource, Source};
use serde_json::Value;

use crate::access::{AccessMethod, AccessSpec};
use crate::blob::BlobAccess;
use crate::contexts::ocm::OcmContext;
use crate::oci::spec::register_repository_types;
use crate::oci::OciRepositorySpec;

pub use comparch::{ComponentArchive, ComponentArchiveSpec, COMPONENT_ARCHIVE_TYPE};
pub use genericocireg::OciComponentRepository;
pub use version::{ComponentVersion, VersionStorage};

pub trait Repository: Send + Sync {
    fn context(&self) -> &Arc<OcmContext>;

    fn get_specification(&self) -> RepositorySpec;

    fn exists_component_version(&self, name: &str, version: &str) -> Result<bool>;

    /// An existing component; `NotFound` if it has no versions.
    fn lookup_component(&self, name: &str) -> Result<Arc<dyn ComponentAccess>>;

    /// Component access for writing, created on demand.
    fn write_component(&self, name: &str) -> Result<Arc<dyn ComponentAccess>>;

    fn lookup_component_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Arc<dyn ComponentVersionAccess>> {
        self.lookup_component(name)?.lookup_version(version)
    }

    /// Names of all components stored in the repository.
    fn list_components(&self) -> Result<Vec<String>>;

    fn is_readonly(&self) -> bool {
        false
    }

    fn close(&self) -> Result<()>;
}

pub trait ComponentAccess: Send + Sync {
    fn name(&self) -> &str;

    fn list_versions(&self) -> Result<Vec<String>>;

    fn has_version(&self, version: &str) -> Result<bool> {
        Ok(self.list_versions()?.iter().any(|v| v == version))
    }

    fn lookup_version(&self, version: &str) -> Result<Arc<dyn ComponentVersionAccess>>;

    /// A fresh version, stored when added with [`add_version`](Self::add_version).
    fn new_version(&self, version: &str, overwrite: bool)
        -> Result<Arc<dyn ComponentVersionAccess>>;

    /// Store a version obtained from [`new_version`](Self::new_version) or
    /// [`lookup_version`](Self::lookup_version) of this component.
    fn add_version(&self, cv: &dyn ComponentVersionAccess, overwrite: bool) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub trait ComponentVersionAccess: Send + Sync {
    fn context(&self) -> &Arc<OcmContext>;

    /// Specification of the repository holding this version.
    fn repository_spec(&self) -> RepositorySpec;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn get_descriptor(&self) -> Result<ComponentDescriptor>;

    /// Replace the descriptor; name and version must stay the same.
    fn set_descriptor(&self, desc: ComponentDescriptor) -> Result<()>;

    fn get_resource(&self, id: &Identity) -> Result<Resource> {
        self.get_descriptor()?
            .get_resource_by_identity(id)
            .cloned()
            .ok_or_else(|| OcmError::not_found("resource", id.to_string()))
    }

    fn get_source(&self, id: &Identity) -> Result<Source> {
        self.get_descriptor()?
            .get_source_by_identity(id)
            .cloned()
            .ok_or_else(|| OcmError::not_found("source", id.to_string()))
    }

    /// Access method for an access specification of this version.
    fn access_method(&self, spec: &UnstructuredTypedObject) -> Result<Box<dyn AccessMethod>>;

    fn resource_access_method(&self, id: &Identity) -> Result<Box<dyn AccessMethod>> {
        let res = self.get_resource(id)?;
        let access = res
            .access
            .ok_or_else(|| OcmError::invalid("resource", id.to_string(), "no access specified"))?;
        self.access_method(&access)
    }

    /// Store a blob natively; `global` is an alternative external access.
    fn add_blob(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
    ) -> Result<AccessSpec>;

    fn set_resource(&self, res: Resource, access: &AccessSpec) -> Result<()>;

    fn set_resource_blob(
        &self,
        res: Resource,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
    ) -> Result<()> {
        let hint = reference_hint.unwrap_or(&res.meta.name).to_string();
        let access = self.add_blob(blob, Some(&hint), global)?;
        self.set_resource(res, &access)
    }

    fn set_source(&self, src: Source, access: &AccessSpec) -> Result<()>;

    fn set_source_blob(
        &self,
        src: Source,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
    ) -> Result<()> {
        let hint = reference_hint.unwrap_or(&src.meta.name).to_string();
        let access = self.add_blob(blob, Some(&hint), global)?;
        self.set_source(src, &access)
    }

    fn set_reference(&self, reference: ComponentReference) -> Result<()>;

    fn is_readonly(&self) -> bool;

    /// Persist pending descriptor changes.
    fn update(&self) -> Result<()>;

    /// Persist pending changes and release the version.
    ///
    /// Closing twice is a no-op; other calls on a closed version fail.
    fn close(&self) -> Result<()>;
}

/// Repository specification of the OCM layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RepositorySpec {
    Oci(OciRepositorySpec),
    ComponentArchive(ComponentArchiveSpec),
    Unknown(UnstructuredTypedObject),
}

impl RepositorySpec {
    pub fn to_unstructured(&self) -> Result<UnstructuredTypedObject> {
        UnstructuredTypedObject::from_value(self.to_value()?)
    }
}

impl From<OciRepositorySpec> for RepositorySpec {
    fn from(s: OciRepositorySpec) -> Self {
        RepositorySpec::Oci(s)
    }
}

impl From<ComponentArchiveSpec> for RepositorySpec {
    fn from(s: ComponentArchiveSpec) -> Self {
        RepositorySpec::ComponentArchive(s)
    }
}

impl TypedObject for RepositorySpec {
    fn get_type(&self) -> &str {
        match self {
            RepositorySpec::Oci(s) => s.get_type(),
            RepositorySpec::ComponentArchive(s) => &s.object_type,
            RepositorySpec::Unknown(u) => u.get_type(),
        }
    }
}

impl SchemeObject for RepositorySpec {
    fn unstructured(obj: UnstructuredTypedObject) -> Self {
        RepositorySpec::Unknown(obj)
    }

    fn as_unstructured(&self) -> Option<&UnstructuredTypedObject> {
        match self {
            RepositorySpec::Unknown(u) => Some(u),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value> {
        match self {
            RepositorySpec::Oci(s) => s.to_value(),
            RepositorySpec::ComponentArchive(s) => Ok(serde_json::to_value(s)?),
            RepositorySpec::Unknown(u) => Ok(u.to_value()),
        }
    }
}

/// Scheme with the repository kinds of this crate.
pub fn repository_scheme() -> Scheme<RepositorySpec> {
    let mut scheme = Scheme::new("repository spec");
    register_repository_types(&mut scheme);
    for suffix in ["", "/v1"] {
        scheme.register::<ComponentArchiveSpec>(&format!("{}{}", COMPONENT_ARCHIVE_TYPE, suffix));
    }
    scheme
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_scheme() {
        let scheme = repository_scheme();
        let spec = scheme
            .decode(b"type: CommonTransportFormat/v1\nfilePath: /tmp/ctf\naccessMode: readonly\n")
            .unwrap();
        assert!(matches!(spec, RepositorySpec::Oci(OciRepositorySpec::Ctf(_))));

        let spec = scheme
            .decode(b"type: ComponentArchive\nfilePath: /tmp/ca\n")
            .unwrap();
        assert!(matches!(spec, RepositorySpec::ComponentArchive(_)));

        let spec = scheme.decode(b"type: S3\nbucket: b\n").unwrap();
        assert!(matches!(spec, RepositorySpec::Unknown(_)));
        let encoded = scheme.encode_value(&spec).unwrap();
        assert_eq!(encoded["bucket"], "b");
    }
}
