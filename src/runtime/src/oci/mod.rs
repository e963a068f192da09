//! OCI storage abstraction.
//!
//! Component versions mapped to OCI are stored as artifacts in namespaces
//! of an [`OciRepository`]. Three stores are provided:
//!
//! ```text
//! ┌─────────────────────────┬────────────────────────────────────────┐
//! │ MemoryOciRepository     │ process local, for tests and staging   │
//! │ CtfOciRepository        │ Common Transport Format on disk        │
//! │ RegistryOciRepository   │ OCI distribution registry (feature     │
//! │                         │ `registry`)                            │
//! └─────────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! All access is blocking; the registry client drives its own runtime.

pub mod ctf;
mod manifest;
pub mod memory;
pub mod reference;
#[cfg(feature = "registry")]
pub mod registry;
pub mod spec;
mod store;

use std::sync::Arc;

use ocm_core::error::Result;

pub use ctf::CtfOciRepository;
pub use manifest::{
    is_manifest_media_type, Descriptor, Manifest, DOCKER_MANIFEST_MEDIA_TYPE, INDEX_MEDIA_TYPE,
    MANIFEST_MEDIA_TYPE,
};
pub use memory::MemoryOciRepository;
pub use reference::{host_of, ArtifactReference};
#[cfg(feature = "registry")]
pub use registry::RegistryOciRepository;
pub use spec::{CtfSpec, OciRepositorySpec, RegistrySpec};
pub use store::{ArtifactIndex, ArtifactMeta};

/// Whether a string is a digest rather than a tag.
pub fn is_digest(reference: &str) -> bool {
    reference.starts_with("sha256:")
}

/// A repository (namespace) inside an OCI store.
pub trait OciNamespace: Send + Sync {
    fn name(&self) -> &str;

    /// Manifest for a tag or digest, with its digest.
    fn get_manifest(&self, reference: &str) -> Result<(Manifest, String)>;

    /// Store a manifest under a tag. All referenced blobs must have been
    /// pushed before.
    fn push_manifest(&self, manifest: &Manifest, tag: &str) -> Result<Descriptor>;

    fn get_blob(&self, digest: &str) -> Result<Vec<u8>>;

    fn push_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor>;

    fn list_tags(&self) -> Result<Vec<String>>;

    fn has_artifact(&self, reference: &str) -> Result<bool>;
}

/// An OCI store holding namespaces.
pub trait OciRepository: Send + Sync {
    fn get_specification(&self) -> OciRepositorySpec;

    /// Namespace handle; namespaces are created implicitly by pushing.
    fn lookup_namespace(&self, name: &str) -> Result<Arc<dyn OciNamespace>>;

    /// Known namespaces, sorted.
    fn namespaces(&self) -> Result<Vec<String>>;

    fn is_readonly(&self) -> bool {
        false
    }

    /// Host under which blobs of this store can be reached from outside.
    fn external_host(&self) -> Option<String> {
        None
    }

    fn close(&self) -> Result<()>;
}
