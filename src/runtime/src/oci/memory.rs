//! In-memory OCI store.

use std::sync::Arc;

use ocm_core::error::Result;
use ocm_core::typed::UnstructuredTypedObject;

use super::spec::OciRepositorySpec;
use super::store::{ArtifactIndex, IndexedStore, MemoryBlobs, StoreNamespace};
use super::{OciNamespace, OciRepository};

pub const MEMORY_TYPE: &str = "Memory";

/// OCI store living in process memory.
///
/// Clones share the same content. An optional external host makes the
/// store pose as a registry, so global blob references can be resolved
/// against it after registering it with the OCI context.
#[derive(Clone)]
pub struct MemoryOciRepository {
    store: Arc<IndexedStore<MemoryBlobs>>,
    host: Option<String>,
}

impl Default for MemoryOciRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOciRepository {
    pub fn new() -> Self {
        Self {
            store: Arc::new(IndexedStore::new(
                MemoryBlobs::default(),
                ArtifactIndex::default(),
                false,
            )),
            host: None,
        }
    }

    /// A store answering for the given registry host.
    pub fn with_host(host: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            ..Self::new()
        }
    }

    pub fn index(&self) -> ArtifactIndex {
        self.store.index()
    }
}

impl OciRepository for MemoryOciRepository {
    fn get_specification(&self) -> OciRepositorySpec {
        let mut spec = UnstructuredTypedObject::new(MEMORY_TYPE);
        if let Some(host) = &self.host {
            spec.set("host", serde_json::Value::String(host.clone()));
        }
        OciRepositorySpec::Unknown(spec)
    }

    fn lookup_namespace(&self, name: &str) -> Result<Arc<dyn OciNamespace>> {
        Ok(Arc::new(StoreNamespace::new(self.store.clone(), name)))
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.store.repositories())
    }

    fn external_host(&self) -> Option<String> {
        self.host.clone()
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
