//! Blob store plus artifact index, shared by the memory and CTF stores.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::manifest::{Descriptor, Manifest};
use super::{is_digest, OciNamespace};
use crate::blob::sha256_digest;

pub const ARTIFACT_INDEX_SCHEMA_VERSION: u32 = 1;

/// Index entry: an artifact of a repository, optionally tagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub digest: String,
}

/// `artifact-index.json` of a transport archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactIndex {
    pub schema_version: u32,
    #[serde(default)]
    pub artifacts: Vec<ArtifactMeta>,
}

impl Default for ArtifactIndex {
    fn default() -> Self {
        Self {
            schema_version: ARTIFACT_INDEX_SCHEMA_VERSION,
            artifacts: Vec::new(),
        }
    }
}

impl ArtifactIndex {
    pub fn lookup_tag(&self, repository: &str, tag: &str) -> Option<&ArtifactMeta> {
        self.artifacts
            .iter()
            .find(|a| a.repository == repository && a.tag.as_deref() == Some(tag))
    }

    pub fn has_digest(&self, repository: &str, digest: &str) -> bool {
        self.artifacts
            .iter()
            .any(|a| a.repository == repository && a.digest == digest)
    }

    /// Record an artifact, moving the tag if it pointed elsewhere.
    pub fn add(&mut self, repository: &str, tag: Option<&str>, digest: &str) {
        if let Some(tag) = tag {
            self.artifacts
                .retain(|a| !(a.repository == repository && a.tag.as_deref() == Some(tag)));
        }
        // untagged entries for the same digest are superseded
        self.artifacts
            .retain(|a| !(a.repository == repository && a.tag.is_none() && a.digest == digest));
        self.artifacts.push(ArtifactMeta {
            repository: repository.to_string(),
            tag: tag.map(str::to_string),
            digest: digest.to_string(),
        });
    }

    pub fn tags(&self, repository: &str) -> Vec<String> {
        let mut tags: Vec<String> = self
            .artifacts
            .iter()
            .filter(|a| a.repository == repository)
            .filter_map(|a| a.tag.clone())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    pub fn repositories(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.artifacts.iter().map(|a| a.repository.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// Content addressed blob storage.
pub trait BlobStore: Send + Sync {
    fn get_blob(&self, digest: &str) -> Result<Vec<u8>>;
    fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()>;
    fn has_blob(&self, digest: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryBlobs {
    blobs: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl BlobStore for MemoryBlobs {
    fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(digest)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| OcmError::not_found("blob", digest))
    }

    fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .entry(digest.to_string())
            .or_insert_with(|| Arc::new(data.to_vec()));
        Ok(())
    }

    fn has_blob(&self, digest: &str) -> bool {
        self.blobs.read().contains_key(digest)
    }
}

/// Blobs plus artifact index.
pub struct IndexedStore<B> {
    blobs: B,
    index: RwLock<ArtifactIndex>,
    readonly: bool,
    modified: AtomicBool,
}

impl<B: BlobStore> IndexedStore<B> {
    pub fn new(blobs: B, index: ArtifactIndex, readonly: bool) -> Self {
        Self {
            blobs,
            index: RwLock::new(index),
            readonly,
            modified: AtomicBool::new(false),
        }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn index(&self) -> ArtifactIndex {
        self.index.read().clone()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Whether anything was written since creation.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn repositories(&self) -> Vec<String> {
        self.index.read().repositories()
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(OcmError::not_supported("write access to read-only store"));
        }
        Ok(())
    }

    fn store(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        self.check_writable()?;
        let desc = Descriptor::for_data(media_type, data);
        if !self.blobs.has_blob(&desc.digest) {
            self.blobs.put_blob(&desc.digest, data)?;
            self.modified.store(true, Ordering::SeqCst);
        }
        Ok(desc)
    }
}

/// Namespace view on an [`IndexedStore`].
pub struct StoreNamespace<B> {
    store: Arc<IndexedStore<B>>,
    name: String,
}

impl<B: BlobStore> StoreNamespace<B> {
    pub fn new(store: Arc<IndexedStore<B>>, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    fn resolve(&self, reference: &str) -> Option<String> {
        let index = self.store.index.read();
        if is_digest(reference) {
            index
                .has_digest(&self.name, reference)
                .then(|| reference.to_string())
        } else {
            index.lookup_tag(&self.name, reference).map(|a| a.digest.clone())
        }
    }
}

impl<B: BlobStore> OciNamespace for StoreNamespace<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_manifest(&self, reference: &str) -> Result<(Manifest, String)> {
        let digest = self.resolve(reference).ok_or_else(|| {
            OcmError::not_found("artifact", format!("{}:{}", self.name, reference))
        })?;
        let data = self.store.blobs.get_blob(&digest)?;
        Ok((Manifest::from_slice(&data)?, digest))
    }

    fn push_manifest(&self, manifest: &Manifest, tag: &str) -> Result<Descriptor> {
        self.store.check_writable()?;
        for layer in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            if !self.store.blobs.has_blob(&layer.digest) {
                return Err(OcmError::not_found("blob", layer.digest.clone())
                    .wrap(format!("pushing manifest {}:{}", self.name, tag)));
            }
        }
        let data = manifest.to_bytes()?;
        let media_type = manifest
            .media_type
            .clone()
            .unwrap_or_else(|| super::MANIFEST_MEDIA_TYPE.to_string());
        let desc = self.store.store(&media_type, &data)?;
        let tag = (!tag.is_empty()).then_some(tag);
        self.store.index.write().add(&self.name, tag, &desc.digest);
        self.store.modified.store(true, Ordering::SeqCst);
        tracing::debug!(namespace = %self.name, tag = ?tag, digest = %desc.digest, "stored manifest");
        Ok(desc)
    }

    fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let data = self.store.blobs.get_blob(digest)?;
        if sha256_digest(&data) != digest {
            return Err(OcmError::invalid("blob", digest, "content does not match digest"));
        }
        Ok(data)
    }

    fn push_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        self.store.store(media_type, data)
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        Ok(self.store.index.read().tags(&self.name))
    }

    fn has_artifact(&self, reference: &str) -> Result<bool> {
        Ok(self.resolve(reference).is_some())
    }
}
