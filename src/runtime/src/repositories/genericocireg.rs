//! Component versions stored as OCI artifacts.
//!
//! A component `acme.org/app` lives in the namespace
//! `[<subPath>/]component-descriptors/acme.org/app`; each version is an
//! artifact tagged with the version (`+` is written as `.build-`).
//!
//! ```text
//! manifest
//! ├── config   {"componentDescriptorLayer": <descriptor of layer 0>}
//! ├── layer 0  component descriptor (YAML)
//! └── layer n  local blobs, referenced by digest
//! ```

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use ocm_core::compdesc::{self, EncodingFormat};
use ocm_core::error::{OcmError, Result};
use ocm_core::typed::{kind_of, TypedObject};
use ocm_core::ComponentDescriptor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::version::{ComponentVersion, VersionStorage};
use super::{ComponentAccess, ComponentVersionAccess, Repository, RepositorySpec};
use crate::access::{AccessMethod, AccessSpec, BlobAccessMethod, LocalBlobSpec, LOCAL_BLOB_TYPE};
use crate::blob::{BlobAccess, LazyBlob};
use crate::blobhandler::BlobSink;
use crate::contexts::ocm::OcmContext;
use crate::oci::spec::OCI_REGISTRY_TYPE;
use crate::oci::{Descriptor, Manifest, OciNamespace, OciRepository, OciRepositorySpec};

pub const COMPONENT_DESCRIPTOR_PREFIX: &str = "component-descriptors";

pub const COMPONENT_DESCRIPTOR_YAML_MIME: &str =
    "application/vnd.ocm.software.component-descriptor.v2+yaml";
pub const COMPONENT_DESCRIPTOR_TAR_MIME: &str =
    "application/vnd.ocm.software.component-descriptor.v2+yaml+tar";
pub const COMPONENT_DESCRIPTOR_JSON_MIME: &str =
    "application/vnd.ocm.software.component-descriptor.v2+json";
pub const COMPONENT_CONFIG_MIME: &str = "application/vnd.ocm.software.component.config.v1+json";

/// Manifest annotation naming the stored component version.
pub const VERSION_ANNOTATION: &str = "software.ocm.componentversion";

const DESCRIPTOR_FILE: &str = "component-descriptor.yaml";

/// OCI tags do not allow `+`.
pub fn version_to_tag(version: &str) -> String {
    version.replace('+', ".build-")
}

pub fn tag_to_version(tag: &str) -> String {
    tag.replace(".build-", "+")
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component_descriptor_layer: Option<Descriptor>,
}

struct RepoInner {
    ctx: Arc<OcmContext>,
    oci: Arc<dyn OciRepository>,
    spec: RepositorySpec,
    prefix: String,
}

impl RepoInner {
    fn namespace_name(&self, component: &str) -> String {
        format!("{}/{}", self.prefix, component)
    }

    fn namespace(&self, component: &str) -> Result<Arc<dyn OciNamespace>> {
        self.oci.lookup_namespace(&self.namespace_name(component))
    }
}

/// OCM repository on top of an OCI store.
pub struct OciComponentRepository {
    inner: Arc<RepoInner>,
}

impl OciComponentRepository {
    pub fn new(ctx: Arc<OcmContext>, oci: Arc<dyn OciRepository>) -> Self {
        let spec = oci.get_specification();
        Self::with_spec(ctx, oci, spec)
    }

    /// Repository reporting `oci_spec` instead of the store's own
    /// specification, e.g. a registry served by a registered store.
    pub fn with_spec(
        ctx: Arc<OcmContext>,
        oci: Arc<dyn OciRepository>,
        oci_spec: OciRepositorySpec,
    ) -> Self {
        let prefix = match oci_spec.sub_path() {
            "" => COMPONENT_DESCRIPTOR_PREFIX.to_string(),
            sub => format!("{}/{}", sub.trim_matches('/'), COMPONENT_DESCRIPTOR_PREFIX),
        };
        Self {
            inner: Arc::new(RepoInner {
                ctx,
                oci,
                spec: RepositorySpec::Oci(oci_spec),
                prefix,
            }),
        }
    }

    pub fn oci(&self) -> &Arc<dyn OciRepository> {
        &self.inner.oci
    }

    fn component(&self, name: &str) -> Result<OciComponent> {
        Ok(OciComponent {
            inner: self.inner.clone(),
            name: name.to_string(),
            ns: self.inner.namespace(name)?,
        })
    }
}

impl Repository for OciComponentRepository {
    fn context(&self) -> &Arc<OcmContext> {
        &self.inner.ctx
    }

    fn get_specification(&self) -> RepositorySpec {
        self.inner.spec.clone()
    }

    fn exists_component_version(&self, name: &str, version: &str) -> Result<bool> {
        self.component(name)?.has_version(version)
    }

    fn lookup_component(&self, name: &str) -> Result<Arc<dyn ComponentAccess>> {
        let comp = self.component(name)?;
        if comp.list_versions()?.is_empty() {
            return Err(OcmError::not_found("component", name));
        }
        Ok(Arc::new(comp))
    }

    fn write_component(&self, name: &str) -> Result<Arc<dyn ComponentAccess>> {
        Ok(Arc::new(self.component(name)?))
    }

    fn lookup_component_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Arc<dyn ComponentVersionAccess>> {
        self.component(name)?.lookup_version(version)
    }

    fn list_components(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.inner.prefix);
        let mut names: Vec<String> = self
            .inner
            .oci
            .namespaces()?
            .into_iter()
            .filter_map(|ns| ns.strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn is_readonly(&self) -> bool {
        self.inner.oci.is_readonly()
    }

    fn close(&self) -> Result<()> {
        self.inner.oci.close()
    }
}

struct OciComponent {
    inner: Arc<RepoInner>,
    name: String,
    ns: Arc<dyn OciNamespace>,
}

impl OciComponent {
    fn storage(&self, version: &str, layers: Vec<Descriptor>) -> Arc<OciVersionStorage> {
        Arc::new(OciVersionStorage {
            inner: self.inner.clone(),
            ns: self.ns.clone(),
            version: version.to_string(),
            layers: Mutex::new(layers),
        })
    }
}

impl ComponentAccess for OciComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_versions(&self) -> Result<Vec<String>> {
        let mut versions: Vec<String> = self
            .ns
            .list_tags()?
            .iter()
            .map(|t| tag_to_version(t))
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn has_version(&self, version: &str) -> Result<bool> {
        self.ns.has_artifact(&version_to_tag(version))
    }

    fn lookup_version(&self, version: &str) -> Result<Arc<dyn ComponentVersionAccess>> {
        let (manifest, digest) = self.ns.get_manifest(&version_to_tag(version)).map_err(|e| {
            if e.is_not_found() {
                OcmError::not_found("component version", format!("{}:{}", self.name, version))
            } else {
                e
            }
        })?;
        let desc = read_descriptor(self.ns.as_ref(), &manifest)
            .map_err(|e| e.wrap(format!("component version {}:{}", self.name, version)))?;
        if desc.name() != self.name || desc.version() != version {
            return Err(OcmError::invalid(
                "component version",
                format!("{}:{}", self.name, version),
                format!("artifact holds {}:{}", desc.name(), desc.version()),
            ));
        }
        tracing::debug!(component = %self.name, version = %version, digest = %digest, "loaded component version");
        let storage = self.storage(version, manifest.layers.clone());
        Ok(Arc::new(ComponentVersion::new(
            self.inner.ctx.clone(),
            desc,
            storage,
        )))
    }

    fn new_version(
        &self,
        version: &str,
        overwrite: bool,
    ) -> Result<Arc<dyn ComponentVersionAccess>> {
        if !overwrite && self.has_version(version)? {
            return Err(OcmError::already_exists(
                "component version",
                format!("{}:{}", self.name, version),
            ));
        }
        let desc = ComponentDescriptor::new(&self.name, version, "");
        Ok(Arc::new(ComponentVersion::new_pending(
            self.inner.ctx.clone(),
            desc,
            self.storage(version, Vec::new()),
        )))
    }

    fn add_version(&self, cv: &dyn ComponentVersionAccess, overwrite: bool) -> Result<()> {
        if cv.name() != self.name {
            return Err(OcmError::invalid(
                "component version",
                format!("{}:{}", cv.name(), cv.version()),
                format!("not a version of {}", self.name),
            ));
        }
        if cv.repository_spec() != self.inner.spec {
            return Err(OcmError::invalid(
                "component version",
                format!("{}:{}", cv.name(), cv.version()),
                "belongs to another repository",
            ));
        }
        if !overwrite && self.has_version(cv.version())? {
            return Err(OcmError::already_exists(
                "component version",
                format!("{}:{}", self.name, cv.version()),
            ));
        }
        cv.update()
    }
}

/// Decode the descriptor of a component version artifact.
fn read_descriptor(ns: &dyn OciNamespace, manifest: &Manifest) -> Result<ComponentDescriptor> {
    let config: ComponentConfig = serde_json::from_slice(&ns.get_blob(&manifest.config.digest)?)
        .map_err(|e| OcmError::invalid("component config", &manifest.config.digest, e.to_string()))?;
    let layer = config
        .component_descriptor_layer
        .as_ref()
        .or_else(|| manifest.layers.first())
        .ok_or_else(|| OcmError::not_found("component descriptor layer", ns.name()))?;
    let data = ns.get_blob(&layer.digest)?;
    match layer.media_type.as_str() {
        COMPONENT_DESCRIPTOR_YAML_MIME | COMPONENT_DESCRIPTOR_JSON_MIME => compdesc::decode(&data),
        COMPONENT_DESCRIPTOR_TAR_MIME => compdesc::decode(&descriptor_from_tar(&data)?),
        other => Err(OcmError::invalid(
            "component descriptor layer",
            &layer.digest,
            format!("unexpected media type {}", other),
        )),
    }
}

fn descriptor_from_tar(data: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(data);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy().trim_start_matches("./") == DESCRIPTOR_FILE {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(OcmError::not_found("tar entry", DESCRIPTOR_FILE))
}

/// Digests of all local blobs the descriptor refers to.
fn local_references(desc: &ComponentDescriptor) -> HashSet<String> {
    let accesses = desc
        .component
        .resources
        .iter()
        .filter_map(|r| r.access.as_ref())
        .chain(desc.component.sources.iter().filter_map(|s| s.access.as_ref()));
    accesses
        .filter(|a| kind_of(a.get_type()) == LOCAL_BLOB_TYPE)
        .filter_map(|a| a.get("localReference").and_then(|v| v.as_str()))
        .flat_map(|r| r.split(',').map(str::to_string).collect::<Vec<_>>())
        .collect()
}

struct OciVersionStorage {
    inner: Arc<RepoInner>,
    ns: Arc<dyn OciNamespace>,
    version: String,
    /// Blobs present in the namespace for this version
    layers: Mutex<Vec<Descriptor>>,
}

impl OciVersionStorage {
    fn layer(&self, digest: &str) -> Option<Descriptor> {
        self.layers.lock().iter().find(|l| l.digest == digest).cloned()
    }
}

impl BlobSink for OciVersionStorage {
    fn store_local(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
    ) -> Result<LocalBlobSpec> {
        let data = blob.get()?;
        let desc = self.ns.push_blob(blob.mime_type(), &data)?;
        {
            let mut layers = self.layers.lock();
            if !layers.iter().any(|l| l.digest == desc.digest) {
                layers.push(desc.clone());
            }
        }
        Ok(LocalBlobSpec::new(&desc.digest, blob.mime_type()).with_reference_name(reference_hint))
    }

    fn external_namespace(&self) -> Option<String> {
        self.inner
            .oci
            .external_host()
            .map(|host| format!("{}/{}", host, self.ns.name()))
    }
}

impl VersionStorage for OciVersionStorage {
    fn as_sink(&self) -> &dyn BlobSink {
        self
    }

    fn repository_spec(&self) -> RepositorySpec {
        self.inner.spec.clone()
    }

    fn repository_type(&self) -> &str {
        // stores with an external host are addressable like registries
        if self.inner.oci.external_host().is_some() {
            OCI_REGISTRY_TYPE
        } else {
            self.inner.spec.get_type()
        }
    }

    fn local_access(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
        let AccessSpec::LocalBlob(local) = spec else {
            return Err(OcmError::not_supported(format!(
                "local access {} in OCI repository",
                spec.get_type()
            )));
        };
        let digests: Vec<String> = local
            .local_reference
            .split(',')
            .map(str::to_string)
            .collect();
        let mut size = 0;
        for d in &digests {
            let layer = self
                .layer(d)
                .ok_or_else(|| OcmError::not_found("local blob", d.clone()))?;
            size += layer.size;
        }

        let ns = self.ns.clone();
        let chunks = digests.clone();
        let blob = LazyBlob::new(&local.media_type, move || {
            let mut data = Vec::new();
            for d in &chunks {
                data.extend(ns.get_blob(d)?);
            }
            Ok(data)
        });
        // chunked blobs get their digest from the first read
        let blob = match digests.as_slice() {
            [single] => blob.with_info(single, size),
            _ => blob,
        };
        Ok(BlobAccessMethod::boxed(&local.object_type, blob))
    }

    fn is_readonly(&self) -> bool {
        self.inner.oci.is_readonly()
    }

    fn commit(&self, desc: &ComponentDescriptor) -> Result<()> {
        let yaml = compdesc::encode(desc, EncodingFormat::Yaml)?;
        let desc_layer = self.ns.push_blob(COMPONENT_DESCRIPTOR_YAML_MIME, &yaml)?;
        let config = ComponentConfig {
            component_descriptor_layer: Some(desc_layer.clone()),
        };
        let config = self
            .ns
            .push_blob(COMPONENT_CONFIG_MIME, &serde_json::to_vec(&config)?)?;

        let referenced = local_references(desc);
        let mut layers = vec![desc_layer];
        for layer in self.layers.lock().iter() {
            if referenced.contains(&layer.digest) && !layers.iter().any(|l| l.digest == layer.digest) {
                layers.push(layer.clone());
            }
        }
        for digest in &referenced {
            if !layers.iter().any(|l| &l.digest == digest) {
                tracing::warn!(digest = %digest, component = %desc.name(), "local blob not stored with this version");
            }
        }

        let annotation = format!("{}:{}", self.ns.name(), self.version);
        let manifest = Manifest::new(config, layers).with_annotation(VERSION_ANNOTATION, &annotation);
        let pushed = self.ns.push_manifest(&manifest, &version_to_tag(&self.version))?;
        tracing::info!(
            namespace = %self.ns.name(),
            version = %self.version,
            digest = %pushed.digest,
            "stored component version"
        );
        Ok(())
    }
}

/// Encode a descriptor in the tar form some tools write as layer 0.
pub fn descriptor_tar(desc: &ComponentDescriptor) -> Result<Vec<u8>> {
    let yaml = compdesc::encode(desc, EncodingFormat::Yaml)?;
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(yaml.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, DESCRIPTOR_FILE, yaml.as_slice())?;
    Ok(builder.into_inner()?)
}
