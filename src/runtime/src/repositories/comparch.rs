//! Component archive: one component version in a file system layout.
//!
//! ```text
//! <root>/
//! ├── component-descriptor.yaml
//! └── blobs/
//!     └── sha256.<hex>
//! ```
//!
//! The layout may be a directory, a tar or a gzipped tar file. Archives
//! are unpacked on open and written back when the repository is closed.

use std::path::Path;
use std::sync::Arc;

use ocm_core::compdesc::{self, EncodingFormat};
use ocm_core::error::{OcmError, Result};
use ocm_core::ComponentDescriptor;
use serde::{Deserialize, Serialize};

use super::version::{ComponentVersion, VersionStorage};
use super::{ComponentAccess, ComponentVersionAccess, Repository, RepositorySpec};
use crate::access::{AccessMethod, AccessSpec, BlobAccessMethod, LocalBlobSpec};
use crate::archive::{AccessMode, ArchiveDir, FileFormat};
use crate::blob::{sha256_digest, BlobAccess, FileBlob};
use crate::blobhandler::BlobSink;
use crate::contexts::ocm::OcmContext;
use crate::oci::ctf::blob_file_name;

pub const COMPONENT_ARCHIVE_TYPE: &str = "ComponentArchive";
pub const COMPONENT_DESCRIPTOR_FILE: &str = "component-descriptor.yaml";
pub const BLOBS_DIR: &str = "blobs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentArchiveSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<FileFormat>,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl ComponentArchiveSpec {
    pub fn new(file_path: &str, access_mode: AccessMode) -> Self {
        Self {
            object_type: COMPONENT_ARCHIVE_TYPE.to_string(),
            file_path: file_path.to_string(),
            file_format: None,
            access_mode,
        }
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.file_format = Some(format);
        self
    }
}

struct ArchiveStorage {
    spec: ComponentArchiveSpec,
    archive: ArchiveDir,
}

impl ArchiveStorage {
    fn blob_method(&self, kind: &str, name: &str, media_type: &str) -> Result<Box<dyn AccessMethod>> {
        if name.contains('/') || name.contains("..") {
            return Err(OcmError::invalid("local blob reference", name, "not a blob file name"));
        }
        let path = self.archive.root().join(BLOBS_DIR).join(name);
        if !path.is_file() {
            return Err(OcmError::not_found("blob", name));
        }
        Ok(BlobAccessMethod::boxed(kind, FileBlob::new(path, media_type)))
    }
}

impl BlobSink for ArchiveStorage {
    fn store_local(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
    ) -> Result<LocalBlobSpec> {
        let data = blob.get()?;
        let name = blob_file_name(&sha256_digest(&data))?;
        let dir = self.archive.root().join(BLOBS_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(&name);
        if !path.exists() {
            std::fs::write(&path, &data)
                .map_err(|e| OcmError::Io(e).wrap(format!("writing blob {}", path.display())))?;
        }
        Ok(LocalBlobSpec::new(&name, blob.mime_type()).with_reference_name(reference_hint))
    }
}

impl VersionStorage for ArchiveStorage {
    fn as_sink(&self) -> &dyn BlobSink {
        self
    }

    fn repository_spec(&self) -> RepositorySpec {
        RepositorySpec::ComponentArchive(self.spec.clone())
    }

    fn repository_type(&self) -> &str {
        COMPONENT_ARCHIVE_TYPE
    }

    fn local_access(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
        match spec {
            AccessSpec::LocalBlob(l) => {
                self.blob_method(&l.object_type, &l.local_reference, &l.media_type)
            }
            AccessSpec::LocalFilesystemBlob(f) => {
                self.blob_method(&f.object_type, &f.filename, &f.media_type)
            }
            other => Err(OcmError::not_supported(format!(
                "local access {} in component archive",
                ocm_core::TypedObject::get_type(other)
            ))),
        }
    }

    fn is_readonly(&self) -> bool {
        self.archive.is_readonly()
    }

    fn commit(&self, desc: &ComponentDescriptor) -> Result<()> {
        let data = compdesc::encode(desc, EncodingFormat::Yaml)?;
        let path = self.archive.root().join(COMPONENT_DESCRIPTOR_FILE);
        std::fs::write(&path, data)
            .map_err(|e| OcmError::Io(e).wrap(format!("writing {}", path.display())))
    }
}

/// A component archive opened as repository with a single component version.
pub struct ComponentArchive {
    ctx: Arc<OcmContext>,
    storage: Arc<ArchiveStorage>,
    version: Arc<ComponentVersion>,
}

impl ComponentArchive {
    /// Create a new archive for the given component version.
    pub fn create(
        ctx: &Arc<OcmContext>,
        path: &Path,
        format: FileFormat,
        name: &str,
        version: &str,
        provider: &str,
    ) -> Result<Arc<Self>> {
        let spec = ComponentArchiveSpec::new(&path.to_string_lossy(), AccessMode::Create)
            .with_format(format);
        let archive = ArchiveDir::open(path, AccessMode::Create, Some(format))?;
        if archive.root().join(COMPONENT_DESCRIPTOR_FILE).exists() {
            return Err(OcmError::already_exists("component archive", spec.file_path));
        }
        let storage = Arc::new(ArchiveStorage { spec, archive });
        let desc = ComponentDescriptor::new(name, version, provider);
        let cv = ComponentVersion::new_pending(ctx.clone(), desc, storage.clone());
        tracing::info!(path = %path.display(), component = %name, version = %version, "created component archive");
        Ok(Arc::new(Self {
            ctx: ctx.clone(),
            storage,
            version: Arc::new(cv),
        }))
    }

    pub fn open(ctx: &Arc<OcmContext>, spec: &ComponentArchiveSpec) -> Result<Arc<Self>> {
        let path = Path::new(&spec.file_path);
        let archive = ArchiveDir::open(path, spec.access_mode, spec.file_format)
            .map_err(|e| e.wrap(format!("opening component archive {}", spec.file_path)))?;
        let desc_path = archive.root().join(COMPONENT_DESCRIPTOR_FILE);
        let data = std::fs::read(&desc_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OcmError::invalid(
                "component archive",
                spec.file_path.clone(),
                "component-descriptor.yaml missing",
            ),
            _ => OcmError::Io(e).wrap(format!("reading {}", desc_path.display())),
        })?;
        let desc = compdesc::decode(&data)
            .map_err(|e| e.wrap(format!("component archive {}", spec.file_path)))?;
        let storage = Arc::new(ArchiveStorage {
            spec: spec.clone(),
            archive,
        });
        let cv = ComponentVersion::new(ctx.clone(), desc, storage.clone());
        Ok(Arc::new(Self {
            ctx: ctx.clone(),
            storage,
            version: Arc::new(cv),
        }))
    }

    pub fn open_path(ctx: &Arc<OcmContext>, path: &Path, mode: AccessMode) -> Result<Arc<Self>> {
        Self::open(ctx, &ComponentArchiveSpec::new(&path.to_string_lossy(), mode))
    }

    /// The component version stored in the archive.
    pub fn version(&self) -> Arc<dyn ComponentVersionAccess> {
        self.version.clone()
    }

    pub fn format(&self) -> FileFormat {
        self.storage.archive.format()
    }

    fn component(&self) -> Arc<dyn ComponentAccess> {
        Arc::new(ArchiveComponent {
            version: self.version.clone(),
        })
    }
}

impl Repository for ComponentArchive {
    fn context(&self) -> &Arc<OcmContext> {
        &self.ctx
    }

    fn get_specification(&self) -> RepositorySpec {
        self.storage.repository_spec()
    }

    fn exists_component_version(&self, name: &str, version: &str) -> Result<bool> {
        Ok(self.version.name() == name && self.version.version() == version)
    }

    fn lookup_component(&self, name: &str) -> Result<Arc<dyn ComponentAccess>> {
        if name != self.version.name() {
            return Err(OcmError::not_found("component", name));
        }
        Ok(self.component())
    }

    fn write_component(&self, name: &str) -> Result<Arc<dyn ComponentAccess>> {
        if name != self.version.name() {
            return Err(OcmError::not_supported(format!(
                "component {} in archive of {}",
                name,
                self.version.name()
            )));
        }
        Ok(self.component())
    }

    fn list_components(&self) -> Result<Vec<String>> {
        Ok(vec![self.version.name().to_string()])
    }

    fn is_readonly(&self) -> bool {
        self.storage.is_readonly()
    }

    fn close(&self) -> Result<()> {
        self.version.close()?;
        self.storage.archive.close()
    }
}

struct ArchiveComponent {
    version: Arc<ComponentVersion>,
}

impl ComponentAccess for ArchiveComponent {
    fn name(&self) -> &str {
        self.version.name()
    }

    fn list_versions(&self) -> Result<Vec<String>> {
        Ok(vec![self.version.version().to_string()])
    }

    fn lookup_version(&self, version: &str) -> Result<Arc<dyn ComponentVersionAccess>> {
        if version != self.version.version() {
            return Err(OcmError::not_found(
                "component version",
                format!("{}:{}", self.version.name(), version),
            ));
        }
        Ok(self.version.clone())
    }

    fn new_version(
        &self,
        _version: &str,
        _overwrite: bool,
    ) -> Result<Arc<dyn ComponentVersionAccess>> {
        Err(OcmError::not_supported("new versions in a component archive"))
    }

    fn add_version(&self, _cv: &dyn ComponentVersionAccess, _overwrite: bool) -> Result<()> {
        Err(OcmError::not_supported("adding versions to a component archive"))
    }
}
