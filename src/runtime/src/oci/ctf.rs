//! Common Transport Format: an OCI store in a file system layout.
//!
//! ```text
//! <root>/
//! ├── artifact-index.json
//! └── blobs/
//!     └── sha256.<hex>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};

use super::spec::{CtfSpec, OciRepositorySpec};
use super::store::{ArtifactIndex, BlobStore, IndexedStore, StoreNamespace};
use super::{OciNamespace, OciRepository};
use crate::archive::{AccessMode, ArchiveDir, FileFormat};

pub const ARTIFACT_INDEX_FILE: &str = "artifact-index.json";
pub const BLOBS_DIR: &str = "blobs";

/// File name of a blob: the digest with `:` replaced by `.`.
pub fn blob_file_name(digest: &str) -> Result<String> {
    if digest.is_empty() || digest.contains('/') || digest.contains("..") {
        return Err(OcmError::invalid("digest", digest, "not usable as file name"));
    }
    Ok(digest.replace(':', "."))
}

/// Blobs stored as files in one directory.
#[derive(Debug)]
pub struct FileBlobs {
    dir: PathBuf,
}

impl FileBlobs {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, digest: &str) -> Result<PathBuf> {
        Ok(self.dir.join(blob_file_name(digest)?))
    }
}

impl BlobStore for FileBlobs {
    fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.path_for(digest)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OcmError::not_found("blob", digest),
            _ => OcmError::Io(e).wrap(format!("reading blob {}", path.display())),
        })
    }

    fn put_blob(&self, digest: &str, data: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(digest)?;
        std::fs::write(&path, data)
            .map_err(|e| OcmError::Io(e).wrap(format!("writing blob {}", path.display())))
    }

    fn has_blob(&self, digest: &str) -> bool {
        self.path_for(digest).map(|p| p.exists()).unwrap_or(false)
    }
}

/// A transport archive opened as OCI store.
pub struct CtfOciRepository {
    spec: CtfSpec,
    archive: ArchiveDir,
    store: Arc<IndexedStore<FileBlobs>>,
}

impl CtfOciRepository {
    pub fn open(spec: &CtfSpec) -> Result<Self> {
        let path = Path::new(&spec.file_path);
        let archive = ArchiveDir::open(path, spec.access_mode, spec.file_format)
            .map_err(|e| e.wrap(format!("opening transport archive {}", spec.file_path)))?;
        let index_path = archive.root().join(ARTIFACT_INDEX_FILE);
        let index = if index_path.exists() {
            let data = std::fs::read(&index_path)?;
            serde_json::from_slice::<ArtifactIndex>(&data)
                .map_err(|e| OcmError::invalid("artifact index", spec.file_path.clone(), e.to_string()))?
        } else if spec.access_mode == AccessMode::Create || archive.format() != FileFormat::Directory {
            ArtifactIndex::default()
        } else if std::fs::read_dir(archive.root())?.next().is_none() {
            ArtifactIndex::default()
        } else {
            return Err(OcmError::invalid(
                "transport archive",
                spec.file_path.clone(),
                "artifact-index.json missing",
            ));
        };
        let blobs = FileBlobs::new(archive.root().join(BLOBS_DIR));
        let store = IndexedStore::new(blobs, index, archive.is_readonly());
        tracing::debug!(path = %spec.file_path, format = %archive.format(), "opened transport archive");
        Ok(Self {
            spec: spec.clone(),
            archive,
            store: Arc::new(store),
        })
    }

    /// Create or open a transport archive for writing.
    pub fn create(path: &Path, format: FileFormat) -> Result<Self> {
        let spec = CtfSpec::new(&path.to_string_lossy(), AccessMode::Create).with_format(format);
        Self::open(&spec)
    }

    pub fn index(&self) -> ArtifactIndex {
        self.store.index()
    }

    fn write_index(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.store.index())?;
        std::fs::write(self.archive.root().join(ARTIFACT_INDEX_FILE), data)?;
        Ok(())
    }
}

impl OciRepository for CtfOciRepository {
    fn get_specification(&self) -> OciRepositorySpec {
        OciRepositorySpec::Ctf(self.spec.clone())
    }

    fn lookup_namespace(&self, name: &str) -> Result<Arc<dyn OciNamespace>> {
        Ok(Arc::new(StoreNamespace::new(self.store.clone(), name)))
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        Ok(self.store.repositories())
    }

    fn is_readonly(&self) -> bool {
        self.store.is_readonly()
    }

    fn close(&self) -> Result<()> {
        if !self.store.is_readonly()
            && (self.store.is_modified() || self.spec.access_mode == AccessMode::Create)
        {
            self.write_index()?;
        }
        self.archive.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::Manifest;
    use tempfile::TempDir;

    fn fill(repo: &CtfOciRepository) -> String {
        let ns = repo.lookup_namespace("acme/app").unwrap();
        let config = ns.push_blob("application/json", b"{}").unwrap();
        let layer = ns.push_blob("text/plain", b"hello").unwrap();
        ns.push_manifest(&Manifest::new(config, vec![layer.clone()]), "1.0.0")
            .unwrap();
        layer.digest
    }

    #[test]
    fn test_directory_layout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ctf");
        let repo = CtfOciRepository::create(&path, FileFormat::Directory).unwrap();
        let digest = fill(&repo);
        repo.close().unwrap();

        assert!(path.join(ARTIFACT_INDEX_FILE).exists());
        let blob = path.join(BLOBS_DIR).join(blob_file_name(&digest).unwrap());
        assert_eq!(std::fs::read(blob).unwrap(), b"hello");

        let index: ArtifactIndex =
            serde_json::from_slice(&std::fs::read(path.join(ARTIFACT_INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(index.schema_version, 1);
        assert_eq!(index.artifacts[0].repository, "acme/app");
        assert_eq!(index.artifacts[0].tag.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_tgz_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ctf.tgz");
        let repo = CtfOciRepository::create(&path, FileFormat::Tgz).unwrap();
        let digest = fill(&repo);
        repo.close().unwrap();
        assert!(path.is_file());

        let spec = CtfSpec::new(&path.to_string_lossy(), AccessMode::ReadOnly);
        let reopened = CtfOciRepository::open(&spec).unwrap();
        assert!(reopened.is_readonly());
        let ns = reopened.lookup_namespace("acme/app").unwrap();
        assert_eq!(ns.list_tags().unwrap(), vec!["1.0.0"]);
        assert_eq!(ns.get_blob(&digest).unwrap(), b"hello");
        assert!(ns.push_blob("text/plain", b"x").is_err());
        reopened.close().unwrap();
    }

    #[test]
    fn test_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let spec = CtfSpec::new(
            &tmp.path().join("missing").to_string_lossy(),
            AccessMode::ReadOnly,
        );
        assert!(CtfOciRepository::open(&spec).is_err());
    }

    #[test]
    fn test_blob_file_name() {
        assert_eq!(blob_file_name("sha256:abc").unwrap(), "sha256.abc");
        assert!(blob_file_name("../etc/passwd").is_err());
    }
}
