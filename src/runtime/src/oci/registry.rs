//! OCI distribution registry store.
//!
//! Uses the `oci-distribution` crate. Its client is async; every call is
//! driven to completion on a private current-thread runtime, so this store
//! must not be used from inside another tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use ocm_core::error::{OcmError, Result};
use parking_lot::Mutex;

use super::manifest::{Descriptor, Manifest};
use super::reference::host_of;
use super::spec::{OciRepositorySpec, RegistrySpec};
use super::{OciNamespace, OciRepository};
use crate::contexts::credentials::{Credentials, PASSWORD, USERNAME};

/// Registry authentication derived from a credential property set.
fn to_oci_auth(credentials: Option<&Credentials>) -> OciRegistryAuth {
    match credentials.and_then(|c| Some((c.get_property(USERNAME)?, c.get_property(PASSWORD)?))) {
        Some((u, p)) => OciRegistryAuth::Basic(u.to_string(), p.to_string()),
        None => OciRegistryAuth::Anonymous,
    }
}

struct RegistryInner {
    host: String,
    client: Client,
    auth: OciRegistryAuth,
    runtime: tokio::runtime::Runtime,
    /// Blobs pushed but not yet referenced by a pushed manifest
    staged: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl RegistryInner {
    fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.runtime.block_on(f)
    }

    fn registry_error(&self, what: &str, err: impl std::fmt::Display) -> OcmError {
        OcmError::Registry {
            registry: self.host.clone(),
            message: format!("{}: {}", what, err),
        }
    }

    fn reference(&self, repository: &str, version: &str) -> Result<Reference> {
        let sep = if super::is_digest(version) { '@' } else { ':' };
        let s = format!("{}/{}{}{}", self.host, repository, sep, version);
        s.parse::<Reference>()
            .map_err(|e| OcmError::invalid("artifact reference", s.clone(), e.to_string()))
    }
}

/// Whether a client error reports a missing repository, tag or blob.
fn is_missing(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(
                e.code,
                OciErrorCode::NameUnknown | OciErrorCode::ManifestUnknown | OciErrorCode::BlobUnknown
            )
        }),
        OciDistributionError::ServerError { code, .. } => *code == 404,
        _ => false,
    }
}

/// An OCI registry reached through the distribution API.
pub struct RegistryOciRepository {
    spec: RegistrySpec,
    inner: Arc<RegistryInner>,
}

impl RegistryOciRepository {
    pub fn new(spec: &RegistrySpec, credentials: Option<&Credentials>) -> Result<Self> {
        let protocol = if spec.base_url.starts_with("http://") {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OcmError::Io(e).wrap("starting registry client runtime"))?;
        let host = host_of(&spec.base_url).to_string();
        tracing::debug!(
            registry = %host,
            authenticated = credentials.is_some(),
            "opening registry"
        );
        Ok(Self {
            spec: spec.clone(),
            inner: Arc::new(RegistryInner {
                host,
                client,
                auth: to_oci_auth(credentials),
                runtime,
                staged: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl OciRepository for RegistryOciRepository {
    fn get_specification(&self) -> OciRepositorySpec {
        OciRepositorySpec::Registry(self.spec.clone())
    }

    fn lookup_namespace(&self, name: &str) -> Result<Arc<dyn OciNamespace>> {
        Ok(Arc::new(RegistryNamespace {
            inner: self.inner.clone(),
            name: name.to_string(),
        }))
    }

    fn namespaces(&self) -> Result<Vec<String>> {
        Err(OcmError::not_supported("namespace listing for registries"))
    }

    fn external_host(&self) -> Option<String> {
        Some(self.inner.host.clone())
    }

    fn close(&self) -> Result<()> {
        let dropped = self.inner.staged.lock().len();
        if dropped > 0 {
            tracing::warn!(registry = %self.inner.host, blobs = dropped, "discarding unreferenced blobs");
        }
        Ok(())
    }
}

struct RegistryNamespace {
    inner: Arc<RegistryInner>,
    name: String,
}

impl RegistryNamespace {
    fn pull_blob(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let reference = self.inner.reference(&self.name, &desc.digest)?;
        let oci_desc: OciDescriptor = serde_json::from_value(serde_json::to_value(desc)?)?;
        let mut data: Vec<u8> = Vec::new();
        self.inner
            .block_on(async {
                // blob pulls reuse the token of a prior authentication
                self.inner
                    .client
                    .auth(&reference, &self.inner.auth, RegistryOperation::Pull)
                    .await?;
                self.inner.client.pull_blob(&reference, &oci_desc, &mut data).await
            })
            .map_err(|e| {
                if is_missing(&e) {
                    OcmError::not_found("blob", format!("{}@{}", self.name, desc.digest))
                } else {
                    self.inner.registry_error(&format!("pulling blob {}", desc.digest), e)
                }
            })?;
        Ok(data)
    }

    /// Content for a descriptor, from the staging area or the registry.
    fn content(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        if let Some((_, data)) = self.inner.staged.lock().get(&desc.digest) {
            return Ok(data.clone());
        }
        self.pull_blob(desc)
    }
}

impl OciNamespace for RegistryNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_manifest(&self, reference: &str) -> Result<(Manifest, String)> {
        let oci_ref = self.inner.reference(&self.name, reference)?;
        let (manifest, digest) = self
            .inner
            .block_on(self.inner.client.pull_image_manifest(&oci_ref, &self.inner.auth))
            .map_err(|e| {
                if is_missing(&e) {
                    OcmError::not_found("artifact", format!("{}:{}", self.name, reference))
                } else {
                    self.inner.registry_error("pulling manifest", e)
                }
            })?;
        let manifest: Manifest = serde_json::from_value(serde_json::to_value(&manifest)?)?;
        Ok((manifest, digest))
    }

    fn push_manifest(&self, manifest: &Manifest, tag: &str) -> Result<Descriptor> {
        let reference = self.inner.reference(&self.name, tag)?;
        let config = Config::new(
            self.content(&manifest.config)?,
            manifest.config.media_type.clone(),
            None,
        );
        let layers = manifest
            .layers
            .iter()
            .map(|l| Ok(ImageLayer::new(self.content(l)?, l.media_type.clone(), None)))
            .collect::<Result<Vec<_>>>()?;
        let oci_manifest: OciImageManifest =
            serde_json::from_value(serde_json::to_value(manifest)?)?;

        let response = self
            .inner
            .block_on(self.inner.client.push(
                &reference,
                &layers,
                config,
                &self.inner.auth,
                Some(oci_manifest),
            ))
            .map_err(|e| self.inner.registry_error("pushing artifact", e))?;

        let mut staged = self.inner.staged.lock();
        for d in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            staged.remove(&d.digest);
        }
        tracing::info!(
            namespace = %self.name,
            tag = %tag,
            manifest_url = %response.manifest_url,
            "pushed artifact"
        );
        manifest.descriptor()
    }

    fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        self.content(&Descriptor {
            digest: digest.to_string(),
            ..Default::default()
        })
    }

    fn push_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let desc = Descriptor::for_data(media_type, data);
        self.inner
            .staged
            .lock()
            .insert(desc.digest.clone(), (media_type.to_string(), data.to_vec()));
        Ok(desc)
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        let reference = self.inner.reference(&self.name, "latest")?;
        match self.inner.block_on(self.inner.client.list_tags(
            &reference,
            &self.inner.auth,
            None,
            None,
        )) {
            Ok(response) => Ok(response.tags),
            Err(e) if is_missing(&e) => Ok(Vec::new()),
            Err(e) => Err(self.inner.registry_error("listing tags", e)),
        }
    }

    fn has_artifact(&self, reference: &str) -> Result<bool> {
        match self.get_manifest(reference) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_from_credentials() {
        assert!(matches!(to_oci_auth(None), OciRegistryAuth::Anonymous));
        let creds = Credentials::new()
            .with(USERNAME, "user")
            .with(PASSWORD, "pass");
        assert!(matches!(to_oci_auth(Some(&creds)), OciRegistryAuth::Basic(_, _)));
        let partial = Credentials::new().with(USERNAME, "user");
        assert!(matches!(to_oci_auth(Some(&partial)), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_reference_building() {
        let repo = RegistryOciRepository::new(&RegistrySpec::new("https://ghcr.io"), None).unwrap();
        let r = repo.inner.reference("acme/app", "1.0.0").unwrap();
        assert_eq!(r.to_string(), "ghcr.io/acme/app:1.0.0");
        let d = repo
            .inner
            .reference(
                "acme/app",
                "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890",
            )
            .unwrap();
        assert!(d.to_string().contains("@sha256:"));
        assert_eq!(repo.external_host().as_deref(), Some("ghcr.io"));
    }

    #[test]
    fn test_staged_blobs_are_readable() {
        let repo = RegistryOciRepository::new(&RegistrySpec::new("ghcr.io"), None).unwrap();
        let ns = repo.lookup_namespace("acme/app").unwrap();
        let desc = ns.push_blob("text/plain", b"hello").unwrap();
        assert_eq!(ns.get_blob(&desc.digest).unwrap(), b"hello");
    }

    fn registry_error(code: &str) -> OciDistributionError {
        OciDistributionError::RegistryError {
            envelope: serde_json::from_value(serde_json::json!({
                "errors": [{"code": code, "message": "failed"}]
            }))
            .unwrap(),
            url: "https://ghcr.io/v2/acme/app/manifests/1.0.0".to_string(),
        }
    }

    #[test]
    fn test_missing_detection() {
        assert!(is_missing(&registry_error("NAME_UNKNOWN")));
        assert!(is_missing(&registry_error("MANIFEST_UNKNOWN")));
        assert!(!is_missing(&registry_error("DENIED")));
        assert!(is_missing(&OciDistributionError::ImageManifestNotFoundError(
            "acme/app:1.0.0".to_string()
        )));
        assert!(is_missing(&OciDistributionError::ServerError {
            code: 404,
            url: String::new(),
            message: "not found".to_string(),
        }));
        assert!(!is_missing(&OciDistributionError::ServerError {
            code: 500,
            url: String::new(),
            message: "internal".to_string(),
        }));
        assert!(!is_missing(&OciDistributionError::GenericError(None)));
    }
}
