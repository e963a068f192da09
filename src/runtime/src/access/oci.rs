//! Access methods for global OCI access specifications.

use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::TypedObject;

use super::method::{AccessMethod, BlobAccessMethod};
use super::{AccessSpec, OciArtifactSpec, OciBlobSpec};
use crate::blob::{LazyBlob, MemoryBlob, MIME_OCTET, UNKNOWN_SIZE};
use crate::contexts::oci::OciContext;
use crate::oci::{ArtifactReference, OciNamespace, RegistrySpec, MANIFEST_MEDIA_TYPE};

fn namespace_for(oci: &OciContext, host: &str, repository: &str) -> Result<Arc<dyn OciNamespace>> {
    let repo = oci.repository_for_spec(&RegistrySpec::new(host).into())?;
    repo.lookup_namespace(repository)
}

/// Access method for a blob in an OCI repository.
///
/// The blob is fetched on first use; digest and size come from the spec.
pub fn blob_access_method(oci: &OciContext, spec: &OciBlobSpec) -> Result<Box<dyn AccessMethod>> {
    let reference = ArtifactReference::parse(&spec.reference)
        .map_err(|e| e.wrap(format!("ociBlob reference {}", spec.reference)))?;
    let ns = namespace_for(oci, &reference.host, &reference.repository)?;
    let digest = spec.digest.clone();
    let mime = if spec.media_type.is_empty() {
        MIME_OCTET
    } else {
        &spec.media_type
    };
    let mut blob = LazyBlob::new(mime, move || ns.get_blob(&digest));
    // a missing size is taken from the first read
    if spec.size != UNKNOWN_SIZE && !spec.digest.is_empty() {
        blob = blob.with_info(&spec.digest, spec.size);
    }
    Ok(BlobAccessMethod::boxed(&spec.object_type, blob))
}

/// Access method for an OCI artifact; the content is its manifest.
pub fn artifact_access_method(
    oci: &OciContext,
    spec: &OciArtifactSpec,
) -> Result<Box<dyn AccessMethod>> {
    let reference = ArtifactReference::parse(&spec.image_reference)
        .map_err(|e| e.wrap(format!("ociArtifact reference {}", spec.image_reference)))?;
    let ns = namespace_for(oci, &reference.host, &reference.repository)?;
    let (manifest, digest) = ns.get_manifest(reference.version())?;
    tracing::debug!(reference = %spec.image_reference, digest = %digest, "resolved artifact");
    let mime = manifest
        .media_type
        .clone()
        .unwrap_or_else(|| MANIFEST_MEDIA_TYPE.to_string());
    let blob = MemoryBlob::new(manifest.to_bytes()?, &mime);
    Ok(BlobAccessMethod::boxed(&spec.object_type, blob))
}

/// Access method for any global access specification.
pub fn global_access_method(oci: &OciContext, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
    match spec {
        AccessSpec::OciBlob(s) => blob_access_method(oci, s),
        AccessSpec::OciArtifact(s) => artifact_access_method(oci, s),
        AccessSpec::LocalBlob(_) | AccessSpec::LocalFilesystemBlob(_) => Err(OcmError::invalid(
            "access spec",
            spec.get_type(),
            "local access outside of its repository",
        )),
        AccessSpec::Unknown(u) => Err(OcmError::unknown("access method", u.get_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::config::ConfigContext;
    use crate::contexts::credentials::CredentialsContext;
    use crate::oci::{Manifest, MemoryOciRepository, OciRepository};

    fn ctx_with_store() -> (Arc<OciContext>, MemoryOciRepository) {
        let ctx = OciContext::new(CredentialsContext::new(ConfigContext::builder().build()));
        let store = MemoryOciRepository::with_host("registry.acme.org");
        ctx.register_repository("registry.acme.org", Arc::new(store.clone()));
        (ctx, store)
    }

    #[test]
    fn test_oci_blob_is_lazy() {
        let (ctx, store) = ctx_with_store();
        let ns = store.lookup_namespace("acme/data").unwrap();
        let desc = ns.push_blob("text/plain", b"hello").unwrap();

        let spec = OciBlobSpec::new("registry.acme.org/acme/data", "text/plain", &desc.digest, 5);
        let method = global_access_method(&ctx, &spec.into()).unwrap();
        assert_eq!(method.access_kind(), "ociBlob");
        assert_eq!(method.size().unwrap(), 5);
        assert_eq!(method.get().unwrap(), b"hello");
    }

    #[test]
    fn test_oci_blob_without_size() {
        let (ctx, store) = ctx_with_store();
        let ns = store.lookup_namespace("acme/data").unwrap();
        let desc = ns.push_blob("text/plain", b"hello").unwrap();

        let spec: OciBlobSpec = serde_json::from_value(serde_json::json!({
            "type": "ociBlob",
            "ref": "registry.acme.org/acme/data",
            "digest": &desc.digest,
        }))
        .unwrap();
        assert_eq!(spec.size, UNKNOWN_SIZE);
        assert!(serde_json::to_value(&spec).unwrap().get("size").is_none());

        let method = global_access_method(&ctx, &spec.into()).unwrap();
        assert_eq!(method.size().unwrap(), 5);
        assert_eq!(method.digest().unwrap(), desc.digest);
        assert_eq!(method.get().unwrap(), b"hello");
    }

    #[test]
    fn test_oci_artifact_returns_manifest() {
        let (ctx, store) = ctx_with_store();
        let ns = store.lookup_namespace("acme/image").unwrap();
        let config = ns.push_blob("application/json", b"{}").unwrap();
        let manifest = Manifest::new(config, vec![]);
        ns.push_manifest(&manifest, "1.0").unwrap();

        let spec = OciArtifactSpec::new("registry.acme.org/acme/image:1.0");
        let method = global_access_method(&ctx, &spec.into()).unwrap();
        assert_eq!(method.mime_type(), MANIFEST_MEDIA_TYPE);
        assert_eq!(Manifest::from_slice(&method.get().unwrap()).unwrap(), manifest);
    }

    #[test]
    fn test_local_specs_rejected() {
        let (ctx, _) = ctx_with_store();
        let spec = AccessSpec::from(super::super::LocalBlobSpec::new("x", "text/plain"));
        assert!(global_access_method(&ctx, &spec).is_err());
    }
}
