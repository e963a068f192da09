//! Access specifications: serializable descriptions of where a blob lives.
//!
//! Local kinds are only meaningful inside the repository that stores the
//! component version; global kinds are resolved through the OCI context.

pub mod method;
pub mod oci;

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::{Scheme, SchemeObject, TypedObject, UnstructuredTypedObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blob::UNKNOWN_SIZE;

pub use method::{AccessMethod, BlobAccessMethod};

pub const LOCAL_BLOB_TYPE: &str = "localBlob";
pub const LOCAL_FILESYSTEM_BLOB_TYPE: &str = "localFilesystemBlob";
pub const OCI_ARTIFACT_TYPE: &str = "ociArtifact";
pub const OCI_BLOB_TYPE: &str = "ociBlob";

/// Older name of `ociArtifact`.
pub const LEGACY_OCI_REGISTRY_TYPE: &str = "ociRegistry";

/// Blob stored inside the repository of its component version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBlobSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    pub local_reference: String,
    pub media_type: String,
    /// Suggested name for re-publishing the blob globally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_access: Option<UnstructuredTypedObject>,
}

impl LocalBlobSpec {
    pub fn new(local_reference: &str, media_type: &str) -> Self {
        Self {
            object_type: LOCAL_BLOB_TYPE.to_string(),
            local_reference: local_reference.to_string(),
            media_type: media_type.to_string(),
            reference_name: None,
            global_access: None,
        }
    }

    pub fn with_reference_name(mut self, name: Option<&str>) -> Self {
        self.reference_name = name.filter(|n| !n.is_empty()).map(str::to_string);
        self
    }

    pub fn with_global_access(mut self, global: &AccessSpec) -> Result<Self> {
        self.global_access = Some(global.to_unstructured()?);
        Ok(self)
    }
}

/// Legacy local blob of component archives, addressed by file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFilesystemBlobSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    pub filename: String,
    pub media_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciArtifactSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    pub image_reference: String,
}

impl OciArtifactSpec {
    pub fn new(image_reference: &str) -> Self {
        Self {
            object_type: OCI_ARTIFACT_TYPE.to_string(),
            image_reference: image_reference.to_string(),
        }
    }
}

/// A single blob in an OCI repository (`host/repository`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciBlobSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default = "unknown_size", skip_serializing_if = "is_unknown_size")]
    pub size: i64,
}

fn unknown_size() -> i64 {
    UNKNOWN_SIZE
}

fn is_unknown_size(size: &i64) -> bool {
    *size == UNKNOWN_SIZE
}

impl OciBlobSpec {
    pub fn new(reference: &str, media_type: &str, digest: &str, size: i64) -> Self {
        Self {
            object_type: OCI_BLOB_TYPE.to_string(),
            reference: reference.to_string(),
            media_type: media_type.to_string(),
            digest: digest.to_string(),
            size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessSpec {
    LocalBlob(LocalBlobSpec),
    LocalFilesystemBlob(LocalFilesystemBlobSpec),
    OciArtifact(OciArtifactSpec),
    OciBlob(OciBlobSpec),
    Unknown(UnstructuredTypedObject),
}

impl AccessSpec {
    /// Whether the spec can only be resolved by the owning repository.
    pub fn is_local(&self) -> bool {
        matches!(self, AccessSpec::LocalBlob(_) | AccessSpec::LocalFilesystemBlob(_))
    }

    /// Globally resolvable alternative of a local blob.
    pub fn global_access(&self) -> Option<&UnstructuredTypedObject> {
        match self {
            AccessSpec::LocalBlob(l) => l.global_access.as_ref(),
            _ => None,
        }
    }

    pub fn to_unstructured(&self) -> Result<UnstructuredTypedObject> {
        UnstructuredTypedObject::from_value(self.to_value()?)
    }
}

impl From<LocalBlobSpec> for AccessSpec {
    fn from(s: LocalBlobSpec) -> Self {
        AccessSpec::LocalBlob(s)
    }
}

impl From<LocalFilesystemBlobSpec> for AccessSpec {
    fn from(s: LocalFilesystemBlobSpec) -> Self {
        AccessSpec::LocalFilesystemBlob(s)
    }
}

impl From<OciArtifactSpec> for AccessSpec {
    fn from(s: OciArtifactSpec) -> Self {
        AccessSpec::OciArtifact(s)
    }
}

impl From<OciBlobSpec> for AccessSpec {
    fn from(s: OciBlobSpec) -> Self {
        AccessSpec::OciBlob(s)
    }
}

impl TypedObject for AccessSpec {
    fn get_type(&self) -> &str {
        match self {
            AccessSpec::LocalBlob(s) => &s.object_type,
            AccessSpec::LocalFilesystemBlob(s) => &s.object_type,
            AccessSpec::OciArtifact(s) => &s.object_type,
            AccessSpec::OciBlob(s) => &s.object_type,
            AccessSpec::Unknown(u) => u.get_type(),
        }
    }
}

impl SchemeObject for AccessSpec {
    fn unstructured(obj: UnstructuredTypedObject) -> Self {
        AccessSpec::Unknown(obj)
    }

    fn as_unstructured(&self) -> Option<&UnstructuredTypedObject> {
        match self {
            AccessSpec::Unknown(u) => Some(u),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value> {
        Ok(match self {
            AccessSpec::LocalBlob(s) => serde_json::to_value(s)?,
            AccessSpec::LocalFilesystemBlob(s) => serde_json::to_value(s)?,
            AccessSpec::OciArtifact(s) => serde_json::to_value(s)?,
            AccessSpec::OciBlob(s) => serde_json::to_value(s)?,
            AccessSpec::Unknown(u) => u.to_value(),
        })
    }
}

/// Scheme with the access kinds of this crate.
pub fn access_scheme() -> Scheme<AccessSpec> {
    let mut scheme = Scheme::new("access spec");
    for suffix in ["", "/v1"] {
        scheme.register::<LocalBlobSpec>(&format!("{}{}", LOCAL_BLOB_TYPE, suffix));
        scheme.register::<LocalFilesystemBlobSpec>(&format!(
            "{}{}",
            LOCAL_FILESYSTEM_BLOB_TYPE, suffix
        ));
        scheme.register::<OciArtifactSpec>(&format!("{}{}", OCI_ARTIFACT_TYPE, suffix));
        scheme.register::<OciArtifactSpec>(&format!("{}{}", LEGACY_OCI_REGISTRY_TYPE, suffix));
        scheme.register::<OciBlobSpec>(&format!("{}{}", OCI_BLOB_TYPE, suffix));
    }
    scheme
}

/// Decode the access of a descriptor element, failing for unknown kinds.
pub fn decode_access(
    scheme: &Scheme<AccessSpec>,
    access: Option<&UnstructuredTypedObject>,
    element: &str,
) -> Result<AccessSpec> {
    let access =
        access.ok_or_else(|| OcmError::invalid("element", element, "no access specified"))?;
    scheme.enforce_decode(access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_decode_local_blob_versions() {
        let scheme = access_scheme();
        for kind in ["localBlob", "localBlob/v1"] {
            let spec = scheme
                .decode_value(json!({
                    "type": kind,
                    "localReference": "sha256.abc",
                    "mediaType": "text/plain"
                }))
                .unwrap();
            assert!(spec.is_local());
            assert_eq!(spec.get_type(), kind);
        }
    }

    #[test]
    fn test_global_access_roundtrip() {
        let scheme = access_scheme();
        let global = OciBlobSpec::new("ghcr.io/acme/app", "text/plain", "sha256:abc", 5);
        let local = LocalBlobSpec::new("sha256:abc", "text/plain")
            .with_reference_name(Some("app"))
            .with_global_access(&global.clone().into())
            .unwrap();
        let encoded = scheme.encode(&local.clone().into()).unwrap();
        let decoded = scheme.decode(&encoded).unwrap();

        let nested = scheme.enforce_decode(decoded.global_access().unwrap()).unwrap();
        assert_eq!(nested, AccessSpec::OciBlob(global));
        assert_eq!(decoded, AccessSpec::LocalBlob(local));
    }

    #[test]
    fn test_oci_blob_wire_form() {
        let spec = AccessSpec::from(OciBlobSpec::new("ghcr.io/acme/app", "", "sha256:abc", 5));
        let value = spec.to_value().unwrap();
        assert_eq!(value["ref"], "ghcr.io/acme/app");
        assert!(!spec.is_local());
    }

    #[test]
    fn test_unknown_kind_is_lazy() {
        let scheme = access_scheme();
        let raw = br#"{"type":"s3","bucket":"b","key":"k"}"#;
        let spec = scheme.decode(raw).unwrap();
        assert!(matches!(spec, AccessSpec::Unknown(_)));
        assert!(!spec.is_local());
        let err = scheme.evaluate(spec).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_decode_access_requires_access() {
        let err = decode_access(&access_scheme(), None, "image").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}
