//! Repository specifications of the OCI layer.

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::{Scheme, SchemeObject, TypedObject, UnstructuredTypedObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::archive::{AccessMode, FileFormat};

pub const OCI_REGISTRY_TYPE: &str = "OCIRegistry";
pub const CTF_TYPE: &str = "CommonTransportFormat";

/// `OCIRegistry`: a distribution registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    #[serde(rename = "type")]
    pub object_type: String,
    pub base_url: String,
    /// Prefix of all namespaces used for component versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_types: Option<bool>,
}

impl RegistrySpec {
    pub fn new(base_url: &str) -> Self {
        Self {
            object_type: OCI_REGISTRY_TYPE.to_string(),
            base_url: base_url.to_string(),
            sub_path: None,
            legacy_types: None,
        }
    }

    pub fn with_sub_path(mut self, sub_path: &str) -> Self {
        self.sub_path = Some(sub_path.to_string());
        self
    }
}

/// `CommonTransportFormat`: an OCI store in a file system layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtfSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<FileFormat>,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl CtfSpec {
    pub fn new(file_path: &str, access_mode: AccessMode) -> Self {
        Self {
            object_type: CTF_TYPE.to_string(),
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

#[derive(Debug, Clone, PartialEq)]
pub enum OciRepositorySpec {
    Registry(RegistrySpec),
    Ctf(CtfSpec),
    Unknown(UnstructuredTypedObject),
}

impl OciRepositorySpec {
    /// Sub path for component namespaces, empty if none.
    pub fn sub_path(&self) -> &str {
        match self {
            OciRepositorySpec::Registry(s) => s.sub_path.as_deref().unwrap_or(""),
            _ => "",
        }
    }
}

impl From<RegistrySpec> for OciRepositorySpec {
    fn from(s: RegistrySpec) -> Self {
        OciRepositorySpec::Registry(s)
    }
}

impl From<CtfSpec> for OciRepositorySpec {
    fn from(s: CtfSpec) -> Self {
        OciRepositorySpec::Ctf(s)
    }
}

impl TypedObject for OciRepositorySpec {
    fn get_type(&self) -> &str {
        match self {
            OciRepositorySpec::Registry(s) => &s.object_type,
            OciRepositorySpec::Ctf(s) => &s.object_type,
            OciRepositorySpec::Unknown(u) => u.get_type(),
        }
    }
}

impl SchemeObject for OciRepositorySpec {
    fn unstructured(obj: UnstructuredTypedObject) -> Self {
        OciRepositorySpec::Unknown(obj)
    }

    fn as_unstructured(&self) -> Option<&UnstructuredTypedObject> {
        match self {
            OciRepositorySpec::Unknown(u) => Some(u),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value> {
        Ok(match self {
            OciRepositorySpec::Registry(s) => serde_json::to_value(s)?,
            OciRepositorySpec::Ctf(s) => serde_json::to_value(s)?,
            OciRepositorySpec::Unknown(u) => u.to_value(),
        })
    }
}

/// Register the OCI repository kinds, in both plain and versioned form.
pub fn register_repository_types<T>(scheme: &mut Scheme<T>)
where
    T: SchemeObject + From<OciRepositorySpec> + 'static,
{
    for kind in [OCI_REGISTRY_TYPE, "OCIRegistry/v1", "ociRegistry"] {
        scheme.register_decoder(kind, move |value| {
            let spec: RegistrySpec = decode(kind, value)?;
            Ok(T::from(OciRepositorySpec::from(spec)))
        });
    }
    for kind in [CTF_TYPE, "CommonTransportFormat/v1"] {
        scheme.register_decoder(kind, move |value| {
            let spec: CtfSpec = decode(kind, value)?;
            Ok(T::from(OciRepositorySpec::from(spec)))
        });
    }
}

fn decode<S: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<S> {
    serde_json::from_value(value)
        .map_err(|e| OcmError::invalid(kind, "", e.to_string()))
}

/// Scheme for OCI repository specifications.
pub fn repository_scheme() -> Scheme<OciRepositorySpec> {
    let mut scheme = Scheme::new("oci repository spec");
    register_repository_types(&mut scheme);
    scheme
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_registry_spec() {
        let scheme = repository_scheme();
        let spec = scheme
            .decode(br#"{"type":"OCIRegistry","baseUrl":"ghcr.io","subPath":"acme"}"#)
            .unwrap();
        match &spec {
            OciRepositorySpec::Registry(s) => assert_eq!(s.base_url, "ghcr.io"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(spec.sub_path(), "acme");
        assert_eq!(
            scheme.encode_value(&spec).unwrap(),
            json!({"type": "OCIRegistry", "baseUrl": "ghcr.io", "subPath": "acme"})
        );
    }

    #[test]
    fn test_decode_ctf_spec() {
        let spec = repository_scheme()
            .decode(b"type: CommonTransportFormat/v1\nfilePath: /tmp/ctf\nfileFormat: tgz\naccessMode: readonly\n")
            .unwrap();
        match spec {
            OciRepositorySpec::Ctf(s) => {
                assert_eq!(s.file_format, Some(FileFormat::Tgz));
                assert!(s.access_mode.is_readonly());
                assert_eq!(s.object_type, "CommonTransportFormat/v1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_kept() {
        let spec = repository_scheme()
            .decode(br#"{"type":"S3","bucket":"b"}"#)
            .unwrap();
        assert!(spec.as_unstructured().is_some());
        assert_eq!(spec.get_type(), "S3");
    }
}
