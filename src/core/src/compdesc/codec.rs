//! Decoding and encoding of serialized component descriptors.

use serde_json::Value;

use super::{default_component, validate, versions, ComponentDescriptor};
use crate::error::{OcmError, Result};

/// Serialization format for [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Reject fields the schema version does not define
    pub strict: bool,
    /// Skip validation after defaulting
    pub disable_validation: bool,
}

impl DecodeOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Default::default()
        }
    }

    pub fn without_validation() -> Self {
        Self {
            disable_validation: true,
            ..Default::default()
        }
    }
}

/// Decode a YAML or JSON descriptor, default it, and validate it.
pub fn decode(data: &[u8]) -> Result<ComponentDescriptor> {
    decode_with(data, &DecodeOptions::default())
}

pub fn decode_with(data: &[u8], opts: &DecodeOptions) -> Result<ComponentDescriptor> {
    // YAML is a superset of JSON, one parser serves both.
    let doc: Value = serde_yaml::from_slice(data)?;
    let schema_version = doc
        .pointer("/meta/schemaVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            OcmError::invalid("component descriptor", "", "meta.schemaVersion missing")
        })?
        .to_string();
    let version = versions::lookup(&schema_version)
        .ok_or_else(|| OcmError::unknown("schema version", schema_version.clone()))?;

    let mut desc = version.decode(doc, opts.strict)?;
    default_component(&mut desc);
    if !opts.disable_validation {
        validate(&desc)?;
    }
    tracing::trace!(
        component = %desc.component.name,
        version = %desc.component.version,
        schema = %schema_version,
        "decoded component descriptor"
    );
    Ok(desc)
}

/// Encode a descriptor in its schema version after defaulting a copy of it.
pub fn encode(desc: &ComponentDescriptor, format: EncodingFormat) -> Result<Vec<u8>> {
    let mut desc = desc.clone();
    default_component(&mut desc);
    let version = versions::lookup(&desc.metadata.schema_version).ok_or_else(|| {
        OcmError::unknown("schema version", desc.metadata.schema_version.clone())
    })?;
    version.encode(&desc, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compdesc::{ElementMeta, Resource, ResourceRelation};
    use crate::error::ErrorKind;
    use crate::typed::UnstructuredTypedObject;

    fn sample() -> ComponentDescriptor {
        let mut desc = ComponentDescriptor::new("github.com/acme/app", "1.0.0", "acme");
        let mut res = Resource::new(ElementMeta::new("image", ""), "ociImage", ResourceRelation::local());
        res.access = Some(UnstructuredTypedObject::new("localBlob"));
        desc.component.resources.push(res);
        desc
    }

    #[test]
    fn test_roundtrip_yaml_and_json() {
        let desc = sample();
        for format in [EncodingFormat::Yaml, EncodingFormat::Json] {
            let data = encode(&desc, format).unwrap();
            let decoded = decode(&data).unwrap();
            assert_eq!(decoded.component.resources[0].meta.version, "1.0.0");
            assert_eq!(encode(&decoded, format).unwrap(), data);
        }
    }

    #[test]
    fn test_yaml_layout() {
        let data = String::from_utf8(encode(&sample(), EncodingFormat::Yaml).unwrap()).unwrap();
        assert!(data.starts_with("meta:\n  schemaVersion: v2\ncomponent:\n"));
        assert!(data.contains("componentReferences: []"));
    }

    #[test]
    fn test_unknown_schema_version() {
        let err = decode(b"meta:\n  schemaVersion: v9\ncomponent: {}\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_missing_schema_version() {
        let err = decode(b"component: {}\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let data = b"meta:\n  schemaVersion: v2\ncomponent:\n  name: acme.org/x\n";
        let err = decode(data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let desc = decode_with(data, &DecodeOptions::without_validation()).unwrap();
        assert_eq!(desc.component.name, "acme.org/x");
    }

    #[test]
    fn test_strict_mode() {
        let data = b"meta:\n  schemaVersion: v2\ncomponent:\n  name: acme.org/x\n  version: 1.0.0\n  provider: acme\n  owner: nobody\n";
        assert!(decode(data).is_ok());
        let err = decode_with(data, &DecodeOptions::strict()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}
