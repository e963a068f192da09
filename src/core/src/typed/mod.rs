//! Typed objects and the polymorphic scheme registry.
//!
//! Every serialized object carries a `type` field of the form
//! `kind[/version]`. A [`Scheme`] maps those type names to decoders so new
//! repository, access, and config kinds can be added without a central
//! type switch. Objects whose type is not registered are kept as
//! [`UnstructuredTypedObject`]s that round-trip verbatim and only fail
//! when they are actually evaluated.
//!
//! ```text
//!   bytes ──► { "type": "localBlob/v1", ... }
//!                     │
//!             Scheme::decode ──► registered?  ──yes──► T (known variant)
//!                     │                  no
//!                     │                   ▼
//!                     │              delegate scheme?  ──yes──► T
//!                     │                   no
//!                     ▼                   ▼
//!             T::unstructured(raw)  (kept opaque, fails on evaluate)
//! ```

mod scheme;
mod unstructured;

pub use scheme::{Converter, Scheme, SchemeObject};
pub use unstructured::UnstructuredTypedObject;

/// Version assumed when a type name carries none.
pub const DEFAULT_VERSION: &str = "v1";

/// Separator between kind and version in a type name.
pub const VERSION_SEPARATOR: char = '/';

/// Anything carrying a `type` name.
pub trait TypedObject {
    fn get_type(&self) -> &str;
}

/// A type name split into kind and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectType {
    kind: String,
    version: Option<String>,
}

impl ObjectType {
    pub fn parse(name: &str) -> Self {
        match name.split_once(VERSION_SEPARATOR) {
            Some((kind, version)) => Self {
                kind: kind.to_string(),
                version: Some(version.to_string()),
            },
            None => Self {
                kind: name.to_string(),
                version: None,
            },
        }
    }

    pub fn versioned(kind: &str, version: &str) -> Self {
        Self {
            kind: kind.to_string(),
            version: Some(version.to_string()),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Explicit version or `v1`.
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    pub fn has_explicit_version(&self) -> bool {
        self.version.is_some()
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}{}{}", self.kind, VERSION_SEPARATOR, v),
            None => f.write_str(&self.kind),
        }
    }
}

/// Kind part of a type name.
pub fn kind_of(name: &str) -> &str {
    name.split_once(VERSION_SEPARATOR)
        .map(|(k, _)| k)
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unversioned() {
        let t = ObjectType::parse("localBlob");
        assert_eq!(t.kind(), "localBlob");
        assert_eq!(t.version(), "v1");
        assert!(!t.has_explicit_version());
        assert_eq!(t.to_string(), "localBlob");
    }

    #[test]
    fn test_parse_versioned() {
        let t = ObjectType::parse("ociArtifact/v2");
        assert_eq!(t.kind(), "ociArtifact");
        assert_eq!(t.version(), "v2");
        assert_eq!(t, ObjectType::versioned("ociArtifact", "v2"));
        assert_eq!(t.to_string(), "ociArtifact/v2");
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(kind_of("credentials.config.ocm.software/v1"), "credentials.config.ocm.software");
        assert_eq!(kind_of("OCIRegistry"), "OCIRegistry");
    }
}
