use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{TypedObject, UnstructuredTypedObject};
use crate::error::{OcmError, Result};

/// A sum type decodable by a [`Scheme`].
///
/// Implementors provide an opaque variant holding an
/// [`UnstructuredTypedObject`] for kinds that are not (yet) known.
pub trait SchemeObject: TypedObject + Sized + Send + Sync {
    /// Wrap an object of an unregistered kind.
    fn unstructured(obj: UnstructuredTypedObject) -> Self;

    /// The opaque payload if this is an unresolved object.
    fn as_unstructured(&self) -> Option<&UnstructuredTypedObject>;

    /// Plain serialization of a known variant.
    fn to_value(&self) -> Result<Value>;
}

/// Conversion for kinds whose wire shape differs from the internal one.
pub trait Converter<T>: Send + Sync {
    fn convert_from(&self, wire: Value) -> Result<T>;
    fn convert_to(&self, obj: &T) -> Result<Value>;
}

type DecodeFn<T> = Box<dyn Fn(Value) -> Result<T> + Send + Sync>;

enum Codec<T> {
    Decoder(DecodeFn<T>),
    Converter(Box<dyn Converter<T>>),
}

impl<T> Codec<T> {
    fn decode(&self, value: Value) -> Result<T> {
        match self {
            Codec::Decoder(f) => f(value),
            Codec::Converter(c) => c.convert_from(value),
        }
    }
}

/// Registry of decoders keyed by exact type name.
///
/// Registration needs `&mut self` and therefore happens while the scheme
/// is still exclusively owned; once shared behind an `Arc` it is read-only.
pub struct Scheme<T> {
    name: String,
    codecs: HashMap<String, Codec<T>>,
    delegate: Option<Arc<Scheme<T>>>,
}

impl<T: SchemeObject> Scheme<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codecs: HashMap::new(),
            delegate: None,
        }
    }

    /// Create a scheme falling back to `parent` for unregistered kinds.
    pub fn with_delegate(name: impl Into<String>, parent: Arc<Scheme<T>>) -> Self {
        Self {
            name: name.into(),
            codecs: HashMap::new(),
            delegate: Some(parent),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_delegate(&mut self, parent: Arc<Scheme<T>>) {
        self.delegate = Some(parent);
    }

    /// Register a serde-decodable struct for a type name.
    pub fn register<S>(&mut self, object_type: &str)
    where
        S: DeserializeOwned + Into<T> + 'static,
    {
        let kind = object_type.to_string();
        self.register_decoder(object_type, move |value| {
            serde_json::from_value::<S>(value)
                .map(Into::into)
                .map_err(|e| OcmError::invalid(kind.clone(), "", e.to_string()))
        });
    }

    pub fn register_decoder<F>(&mut self, object_type: &str, decoder: F)
    where
        F: Fn(Value) -> Result<T> + Send + Sync + 'static,
    {
        self.codecs
            .insert(object_type.to_string(), Codec::Decoder(Box::new(decoder)));
    }

    pub fn register_converter(&mut self, object_type: &str, converter: Box<dyn Converter<T>>) {
        self.codecs
            .insert(object_type.to_string(), Codec::Converter(converter));
    }

    pub fn is_registered(&self, object_type: &str) -> bool {
        self.codecs.contains_key(object_type)
            || self
                .delegate
                .as_ref()
                .map(|d| d.is_registered(object_type))
                .unwrap_or(false)
    }

    /// All type names known to this scheme and its delegates, sorted.
    pub fn known_types(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.codecs.keys().cloned().collect();
        if let Some(d) = &self.delegate {
            names.extend(d.known_types());
        }
        names.into_iter().collect()
    }

    fn lookup(&self, object_type: &str) -> Option<&Codec<T>> {
        self.codecs
            .get(object_type)
            .or_else(|| self.delegate.as_ref().and_then(|d| d.lookup(object_type)))
    }

    /// Decode JSON or YAML bytes. Unregistered kinds yield the opaque variant.
    pub fn decode(&self, data: &[u8]) -> Result<T> {
        let value: Value = serde_yaml::from_slice(data)?;
        self.decode_value(value)
    }

    pub fn decode_value(&self, value: Value) -> Result<T> {
        let obj = UnstructuredTypedObject::from_value(value)?;
        self.decode_unstructured(obj)
    }

    pub fn decode_unstructured(&self, obj: UnstructuredTypedObject) -> Result<T> {
        let object_type = obj.get_type();
        if object_type.is_empty() {
            return Err(OcmError::invalid(
                self.name.clone(),
                "",
                "no type found",
            ));
        }
        match self.lookup(object_type) {
            Some(codec) => codec.decode(obj.into_value()),
            None => {
                tracing::trace!(scheme = %self.name, object_type = %object_type, "keeping unknown type");
                Ok(T::unstructured(obj))
            }
        }
    }

    /// Decode, failing with `Unknown` for unregistered kinds.
    pub fn enforce_decode(&self, obj: &UnstructuredTypedObject) -> Result<T> {
        let object_type = obj.get_type();
        match self.lookup(object_type) {
            Some(codec) => codec.decode(obj.to_value()),
            None => Err(OcmError::unknown(self.name.clone(), object_type.to_string())),
        }
    }

    /// Resolve an opaque object against this scheme.
    ///
    /// Known objects pass through unchanged. An object that is still
    /// unknown here yields an `Unknown` error.
    pub fn evaluate(&self, obj: T) -> Result<T> {
        match obj.as_unstructured() {
            Some(raw) => self.enforce_decode(raw),
            None => Ok(obj),
        }
    }

    pub fn encode_value(&self, obj: &T) -> Result<Value> {
        if let Some(raw) = obj.as_unstructured() {
            return Ok(raw.to_value());
        }
        match self.lookup(obj.get_type()) {
            Some(Codec::Converter(c)) => c.convert_to(obj),
            _ => obj.to_value(),
        }
    }

    /// Encode to JSON.
    pub fn encode(&self, obj: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.encode_value(obj)?)?)
    }

    pub fn to_unstructured(&self, obj: &T) -> Result<UnstructuredTypedObject> {
        UnstructuredTypedObject::from_value(self.encode_value(obj)?)
    }
}

impl<T> std::fmt::Debug for Scheme<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.codecs.keys().collect();
        names.sort();
        f.debug_struct("Scheme")
            .field("name", &self.name)
            .field("types", &names)
            .field("delegate", &self.delegate.as_ref().map(|d| d.name.clone()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Path {
        #[serde(rename = "type")]
        object_type: String,
        path: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Spec {
        Path(Path),
        Renamed(Path),
        Unknown(UnstructuredTypedObject),
    }

    impl From<Path> for Spec {
        fn from(p: Path) -> Self {
            Spec::Path(p)
        }
    }

    impl TypedObject for Spec {
        fn get_type(&self) -> &str {
            match self {
                Spec::Path(p) | Spec::Renamed(p) => &p.object_type,
                Spec::Unknown(u) => u.get_type(),
            }
        }
    }

    impl SchemeObject for Spec {
        fn unstructured(obj: UnstructuredTypedObject) -> Self {
            Spec::Unknown(obj)
        }

        fn as_unstructured(&self) -> Option<&UnstructuredTypedObject> {
            match self {
                Spec::Unknown(u) => Some(u),
                _ => None,
            }
        }

        fn to_value(&self) -> Result<Value> {
            match self {
                Spec::Path(p) | Spec::Renamed(p) => Ok(serde_json::to_value(p)?),
                Spec::Unknown(u) => Ok(u.to_value()),
            }
        }
    }

    /// Wire form stores the path under `location`.
    struct RenamedConverter;

    impl Converter<Spec> for RenamedConverter {
        fn convert_from(&self, wire: Value) -> Result<Spec> {
            let location = wire["location"].as_str().unwrap_or_default().to_string();
            Ok(Spec::Renamed(Path {
                object_type: "renamed".to_string(),
                path: location,
            }))
        }

        fn convert_to(&self, obj: &Spec) -> Result<Value> {
            match obj {
                Spec::Renamed(p) => Ok(json!({"type": "renamed", "location": p.path})),
                _ => Err(OcmError::Other("unexpected variant".to_string())),
            }
        }
    }

    fn scheme() -> Scheme<Spec> {
        let mut s = Scheme::new("spec");
        s.register::<Path>("path");
        s.register::<Path>("path/v1");
        s.register_converter("renamed", Box::new(RenamedConverter));
        s
    }

    #[test]
    fn test_decode_registered() {
        let s = scheme();
        let spec = s.decode(br#"{"type":"path/v1","path":"/a"}"#).unwrap();
        assert_eq!(
            spec,
            Spec::Path(Path {
                object_type: "path/v1".to_string(),
                path: "/a".to_string()
            })
        );
    }

    #[test]
    fn test_decode_yaml() {
        let s = scheme();
        let spec = s.decode(b"type: path\npath: /b\n").unwrap();
        assert_eq!(spec.get_type(), "path");
    }

    #[test]
    fn test_unknown_kind_is_not_an_error() {
        let s = scheme();
        let spec = s
            .decode(br#"{"type":"acme.org/special","x":1}"#)
            .unwrap();
        assert!(spec.as_unstructured().is_some());
        assert_eq!(
            s.encode(&spec).unwrap(),
            br#"{"type":"acme.org/special","x":1}"#.to_vec()
        );
    }

    #[test]
    fn test_missing_type() {
        let err = scheme().decode(br#"{"path":"/a"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_invalid_fields_for_known_kind() {
        let err = scheme().decode(br#"{"type":"path","path":3}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_delegate_chain() {
        let parent = Arc::new(scheme());
        let mut child = Scheme::with_delegate("child", parent);
        child.register_decoder("child-only", |v| {
            Ok(Spec::Path(Path {
                object_type: "child-only".to_string(),
                path: v["path"].as_str().unwrap_or_default().to_string(),
            }))
        });
        assert!(child.is_registered("path"));
        assert!(child.is_registered("child-only"));
        assert_eq!(
            child.known_types(),
            vec!["child-only", "path", "path/v1", "renamed"]
        );
        let spec = child.decode(br#"{"type":"path","path":"/p"}"#).unwrap();
        assert!(matches!(spec, Spec::Path(_)));
    }

    #[test]
    fn test_lazy_evaluation() {
        let poor: Scheme<Spec> = Scheme::new("poor");
        let rich = scheme();

        let spec = poor.decode(br#"{"type":"path","path":"/lazy"}"#).unwrap();
        assert!(spec.as_unstructured().is_some());

        // still unknown in the scheme it came from
        let err = poor.evaluate(spec.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);

        let resolved = rich.evaluate(spec).unwrap();
        assert!(matches!(resolved, Spec::Path(ref p) if p.path == "/lazy"));
    }

    #[test]
    fn test_converter_roundtrip() {
        let s = scheme();
        let spec = s.decode(br#"{"type":"renamed","location":"/r"}"#).unwrap();
        assert!(matches!(spec, Spec::Renamed(ref p) if p.path == "/r"));
        assert_eq!(
            s.encode_value(&spec).unwrap(),
            json!({"type": "renamed", "location": "/r"})
        );
    }

    #[test]
    fn test_enforce_decode() {
        let s = scheme();
        let raw = UnstructuredTypedObject::from_value(json!({"type": "nope"})).unwrap();
        let err = s.enforce_decode(&raw).unwrap_err();
        assert!(matches!(err, OcmError::Unknown { ref name, .. } if name == "nope"));
    }
}
