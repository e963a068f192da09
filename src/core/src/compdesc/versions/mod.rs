//! Serialized descriptor versions.

pub mod v2;

use serde_json::Value;

use super::codec::EncodingFormat;
use super::ComponentDescriptor;
use crate::error::Result;

/// One serialized schema version of the component descriptor.
pub trait DescriptorVersion: Send + Sync {
    fn schema_version(&self) -> &'static str;

    /// Convert the parsed document into the internal model.
    fn decode(&self, doc: Value, strict: bool) -> Result<ComponentDescriptor>;

    fn encode(&self, desc: &ComponentDescriptor, format: EncodingFormat) -> Result<Vec<u8>>;
}

static V2: v2::V2 = v2::V2;

/// Version handler for a `meta.schemaVersion` value.
pub fn lookup(schema_version: &str) -> Option<&'static dyn DescriptorVersion> {
    match schema_version {
        v2::SCHEMA_VERSION => Some(&V2),
        _ => None,
    }
}

/// Names of all supported schema versions.
pub fn supported() -> Vec<&'static str> {
    vec![v2::SCHEMA_VERSION]
}

/// Dotted paths of fields present in `input` but not understood by the
/// typed model, found by comparing against the re-serialized model.
/// Empty values may be elided during serialization and are ignored.
pub(crate) fn unknown_fields(input: &Value, known: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_unknown(input, known, "", &mut out);
    out
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

fn collect_unknown(input: &Value, known: &Value, path: &str, out: &mut Vec<String>) {
    match (input, known) {
        (Value::Object(i), Value::Object(k)) => {
            for (key, v) in i {
                let p = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match k.get(key) {
                    Some(kv) => collect_unknown(v, kv, &p, out),
                    None if !is_empty(v) => out.push(p),
                    None => {}
                }
            }
        }
        (Value::Array(i), Value::Array(k)) => {
            for (idx, (iv, kv)) in i.iter().zip(k.iter()).enumerate() {
                collect_unknown(iv, kv, &format!("{}[{}]", path, idx), out);
            }
        }
        _ => {}
    }
}
