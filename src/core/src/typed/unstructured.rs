use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::TypedObject;
use crate::error::{OcmError, Result};

const TYPE_FIELD: &str = "type";

/// A typed object kept in its raw field form.
///
/// Used for kinds the consulted scheme does not know. All fields are
/// retained so the object re-encodes to the same content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnstructuredTypedObject {
    raw: Map<String, Value>,
}

impl UnstructuredTypedObject {
    pub fn new(object_type: &str) -> Self {
        let mut raw = Map::new();
        raw.insert(TYPE_FIELD.to_string(), Value::String(object_type.to_string()));
        Self { raw }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            other => Err(OcmError::invalid(
                "typed object",
                other.to_string(),
                "must be a map",
            )),
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(data)?;
        Self::from_value(value)
    }

    /// Convert any serializable typed struct.
    pub fn from_typed<S: Serialize>(obj: &S) -> Result<Self> {
        Self::from_value(serde_json::to_value(obj)?)
    }

    pub fn set_type(&mut self, object_type: &str) {
        self.raw
            .insert(TYPE_FIELD.to_string(), Value::String(object_type.to_string()));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.raw.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.raw.insert(field.to_string(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.raw.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }

    /// Canonical JSON encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.raw)?)
    }

    /// Decode the raw fields into a concrete struct.
    pub fn decode_into<S: DeserializeOwned>(&self) -> Result<S> {
        serde_json::from_value(self.to_value()).map_err(|e| {
            OcmError::invalid(
                "typed object",
                self.get_type().to_string(),
                e.to_string(),
            )
        })
    }
}

impl TypedObject for UnstructuredTypedObject {
    fn get_type(&self) -> &str {
        self.raw
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}
