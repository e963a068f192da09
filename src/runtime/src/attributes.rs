//! Attribute stores shared along the context hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Named context attributes with read-through to a parent store.
///
/// Values set locally shadow the parent's; lookups of absent keys are
/// delegated upwards.
#[derive(Debug, Default)]
pub struct Attributes {
    values: RwLock<HashMap<String, Value>>,
    parent: Option<Arc<Attributes>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<Attributes>) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            parent: Some(parent),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Attributes>> {
        self.parent.as_ref()
    }

    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.values.read().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get_attribute(name))
    }

    /// Typed lookup; `Ok(None)` if the attribute is not set anywhere.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get_attribute(name) {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| OcmError::invalid("attribute", name, e.to_string())),
            None => Ok(None),
        }
    }

    pub fn set_attribute(&self, name: &str, value: Value) {
        tracing::debug!(attribute = %name, "setting attribute");
        self.values.write().insert(name.to_string(), value);
    }

    pub fn set<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.set_attribute(name, serde_json::to_value(value)?);
        Ok(())
    }

    /// Remove a local value, re-exposing the parent's.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.values.write().remove(name)
    }

    /// Names set locally or on any ancestor, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.read().keys().cloned().collect();
        if let Some(p) = &self.parent {
            names.extend(p.names());
        }
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_through_parent() {
        let parent = Arc::new(Attributes::new());
        parent.set_attribute("cache", json!("/tmp/cache"));
        let child = Attributes::with_parent(parent.clone());

        assert_eq!(child.get_attribute("cache"), Some(json!("/tmp/cache")));

        child.set_attribute("cache", json!("/var/cache"));
        assert_eq!(child.get_attribute("cache"), Some(json!("/var/cache")));
        assert_eq!(parent.get_attribute("cache"), Some(json!("/tmp/cache")));

        child.remove("cache");
        assert_eq!(child.get_attribute("cache"), Some(json!("/tmp/cache")));
    }

    #[test]
    fn test_typed_access() {
        let attrs = Attributes::new();
        attrs.set("keeplocal", &true).unwrap();
        assert_eq!(attrs.get::<bool>("keeplocal").unwrap(), Some(true));
        assert_eq!(attrs.get::<bool>("missing").unwrap(), None);
        assert!(attrs.get::<u32>("keeplocal").is_err());
    }

    #[test]
    fn test_names() {
        let parent = Arc::new(Attributes::new());
        parent.set_attribute("a", json!(1));
        let child = Attributes::with_parent(parent);
        child.set_attribute("b", json!(2));
        child.set_attribute("a", json!(3));
        assert_eq!(child.names(), vec!["a", "b"]);
    }
}
