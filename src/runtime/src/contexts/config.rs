//! Config context: the lowest layer, holding typed config objects.
//!
//! Config objects are stored together with the generation in which they
//! were applied. Higher layers remember the last generation they have
//! seen and pull newer objects lazily via [`Updater`].

use std::collections::BTreeMap;
use std::sync::Arc;

use ocm_core::config::OcmConfig;
use ocm_core::error::{MultiError, OcmError, Result};
use ocm_core::log::LogConfig;
use ocm_core::typed::{Scheme, SchemeObject, TypedObject, UnstructuredTypedObject};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::credentials::CredentialsConfig;
use crate::attributes::Attributes;

pub const CONTEXT_TYPE: &str = "config.context.ocm.software";

pub const GENERIC_CONFIG_TYPE: &str = "generic.config.ocm.software";
pub const ATTRIBUTES_CONFIG_TYPE: &str = "attributes.config.ocm.software";
pub const LOGGING_CONFIG_TYPE: &str = "logging.config.ocm.software";

/// `generic.config.ocm.software`: a list of nested config objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericConfig {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub configurations: Vec<UnstructuredTypedObject>,
}

/// `attributes.config.ocm.software`: context attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributesConfig {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AttributesConfig {
    pub fn new() -> Self {
        Self {
            object_type: ATTRIBUTES_CONFIG_TYPE.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

impl Default for AttributesConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `logging.config.ocm.software`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(flatten)]
    pub log: LogConfig,
}

/// A decoded config object.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigObject {
    Generic(GenericConfig),
    Credentials(CredentialsConfig),
    Attributes(AttributesConfig),
    Logging(LoggingConfig),
    Unknown(UnstructuredTypedObject),
}

impl From<GenericConfig> for ConfigObject {
    fn from(c: GenericConfig) -> Self {
        ConfigObject::Generic(c)
    }
}

impl From<CredentialsConfig> for ConfigObject {
    fn from(c: CredentialsConfig) -> Self {
        ConfigObject::Credentials(c)
    }
}

impl From<AttributesConfig> for ConfigObject {
    fn from(c: AttributesConfig) -> Self {
        ConfigObject::Attributes(c)
    }
}

impl From<LoggingConfig> for ConfigObject {
    fn from(c: LoggingConfig) -> Self {
        ConfigObject::Logging(c)
    }
}

impl TypedObject for ConfigObject {
    fn get_type(&self) -> &str {
        match self {
            ConfigObject::Generic(c) => &c.object_type,
            ConfigObject::Credentials(c) => &c.object_type,
            ConfigObject::Attributes(c) => &c.object_type,
            ConfigObject::Logging(c) => &c.object_type,
            ConfigObject::Unknown(u) => u.get_type(),
        }
    }
}

impl SchemeObject for ConfigObject {
    fn unstructured(obj: UnstructuredTypedObject) -> Self {
        ConfigObject::Unknown(obj)
    }

    fn as_unstructured(&self) -> Option<&UnstructuredTypedObject> {
        match self {
            ConfigObject::Unknown(u) => Some(u),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value> {
        Ok(match self {
            ConfigObject::Generic(c) => serde_json::to_value(c)?,
            ConfigObject::Credentials(c) => serde_json::to_value(c)?,
            ConfigObject::Attributes(c) => serde_json::to_value(c)?,
            ConfigObject::Logging(c) => serde_json::to_value(c)?,
            ConfigObject::Unknown(u) => u.to_value(),
        })
    }
}

/// Scheme with all config types of this crate, plain and `/v1`.
pub fn config_scheme() -> Scheme<ConfigObject> {
    let mut scheme = Scheme::new("config");
    for suffix in ["", "/v1"] {
        scheme.register::<GenericConfig>(&format!("{}{}", GENERIC_CONFIG_TYPE, suffix));
        scheme.register::<CredentialsConfig>(&format!(
            "{}{}",
            super::credentials::CREDENTIALS_CONFIG_TYPE,
            suffix
        ));
        scheme.register::<AttributesConfig>(&format!("{}{}", ATTRIBUTES_CONFIG_TYPE, suffix));
        scheme.register::<LoggingConfig>(&format!("{}{}", LOGGING_CONFIG_TYPE, suffix));
    }
    scheme
}

/// Something config objects can be applied to.
///
/// Targets ignore objects they have no use for.
pub trait ConfigTarget {
    fn apply_config(&self, config: &ConfigObject) -> Result<()>;
}

struct ConfigEntry {
    generation: u64,
    config: ConfigObject,
    description: String,
}

#[derive(Default)]
struct ConfigState {
    generation: u64,
    entries: Vec<ConfigEntry>,
}

pub struct ConfigContext {
    attributes: Arc<Attributes>,
    scheme: Arc<Scheme<ConfigObject>>,
    state: Mutex<ConfigState>,
}

impl std::fmt::Debug for ConfigContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigContext")
            .field("generation", &self.generation())
            .finish()
    }
}

impl ConfigContext {
    pub fn builder() -> ConfigContextBuilder {
        ConfigContextBuilder::default()
    }

    pub fn context_type(&self) -> &str {
        CONTEXT_TYPE
    }

    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    pub fn scheme(&self) -> &Arc<Scheme<ConfigObject>> {
        &self.scheme
    }

    /// Number of config changes so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Store a config object and apply it to this context.
    ///
    /// Objects of unknown type are kept, so that a later, richer scheme
    /// can still evaluate them, but yield an `Unknown` error.
    pub fn apply_config(&self, config: ConfigObject, description: &str) -> Result<()> {
        let unknown = config.as_unstructured().map(|u| u.get_type().to_string());
        {
            let mut state = self.state.lock();
            state.generation += 1;
            let generation = state.generation;
            tracing::debug!(
                config_type = %config.get_type(),
                description = %description,
                generation,
                "applying config"
            );
            state.entries.push(ConfigEntry {
                generation,
                config: config.clone(),
                description: description.to_string(),
            });
        }
        if let Some(t) = unknown {
            return Err(OcmError::unknown("config type", t));
        }
        self.apply_local(&config)
    }

    pub fn apply_unstructured(&self, obj: UnstructuredTypedObject, description: &str) -> Result<()> {
        let config = self.scheme.decode_unstructured(obj)?;
        self.apply_config(config, description)
    }

    /// Decode a serialized config object and apply it.
    pub fn apply_data(&self, data: &[u8], description: &str) -> Result<()> {
        let config = self
            .scheme
            .decode(data)
            .map_err(|e| e.wrap(format!("decoding config {}", description)))?;
        self.apply_config(config, description)
    }

    /// Apply all objects of a config file, collecting every failure.
    pub fn apply_ocm_config(&self, config: &OcmConfig, description: &str) -> Result<()> {
        let mut errs = MultiError::new();
        for (i, obj) in config.configurations.iter().enumerate() {
            errs.add(
                self.apply_unstructured(obj.clone(), &format!("{}[{}]", description, i)),
            );
        }
        errs.into_result()
    }

    /// Drop all stored config objects.
    pub fn reset(&self) -> u64 {
        let mut state = self.state.lock();
        state.entries.clear();
        state.generation += 1;
        state.generation
    }

    /// Apply every object stored after `last_generation` to `target`.
    ///
    /// Returns the generation reached together with the aggregated
    /// failures; one failing object never hides another.
    pub fn apply_to(&self, last_generation: u64, target: &dyn ConfigTarget) -> (u64, Result<()>) {
        let (generation, pending) = {
            let state = self.state.lock();
            let pending: Vec<(ConfigObject, String)> = state
                .entries
                .iter()
                .filter(|e| e.generation > last_generation)
                .map(|e| (e.config.clone(), e.description.clone()))
                .collect();
            (state.generation, pending)
        };

        let mut errs = MultiError::new();
        for (config, description) in pending {
            errs.add(
                self.apply_expanded(&config, target)
                    .map_err(|e| e.wrap(format!("applying config {}", description))),
            );
        }
        (generation, errs.into_result())
    }

    fn apply_expanded(&self, config: &ConfigObject, target: &dyn ConfigTarget) -> Result<()> {
        match config {
            ConfigObject::Generic(generic) => {
                let mut errs = MultiError::new();
                for nested in &generic.configurations {
                    let decoded = self.scheme.decode_unstructured(nested.clone());
                    if let Some(c) = errs.add(decoded) {
                        errs.add(self.apply_expanded(&c, target));
                    }
                }
                errs.into_result()
            }
            ConfigObject::Unknown(_) => {
                // may be known by now
                let resolved = self.scheme.evaluate(config.clone())?;
                self.apply_expanded(&resolved, target)
            }
            other => target.apply_config(other),
        }
    }

    fn apply_local(&self, config: &ConfigObject) -> Result<()> {
        match config {
            ConfigObject::Generic(_) => {
                let (_, res) = self.apply_to(self.generation() - 1, self);
                res
            }
            other => self.apply_config_to_self(other),
        }
    }

    fn apply_config_to_self(&self, config: &ConfigObject) -> Result<()> {
        match config {
            ConfigObject::Attributes(a) => {
                for (name, value) in &a.attributes {
                    self.attributes.set_attribute(name, value.clone());
                }
                Ok(())
            }
            ConfigObject::Logging(l) => {
                self.attributes.set(LOGGING_CONFIG_TYPE, &l.log)?;
                if !ocm_core::log::init(&l.log) {
                    tracing::debug!("logging already initialized");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl ConfigTarget for ConfigContext {
    fn apply_config(&self, config: &ConfigObject) -> Result<()> {
        self.apply_config_to_self(config)
    }
}

/// Tracks the generation a higher context has seen.
#[derive(Debug, Default)]
pub struct Updater {
    last: Mutex<u64>,
}

impl Updater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply config objects added since the previous call.
    pub fn update(&self, config: &ConfigContext, target: &dyn ConfigTarget) -> Result<()> {
        let mut last = self.last.lock();
        if *last == config.generation() {
            return Ok(());
        }
        let (generation, result) = config.apply_to(*last, target);
        *last = generation;
        result
    }
}

#[derive(Default)]
pub struct ConfigContextBuilder {
    attributes: Option<Arc<Attributes>>,
    scheme: Option<Scheme<ConfigObject>>,
}

impl ConfigContextBuilder {
    pub fn with_attributes(mut self, attributes: Arc<Attributes>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Use a scheme with additional config types.
    pub fn with_scheme(mut self, scheme: Scheme<ConfigObject>) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn build(self) -> Arc<ConfigContext> {
        Arc::new(ConfigContext {
            attributes: self.attributes.unwrap_or_default(),
            scheme: Arc::new(self.scheme.unwrap_or_else(config_scheme)),
            state: Mutex::new(ConfigState::default()),
        })
    }
}
