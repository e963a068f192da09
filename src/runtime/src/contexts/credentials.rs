//! Credentials context: consumer identities mapped to credential sets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::{TypedObject, UnstructuredTypedObject};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::config::{ConfigContext, ConfigObject, ConfigTarget, Updater};
use crate::attributes::Attributes;

pub const CONTEXT_TYPE: &str = "credentials.context.ocm.software";

pub const CREDENTIALS_CONFIG_TYPE: &str = "credentials.config.ocm.software";

/// Type of a plain property credential set.
pub const DIRECT_CREDENTIALS_TYPE: &str = "Credentials";

pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const IDENTITY_TOKEN: &str = "identityToken";

/// Identity attribute holding the consumer type.
pub const ID_TYPE: &str = "type";
pub const ID_HOSTNAME: &str = "hostname";
pub const ID_PORT: &str = "port";
pub const ID_PATH_PREFIX: &str = "pathprefix";

/// Consumer type of OCI registries.
pub const OCI_CONSUMER_TYPE: &str = "OCIRegistry";

/// Attribute set identifying a credential consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerIdentity(BTreeMap<String, String>);

impl ConsumerIdentity {
    pub fn new(consumer_type: &str) -> Self {
        Self::default().with(ID_TYPE, consumer_type)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl std::fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", parts.join(","))
    }
}

/// Consumer identity of an OCI registry host (`host[:port]`).
pub fn oci_consumer_identity(host: &str) -> ConsumerIdentity {
    let id = ConsumerIdentity::new(OCI_CONSUMER_TYPE);
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            id.with(ID_HOSTNAME, name).with(ID_PORT, port)
        }
        _ => id.with(ID_HOSTNAME, host),
    }
}

/// Selects the best stored identity for a requested pattern.
pub trait IdentityMatcher: Send + Sync {
    /// Whether `candidate` matches `pattern` and is better than `current`.
    fn matches(
        &self,
        pattern: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool;
}

/// Every attribute of the stored identity must be present and equal in
/// the pattern; among matches the most specific identity wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialMatch;

impl IdentityMatcher for PartialMatch {
    fn matches(
        &self,
        pattern: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        let covered = candidate.iter().all(|(k, v)| pattern.get(k) == Some(v.as_str()));
        covered && current.map(|c| candidate.len() > c.len()).unwrap_or(true)
    }
}

/// Stored identity and pattern must be equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteMatch;

impl IdentityMatcher for CompleteMatch {
    fn matches(
        &self,
        pattern: &ConsumerIdentity,
        _current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        pattern == candidate
    }
}

/// Matcher for OCI registries.
///
/// Type, host and port must be equal when set in the stored identity. A
/// stored `pathprefix` must be a prefix of the requested path at a path
/// segment boundary; the longest prefix wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathPrefixMatch;

fn path_prefix_len(prefix: Option<&str>, path: Option<&str>) -> Option<usize> {
    match (prefix, path) {
        (None, _) | (Some(""), _) => Some(0),
        (Some(_), None) => None,
        (Some(pre), Some(path)) => {
            let pre = pre.trim_end_matches('/');
            if path == pre || path.starts_with(&format!("{}/", pre)) {
                Some(pre.len())
            } else {
                None
            }
        }
    }
}

impl IdentityMatcher for PathPrefixMatch {
    fn matches(
        &self,
        pattern: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        candidate: &ConsumerIdentity,
    ) -> bool {
        let others_equal = candidate
            .iter()
            .filter(|(k, _)| k.as_str() != ID_PATH_PREFIX)
            .all(|(k, v)| pattern.get(k) == Some(v.as_str()));
        if !others_equal {
            return false;
        }
        let requested = pattern.get(ID_PATH_PREFIX);
        let Some(len) = path_prefix_len(candidate.get(ID_PATH_PREFIX), requested) else {
            return false;
        };
        match current {
            None => true,
            Some(cur) => {
                let cur_len = path_prefix_len(cur.get(ID_PATH_PREFIX), requested).unwrap_or(0);
                len > cur_len || (len == cur_len && candidate.len() > cur.len())
            }
        }
    }
}

/// A set of credential properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Wire form of a credential set inside a credentials config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsSpec {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl CredentialsSpec {
    pub fn direct(credentials: &Credentials) -> Self {
        Self {
            object_type: DIRECT_CREDENTIALS_TYPE.to_string(),
            properties: credentials.properties().clone(),
        }
    }

    fn resolve(&self) -> Result<Credentials> {
        match self.object_type.as_str() {
            "Credentials" | "Credentials/v1" => Ok(Credentials(self.properties.clone())),
            other => Err(OcmError::not_supported(format!("credentials type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    pub identity: ConsumerIdentity,
    #[serde(default)]
    pub credentials: Vec<CredentialsSpec>,
}

/// Named repository of credentials, for example a docker config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasSpec {
    pub repository: UnstructuredTypedObject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<CredentialsSpec>,
}

/// `credentials.config.ocm.software`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub consumers: Vec<ConsumerSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, AliasSpec>,
}

impl CredentialsConfig {
    pub fn new() -> Self {
        Self {
            object_type: CREDENTIALS_CONFIG_TYPE.to_string(),
            consumers: Vec::new(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn add_consumer(mut self, identity: ConsumerIdentity, credentials: &Credentials) -> Self {
        self.consumers.push(ConsumerSpec {
            identity,
            credentials: vec![CredentialsSpec::direct(credentials)],
        });
        self
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Alias {
    repository: UnstructuredTypedObject,
    credentials: Option<Credentials>,
}

#[derive(Default)]
struct Store {
    consumers: RwLock<Vec<(ConsumerIdentity, Credentials)>>,
    aliases: RwLock<HashMap<String, Alias>>,
}

impl Store {
    fn set_consumer(&self, identity: ConsumerIdentity, credentials: Credentials) {
        let mut consumers = self.consumers.write();
        match consumers.iter_mut().find(|(id, _)| *id == identity) {
            Some(entry) => entry.1 = credentials,
            None => consumers.push((identity, credentials)),
        }
    }
}

impl ConfigTarget for Store {
    fn apply_config(&self, config: &ConfigObject) -> Result<()> {
        let ConfigObject::Credentials(cfg) = config else {
            return Ok(());
        };
        for consumer in &cfg.consumers {
            // later entries of the same consumer override earlier ones
            let mut merged = Credentials::new();
            for spec in &consumer.credentials {
                let resolved = spec.resolve()?;
                merged.0.extend(resolved.0);
            }
            self.set_consumer(consumer.identity.clone(), merged);
        }
        for (name, alias) in &cfg.aliases {
            let credentials = match alias.credentials.first() {
                Some(spec) => Some(spec.resolve()?),
                None => None,
            };
            self.aliases.write().insert(
                name.clone(),
                Alias {
                    repository: alias.repository.clone(),
                    credentials,
                },
            );
        }
        Ok(())
    }
}

pub struct CredentialsContext {
    config: Arc<ConfigContext>,
    attributes: Arc<Attributes>,
    updater: Updater,
    store: Store,
}

impl std::fmt::Debug for CredentialsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsContext")
            .field("consumers", &self.store.consumers.read().len())
            .finish()
    }
}

impl CredentialsContext {
    pub fn new(config: Arc<ConfigContext>) -> Arc<Self> {
        let attributes = Arc::new(Attributes::with_parent(config.attributes().clone()));
        Arc::new(Self {
            config,
            attributes,
            updater: Updater::new(),
            store: Store::default(),
        })
    }

    pub fn context_type(&self) -> &str {
        CONTEXT_TYPE
    }

    pub fn config(&self) -> &Arc<ConfigContext> {
        &self.config
    }

    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    /// Pull config objects applied since the last call.
    pub fn update(&self) -> Result<()> {
        self.updater.update(&self.config, &self.store)
    }

    pub fn set_credentials_for_consumer(&self, identity: ConsumerIdentity, credentials: Credentials) {
        tracing::debug!(consumer = %identity, "setting credentials");
        self.store.set_consumer(identity, credentials);
    }

    /// Best credentials for a consumer according to `matcher`.
    pub fn get_credentials_for_consumer(
        &self,
        pattern: &ConsumerIdentity,
        matcher: &dyn IdentityMatcher,
    ) -> Result<Credentials> {
        if let Err(e) = self.update() {
            tracing::warn!(error = %e, "config update failed");
        }
        let consumers = self.store.consumers.read();
        let mut best: Option<&(ConsumerIdentity, Credentials)> = None;
        for entry in consumers.iter() {
            if matcher.matches(pattern, best.map(|(id, _)| id), &entry.0) {
                best = Some(entry);
            }
        }
        best.map(|(_, c)| c.clone())
            .ok_or_else(|| OcmError::not_found("credentials for consumer", pattern.to_string()))
    }

    /// Like [`get_credentials_for_consumer`](Self::get_credentials_for_consumer)
    /// but `None` instead of a not-found error.
    pub fn find_credentials(
        &self,
        pattern: &ConsumerIdentity,
        matcher: &dyn IdentityMatcher,
    ) -> Result<Option<Credentials>> {
        match self.get_credentials_for_consumer(pattern, matcher) {
            Ok(c) => Ok(Some(c)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_alias(
        &self,
        name: &str,
        repository: UnstructuredTypedObject,
        credentials: Option<Credentials>,
    ) {
        self.store.aliases.write().insert(
            name.to_string(),
            Alias {
                repository,
                credentials,
            },
        );
    }

    /// Repository spec registered for an alias.
    pub fn alias_repository(&self, name: &str) -> Result<UnstructuredTypedObject> {
        self.update()?;
        self.store
            .aliases
            .read()
            .get(name)
            .map(|a| a.repository.clone())
            .ok_or_else(|| OcmError::not_found("credential alias", name))
    }

    pub fn credentials_for_alias(&self, name: &str) -> Result<Credentials> {
        self.update()?;
        let aliases = self.store.aliases.read();
        let alias = aliases
            .get(name)
            .ok_or_else(|| OcmError::not_found("credential alias", name))?;
        alias
            .credentials
            .clone()
            .ok_or_else(|| {
                OcmError::not_supported(format!(
                    "credential repository {}",
                    alias.repository.get_type()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_core::ErrorKind;

    fn ctx() -> Arc<CredentialsContext> {
        CredentialsContext::new(ConfigContext::builder().build())
    }

    #[test]
    fn test_partial_match_prefers_specific() {
        let ctx = ctx();
        ctx.set_credentials_for_consumer(
            ConsumerIdentity::new("OCIRegistry"),
            Credentials::new().with(USERNAME, "any"),
        );
        ctx.set_credentials_for_consumer(
            ConsumerIdentity::new("OCIRegistry").with(ID_HOSTNAME, "ghcr.io"),
            Credentials::new().with(USERNAME, "ghcr"),
        );

        let pattern = ConsumerIdentity::new("OCIRegistry").with(ID_HOSTNAME, "ghcr.io");
        let creds = ctx.get_credentials_for_consumer(&pattern, &PartialMatch).unwrap();
        assert_eq!(creds.get_property(USERNAME), Some("ghcr"));

        let other = ConsumerIdentity::new("OCIRegistry").with(ID_HOSTNAME, "quay.io");
        let creds = ctx.get_credentials_for_consumer(&other, &PartialMatch).unwrap();
        assert_eq!(creds.get_property(USERNAME), Some("any"));
    }

    #[test]
    fn test_no_match() {
        let ctx = ctx();
        let err = ctx
            .get_credentials_for_consumer(&ConsumerIdentity::new("Git"), &CompleteMatch)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(ctx
            .find_credentials(&ConsumerIdentity::new("Git"), &CompleteMatch)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_path_prefix_match() {
        let ctx = ctx();
        let host = oci_consumer_identity("ghcr.io");
        ctx.set_credentials_for_consumer(host.clone(), Credentials::new().with(USERNAME, "host"));
        ctx.set_credentials_for_consumer(
            host.clone().with(ID_PATH_PREFIX, "acme"),
            Credentials::new().with(USERNAME, "acme"),
        );

        let req = host.clone().with(ID_PATH_PREFIX, "acme/app");
        let creds = ctx.get_credentials_for_consumer(&req, &PathPrefixMatch).unwrap();
        assert_eq!(creds.get_property(USERNAME), Some("acme"));

        let req = host.clone().with(ID_PATH_PREFIX, "acmecorp/app");
        let creds = ctx.get_credentials_for_consumer(&req, &PathPrefixMatch).unwrap();
        assert_eq!(creds.get_property(USERNAME), Some("host"));
    }

    #[test]
    fn test_oci_consumer_identity_port() {
        let id = oci_consumer_identity("localhost:5000");
        assert_eq!(id.get(ID_HOSTNAME), Some("localhost"));
        assert_eq!(id.get(ID_PORT), Some("5000"));
        assert_eq!(oci_consumer_identity("ghcr.io").get(ID_PORT), None);
    }

    #[test]
    fn test_credentials_from_config() {
        let ctx = ctx();
        ctx.config()
            .apply_data(
                br#"
type: credentials.config.ocm.software
consumers:
- identity:
    type: OCIRegistry
    hostname: ghcr.io
  credentials:
  - type: Credentials
    properties:
      username: alice
      password: secret
aliases:
  corp:
    repository:
      type: DockerConfig/v1
      dockerConfigFile: ~/.docker/config.json
"#,
                "inline",
            )
            .unwrap();

        let creds = ctx
            .get_credentials_for_consumer(&oci_consumer_identity("ghcr.io"), &PartialMatch)
            .unwrap();
        assert_eq!(creds.get_property(PASSWORD), Some("secret"));
        assert_eq!(
            ctx.alias_repository("corp").unwrap().get_type(),
            "DockerConfig/v1"
        );
        assert_eq!(
            ctx.credentials_for_alias("corp").unwrap_err().kind(),
            ErrorKind::NotSupported
        );
    }

    #[test]
    fn test_unsupported_credentials_type() {
        let ctx = ctx();
        ctx.config()
            .apply_data(
                br#"{"type":"credentials.config.ocm.software","consumers":[{"identity":{"type":"Git"},"credentials":[{"type":"Vault"}]}]}"#,
                "inline",
            )
            .unwrap();
        assert_eq!(ctx.update().unwrap_err().kind(), ErrorKind::NotSupported);
    }
}
