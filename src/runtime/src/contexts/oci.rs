//! OCI context: opens OCI stores from repository specifications.

use std::collections::HashMap;
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::{Scheme, TypedObject};
use parking_lot::RwLock;

use super::config::ConfigContext;
use super::credentials::{
    oci_consumer_identity, Credentials, CredentialsContext, PathPrefixMatch, ID_PATH_PREFIX,
};
use crate::attributes::Attributes;
use crate::oci::memory::MEMORY_TYPE;
use crate::oci::spec::repository_scheme;
use crate::oci::{host_of, CtfOciRepository, OciRepository, OciRepositorySpec};

pub const CONTEXT_TYPE: &str = "oci.context.ocm.software";

pub struct OciContext {
    credentials: Arc<CredentialsContext>,
    attributes: Arc<Attributes>,
    scheme: Arc<Scheme<OciRepositorySpec>>,
    /// Stores answering for a registry host instead of the network
    registered: RwLock<HashMap<String, Arc<dyn OciRepository>>>,
}

impl std::fmt::Debug for OciContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciContext")
            .field("registered", &self.registered.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OciContext {
    pub fn new(credentials: Arc<CredentialsContext>) -> Arc<Self> {
        Self::with_scheme(credentials, repository_scheme())
    }

    pub fn with_scheme(
        credentials: Arc<CredentialsContext>,
        scheme: Scheme<OciRepositorySpec>,
    ) -> Arc<Self> {
        let attributes = Arc::new(Attributes::with_parent(credentials.attributes().clone()));
        Arc::new(Self {
            credentials,
            attributes,
            scheme: Arc::new(scheme),
            registered: RwLock::new(HashMap::new()),
        })
    }

    pub fn context_type(&self) -> &str {
        CONTEXT_TYPE
    }

    pub fn credentials(&self) -> &Arc<CredentialsContext> {
        &self.credentials
    }

    pub fn config(&self) -> &Arc<ConfigContext> {
        self.credentials.config()
    }

    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    pub fn scheme(&self) -> &Arc<Scheme<OciRepositorySpec>> {
        &self.scheme
    }

    /// Serve a registry host from the given store.
    pub fn register_repository(&self, base_url: &str, repository: Arc<dyn OciRepository>) {
        let host = host_of(base_url).to_string();
        tracing::debug!(host = %host, "registering OCI store for host");
        self.registered.write().insert(host, repository);
    }

    pub fn repository_for_host(&self, host: &str) -> Option<Arc<dyn OciRepository>> {
        self.registered.read().get(host_of(host)).cloned()
    }

    /// Credentials for a registry path, `None` if nothing is configured.
    pub fn registry_credentials(&self, host: &str, path: &str) -> Result<Option<Credentials>> {
        let mut pattern = oci_consumer_identity(host_of(host));
        if !path.is_empty() {
            pattern = pattern.with(ID_PATH_PREFIX, path);
        }
        self.credentials.find_credentials(&pattern, &PathPrefixMatch)
    }

    /// Open the OCI store described by a specification.
    pub fn repository_for_spec(&self, spec: &OciRepositorySpec) -> Result<Arc<dyn OciRepository>> {
        match spec {
            OciRepositorySpec::Registry(reg) => {
                if let Some(repo) = self.repository_for_host(&reg.base_url) {
                    return Ok(repo);
                }
                self.open_registry(reg)
            }
            OciRepositorySpec::Ctf(ctf) => Ok(Arc::new(CtfOciRepository::open(ctf)?)),
            OciRepositorySpec::Unknown(raw) if raw.get_type() == MEMORY_TYPE => raw
                .get("host")
                .and_then(|h| h.as_str())
                .and_then(|h| self.repository_for_host(h))
                .ok_or_else(|| OcmError::not_found("memory repository", raw.to_value().to_string())),
            OciRepositorySpec::Unknown(_) => {
                let resolved = self.scheme.evaluate(spec.clone())?;
                self.repository_for_spec(&resolved)
            }
        }
    }

    #[cfg(feature = "registry")]
    fn open_registry(&self, spec: &crate::oci::RegistrySpec) -> Result<Arc<dyn OciRepository>> {
        let creds = self.registry_credentials(&spec.base_url, spec.sub_path.as_deref().unwrap_or(""))?;
        Ok(Arc::new(crate::oci::RegistryOciRepository::new(spec, creds.as_ref())?))
    }

    #[cfg(not(feature = "registry"))]
    fn open_registry(&self, spec: &crate::oci::RegistrySpec) -> Result<Arc<dyn OciRepository>> {
        Err(OcmError::not_supported(format!(
            "registry access to {} (built without registry support)",
            spec.base_url
        )))
    }
}
