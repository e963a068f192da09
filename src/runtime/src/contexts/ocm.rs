//! OCM context: the top of the context stack.
//!
//! It resolves access specifications to access methods, selects blob
//! handlers, and opens repositories from repository specifications.

use std::sync::{Arc, OnceLock};

use ocm_core::error::Result;
use ocm_core::typed::{Scheme, TypedObject, UnstructuredTypedObject};
use ocm_core::OcmConfig;

use super::config::ConfigContext;
use super::credentials::CredentialsContext;
use super::oci::OciContext;
use crate::access::{self, access_scheme, AccessMethod, AccessSpec};
use crate::attributes::Attributes;
use crate::blobhandler::BlobHandlerRegistry;
use crate::oci::memory::MEMORY_TYPE;
use crate::oci::OciRepositorySpec;
use crate::repositories::{
    repository_scheme, ComponentArchive, OciComponentRepository, Repository, RepositorySpec,
};

pub const CONTEXT_TYPE: &str = "ocm.context.ocm.software";

pub struct OcmContext {
    oci: Arc<OciContext>,
    attributes: Arc<Attributes>,
    access_scheme: Arc<Scheme<AccessSpec>>,
    repository_scheme: Arc<Scheme<RepositorySpec>>,
    blob_handlers: BlobHandlerRegistry,
}

impl std::fmt::Debug for OcmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcmContext")
            .field("oci", &self.oci)
            .field("blob_handlers", &self.blob_handlers)
            .finish()
    }
}

impl OcmContext {
    pub fn builder() -> OcmContextBuilder {
        OcmContextBuilder::default()
    }

    pub fn context_type(&self) -> &str {
        CONTEXT_TYPE
    }

    pub fn oci(&self) -> &Arc<OciContext> {
        &self.oci
    }

    pub fn credentials(&self) -> &Arc<CredentialsContext> {
        self.oci.credentials()
    }

    pub fn config(&self) -> &Arc<ConfigContext> {
        self.oci.config()
    }

    pub fn attributes(&self) -> &Arc<Attributes> {
        &self.attributes
    }

    pub fn access_scheme(&self) -> &Arc<Scheme<AccessSpec>> {
        &self.access_scheme
    }

    pub fn repository_scheme(&self) -> &Arc<Scheme<RepositorySpec>> {
        &self.repository_scheme
    }

    pub fn blob_handlers(&self) -> &BlobHandlerRegistry {
        &self.blob_handlers
    }

    /// Pull pending configuration into the lower contexts.
    pub fn update(&self) -> Result<()> {
        self.credentials().update()
    }

    /// Decode an access specification; unknown kinds are an error here.
    pub fn access_spec_for(&self, spec: &UnstructuredTypedObject) -> Result<AccessSpec> {
        self.access_scheme.enforce_decode(spec)
    }

    /// Decode serialized access specification data. Unknown kinds are kept.
    pub fn decode_access_spec(&self, data: &[u8]) -> Result<AccessSpec> {
        self.access_scheme.decode(data)
    }

    /// Access method for a specification resolvable without a repository.
    pub fn access_method_for_global(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>> {
        access::oci::global_access_method(&self.oci, spec)
    }

    /// Decode serialized repository specification data.
    pub fn decode_repository_spec(&self, data: &[u8]) -> Result<RepositorySpec> {
        self.repository_scheme.decode(data)
    }

    /// Open the repository described by `spec`.
    pub fn repository_for_spec(self: &Arc<Self>, spec: &RepositorySpec) -> Result<Arc<dyn Repository>> {
        self.update()
            .map_err(|e| e.wrap(format!("opening {} repository", spec.get_type())))?;
        tracing::debug!(repository_type = %spec.get_type(), "opening repository");
        match spec {
            RepositorySpec::Oci(oci_spec) => {
                let store = self.oci.repository_for_spec(oci_spec)?;
                Ok(Arc::new(OciComponentRepository::with_spec(
                    self.clone(),
                    store,
                    oci_spec.clone(),
                )))
            }
            RepositorySpec::ComponentArchive(ca) => Ok(ComponentArchive::open(self, ca)?),
            RepositorySpec::Unknown(raw) if raw.get_type() == MEMORY_TYPE => {
                let store = self
                    .oci
                    .repository_for_spec(&OciRepositorySpec::Unknown(raw.clone()))?;
                Ok(Arc::new(OciComponentRepository::new(self.clone(), store)))
            }
            RepositorySpec::Unknown(_) => {
                let resolved = self.repository_scheme.evaluate(spec.clone())?;
                self.repository_for_spec(&resolved)
            }
        }
    }

    /// Open a repository from its serialized specification.
    pub fn repository_for_data(self: &Arc<Self>, data: &[u8]) -> Result<Arc<dyn Repository>> {
        let spec = self.decode_repository_spec(data)?;
        self.repository_for_spec(&spec)
    }
}

#[derive(Default)]
pub struct OcmContextBuilder {
    oci: Option<Arc<OciContext>>,
    credentials: Option<Arc<CredentialsContext>>,
    config: Option<Arc<ConfigContext>>,
    access_scheme: Option<Scheme<AccessSpec>>,
    repository_scheme: Option<Scheme<RepositorySpec>>,
    blob_handlers: Option<BlobHandlerRegistry>,
}

impl OcmContextBuilder {
    pub fn with_oci(mut self, oci: Arc<OciContext>) -> Self {
        self.oci = Some(oci);
        self
    }

    /// Used when no OCI context is given.
    pub fn with_credentials(mut self, credentials: Arc<CredentialsContext>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Used when neither an OCI nor a credentials context is given.
    pub fn with_config(mut self, config: Arc<ConfigContext>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_access_scheme(mut self, scheme: Scheme<AccessSpec>) -> Self {
        self.access_scheme = Some(scheme);
        self
    }

    pub fn with_repository_scheme(mut self, scheme: Scheme<RepositorySpec>) -> Self {
        self.repository_scheme = Some(scheme);
        self
    }

    pub fn with_blob_handlers(mut self, handlers: BlobHandlerRegistry) -> Self {
        self.blob_handlers = Some(handlers);
        self
    }

    pub fn build(self) -> Arc<OcmContext> {
        let oci = match self.oci {
            Some(oci) => oci,
            None => {
                let credentials = match self.credentials {
                    Some(c) => c,
                    None => CredentialsContext::new(
                        self.config.unwrap_or_else(|| ConfigContext::builder().build()),
                    ),
                };
                OciContext::new(credentials)
            }
        };
        let attributes = Arc::new(Attributes::with_parent(oci.attributes().clone()));
        Arc::new(OcmContext {
            oci,
            attributes,
            access_scheme: Arc::new(self.access_scheme.unwrap_or_else(access_scheme)),
            repository_scheme: Arc::new(self.repository_scheme.unwrap_or_else(repository_scheme)),
            blob_handlers: self.blob_handlers.unwrap_or_else(BlobHandlerRegistry::standard),
        })
    }
}

static DEFAULT_CONTEXT: OnceLock<Arc<OcmContext>> = OnceLock::new();

/// Process wide context configured from the default config file.
///
/// Meant for top level entry points; library code takes a context parameter.
pub fn default_context() -> Arc<OcmContext> {
    DEFAULT_CONTEXT
        .get_or_init(|| {
            let ctx = OcmContext::builder().build();
            match OcmConfig::load_default() {
                Ok(config) => {
                    if let Err(e) = ctx.config().apply_ocm_config(&config, "default config") {
                        tracing::warn!(error = %e, "applying default config failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "loading default config failed"),
            }
            ctx
        })
        .clone()
}
