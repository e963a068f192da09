//! Component version shared by all backends.
//!
//! The descriptor is held in memory and written through the backend's
//! [`VersionStorage`] on `update` or `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ocm_core::compdesc::{default_component, validate};
use ocm_core::error::{OcmError, Result};
use ocm_core::typed::UnstructuredTypedObject;
use ocm_core::{ComponentDescriptor, ComponentReference, Resource, Source};
use parking_lot::Mutex;

use super::{ComponentVersionAccess, RepositorySpec};
use crate::access::{AccessMethod, AccessSpec};
use crate::blob::BlobAccess;
use crate::blobhandler::{BlobSink, StorageContext};
use crate::contexts::ocm::{OcmContext, CONTEXT_TYPE};

/// Backend side of a component version.
pub trait VersionStorage: BlobSink + Send + Sync {
    fn as_sink(&self) -> &dyn BlobSink;

    fn repository_spec(&self) -> RepositorySpec;

    /// Type used to select blob handlers.
    fn repository_type(&self) -> &str;

    /// Access method for a local access specification.
    ///
    /// Local kinds the backend does not store yield `NotSupported`.
    fn local_access(&self, spec: &AccessSpec) -> Result<Box<dyn AccessMethod>>;

    fn is_readonly(&self) -> bool;

    /// Persist the descriptor.
    fn commit(&self, desc: &ComponentDescriptor) -> Result<()>;
}

pub struct ComponentVersion {
    ctx: Arc<OcmContext>,
    name: String,
    version: String,
    desc: Mutex<ComponentDescriptor>,
    storage: Arc<dyn VersionStorage>,
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for ComponentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentVersion")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ComponentVersion {
    pub fn new(
        ctx: Arc<OcmContext>,
        desc: ComponentDescriptor,
        storage: Arc<dyn VersionStorage>,
    ) -> Self {
        Self {
            ctx,
            name: desc.name().to_string(),
            version: desc.version().to_string(),
            desc: Mutex::new(desc),
            storage,
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// A version not yet persisted; it is written on the first update.
    pub fn new_pending(
        ctx: Arc<OcmContext>,
        desc: ComponentDescriptor,
        storage: Arc<dyn VersionStorage>,
    ) -> Self {
        let cv = Self::new(ctx, desc, storage);
        cv.dirty.store(true, Ordering::SeqCst);
        cv
    }

    pub fn storage(&self) -> &Arc<dyn VersionStorage> {
        &self.storage
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OcmError::closed(
                "component version",
                format!("{}:{}", self.name, self.version),
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.storage.is_readonly() {
            return Err(OcmError::not_supported(format!(
                "modifying readonly component version {}:{}",
                self.name, self.version
            )));
        }
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut ComponentDescriptor)) -> Result<()> {
        self.check_writable()?;
        let mut desc = self.desc.lock();
        f(&mut desc);
        default_component(&mut desc);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let desc = self.desc.lock().clone();
        validate(&desc).map_err(|e| e.wrap(format!("component version {}:{}", self.name, self.version)))?;
        self.storage.commit(&desc)?;
        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(component = %self.name, version = %self.version, "committed component version");
        Ok(())
    }
}

impl ComponentVersionAccess for ComponentVersion {
    fn context(&self) -> &Arc<OcmContext> {
        &self.ctx
    }

    fn repository_spec(&self) -> RepositorySpec {
        self.storage.repository_spec()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn get_descriptor(&self) -> Result<ComponentDescriptor> {
        self.check_open()?;
        Ok(self.desc.lock().clone())
    }

    fn set_descriptor(&self, desc: ComponentDescriptor) -> Result<()> {
        if desc.name() != self.name || desc.version() != self.version {
            return Err(OcmError::invalid(
                "component descriptor",
                format!("{}:{}", desc.name(), desc.version()),
                format!("expected {}:{}", self.name, self.version),
            ));
        }
        self.modify(|d| *d = desc)
    }

    fn access_method(&self, spec: &UnstructuredTypedObject) -> Result<Box<dyn AccessMethod>> {
        self.check_open()?;
        let access = self.ctx.access_spec_for(spec)?;
        if !access.is_local() {
            return self.ctx.access_method_for_global(&access);
        }
        match self.storage.local_access(&access) {
            Err(e) if e.is_not_found() && access.global_access().is_some() => {
                tracing::debug!(error = %e, "local blob missing, using global access");
                let global = access
                    .global_access()
                    .map(|g| self.ctx.access_spec_for(g))
                    .transpose()?;
                match global {
                    Some(g) => self.ctx.access_method_for_global(&g),
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    fn add_blob(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
    ) -> Result<AccessSpec> {
        self.check_writable()?;
        let storage = StorageContext {
            context_type: CONTEXT_TYPE,
            repository_type: self.storage.repository_type(),
            sink: self.storage.as_sink(),
        };
        self.ctx
            .blob_handlers()
            .store_blob(blob, reference_hint, global, &storage)
            .map_err(|e| e.wrap(format!("adding blob to {}:{}", self.name, self.version)))
    }

    fn set_resource(&self, mut res: Resource, access: &AccessSpec) -> Result<()> {
        res.access = Some(access.to_unstructured()?);
        self.modify(|d| d.set_resource(res))
    }

    fn set_source(&self, mut src: Source, access: &AccessSpec) -> Result<()> {
        src.access = Some(access.to_unstructured()?);
        self.modify(|d| d.set_source(src))
    }

    fn set_reference(&self, reference: ComponentReference) -> Result<()> {
        self.modify(|d| d.set_reference(reference))
    }

    fn is_readonly(&self) -> bool {
        self.storage.is_readonly()
    }

    fn update(&self) -> Result<()> {
        self.check_writable()?;
        self.commit()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.is_dirty() && !self.storage.is_readonly() {
            return self.commit();
        }
        Ok(())
    }
}
