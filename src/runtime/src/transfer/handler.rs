//! Transfer policies.

use std::sync::Arc;

use ocm_core::error::Result;
use ocm_core::typed::UnstructuredTypedObject;
use ocm_core::{ComponentReference, Resource, Source};

use crate::access::{AccessMethod, AccessSpec};
use crate::repositories::{ComponentVersionAccess, Repository};

/// Decides what a transfer follows and how artifacts are moved.
pub trait TransferHandler: Send + Sync {
    /// Repository and handler for a referenced version, `None` to skip it.
    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        src: &dyn ComponentVersionAccess,
        reference: &ComponentReference,
    ) -> Result<Option<(Arc<dyn Repository>, Arc<dyn TransferHandler>)>>;

    /// Move one resource; the target already holds the source descriptor.
    fn transfer_resource(
        &self,
        src: &dyn ComponentVersionAccess,
        res: &Resource,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()>;

    fn transfer_source(
        &self,
        src: &dyn ComponentVersionAccess,
        source: &Source,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()>;

    /// Replace versions already present in the target.
    fn overwrite(&self) -> bool {
        false
    }

    /// Leave existing target versions alone entirely, including their references.
    fn skip_update(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Follow component references
    pub recursive: bool,
    /// Copy globally accessible artifacts into the target as well
    pub resources_by_value: bool,
    pub overwrite: bool,
    pub skip_update: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StandardHandler {
    options: TransferOptions,
}

impl StandardHandler {
    pub fn new(options: TransferOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Decoded access if the artifact has to be copied by value.
    fn copy_spec(
        &self,
        src: &dyn ComponentVersionAccess,
        access: Option<&UnstructuredTypedObject>,
    ) -> Result<Option<AccessSpec>> {
        let Some(access) = access else {
            return Ok(None);
        };
        let spec = src.context().access_scheme().decode_unstructured(access.clone())?;
        let copy = match &spec {
            AccessSpec::Unknown(_) => false,
            s if s.is_local() => true,
            _ => self.options.resources_by_value,
        };
        Ok(copy.then_some(spec))
    }
}

fn reference_hint(spec: &AccessSpec) -> Option<&str> {
    match spec {
        AccessSpec::LocalBlob(l) => l.reference_name.as_deref(),
        _ => None,
    }
}

impl TransferHandler for StandardHandler {
    fn transfer_version(
        &self,
        repo: &Arc<dyn Repository>,
        _src: &dyn ComponentVersionAccess,
        _reference: &ComponentReference,
    ) -> Result<Option<(Arc<dyn Repository>, Arc<dyn TransferHandler>)>> {
        if !self.options.recursive {
            return Ok(None);
        }
        Ok(Some((repo.clone(), Arc::new(self.clone()))))
    }

    fn transfer_resource(
        &self,
        src: &dyn ComponentVersionAccess,
        res: &Resource,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        let Some(spec) = self.copy_spec(src, res.access.as_ref())? else {
            return Ok(());
        };
        let Some(access) = res.access.as_ref() else {
            return Ok(());
        };
        let method = src.access_method(access)?;
        tracing::debug!(resource = %res.meta.name, access = %method.access_kind(), "copying resource");
        target.set_resource_blob(
            res.clone(),
            method.as_blob_access(),
            reference_hint(&spec),
            None,
        )?;
        method.close()
    }

    fn transfer_source(
        &self,
        src: &dyn ComponentVersionAccess,
        source: &Source,
        target: &dyn ComponentVersionAccess,
    ) -> Result<()> {
        let Some(spec) = self.copy_spec(src, source.access.as_ref())? else {
            return Ok(());
        };
        let Some(access) = source.access.as_ref() else {
            return Ok(());
        };
        let method = src.access_method(access)?;
        tracing::debug!(source = %source.meta.name, access = %method.access_kind(), "copying source");
        target.set_source_blob(
            source.clone(),
            method.as_blob_access(),
            reference_hint(&spec),
            None,
        )?;
        method.close()
    }

    fn overwrite(&self) -> bool {
        self.options.overwrite
    }

    fn skip_update(&self) -> bool {
        self.options.skip_update
    }
}
