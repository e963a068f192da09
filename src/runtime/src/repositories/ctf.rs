//! Component repositories in a Common Transport Format archive.
//!
//! The archive is an OCI store; component versions use the generic OCI
//! mapping of [`super::genericocireg`].

use std::path::Path;
use std::sync::Arc;

use ocm_core::error::Result;

use super::genericocireg::OciComponentRepository;
use crate::archive::{AccessMode, FileFormat};
use crate::contexts::ocm::OcmContext;
use crate::oci::{CtfOciRepository, CtfSpec};

pub fn open(ctx: &Arc<OcmContext>, spec: &CtfSpec) -> Result<Arc<OciComponentRepository>> {
    let store = CtfOciRepository::open(spec)?;
    tracing::debug!(path = %spec.file_path, "opened transport archive");
    Ok(Arc::new(OciComponentRepository::new(ctx.clone(), Arc::new(store))))
}

pub fn open_path(
    ctx: &Arc<OcmContext>,
    path: &Path,
    mode: AccessMode,
) -> Result<Arc<OciComponentRepository>> {
    open(ctx, &CtfSpec::new(&path.to_string_lossy(), mode))
}

/// Create a new archive, failing if one already exists at `path`.
pub fn create(
    ctx: &Arc<OcmContext>,
    path: &Path,
    format: FileFormat,
) -> Result<Arc<OciComponentRepository>> {
    let store = CtfOciRepository::create(path, format)?;
    Ok(Arc::new(OciComponentRepository::new(ctx.clone(), Arc::new(store))))
}
