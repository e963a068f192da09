//! OCM Runtime - contexts, repositories, sessions and transfer.
//!
//! This crate provides the I/O side of the Open Component Model: the
//! layered contexts, blob and access method handling, the OCI storage
//! abstraction and the repository backends built on it.

#![allow(clippy::result_large_err)]

pub mod access;
pub mod archive;
pub mod attributes;
pub mod blob;
pub mod blobhandler;
pub mod contexts;
pub mod oci;
pub mod repositories;
pub mod session;
pub mod transfer;

// Re-export common types
pub use access::{AccessMethod, AccessSpec};
pub use archive::{AccessMode, FileFormat};
pub use attributes::Attributes;
pub use blob::{BlobAccess, FileBlob, LazyBlob, MemoryBlob};
pub use blobhandler::{BlobHandler, BlobHandlerRegistry, HandlerKey};
pub use contexts::{default_context, ConfigContext, CredentialsContext, OciContext, OcmContext};
pub use repositories::{
    ComponentAccess, ComponentArchive, ComponentVersionAccess, OciComponentRepository, Repository,
    RepositorySpec,
};
pub use session::Session;
pub use transfer::{transfer_version, StandardHandler, TransferHandler, TransferOptions};

/// OCM runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
