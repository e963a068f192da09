//! OCM Core - component model types without I/O.
//!
//! This crate holds the pieces of the Open Component Model that every
//! backend shares: the typed-object scheme, the component descriptor model
//! with its defaulting, validation and serialized versions, the error
//! taxonomy, and the configuration and logging setup.

pub mod compdesc;
pub mod config;
pub mod error;
pub mod field;
pub mod log;
pub mod typed;

// Re-export commonly used types
pub use compdesc::{ComponentDescriptor, ComponentReference, ElementMeta, Identity, Resource, Source};
pub use config::OcmConfig;
pub use error::{ErrorKind, MultiError, OcmError, Result};
pub use typed::{Scheme, SchemeObject, TypedObject, UnstructuredTypedObject};

/// OCM core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
