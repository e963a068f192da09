//! Layered contexts.
//!
//! ```text
//! OcmContext ──▶ OciContext ──▶ CredentialsContext ──▶ ConfigContext
//! ```
//!
//! Each layer holds the one below it and an attribute store falling back
//! to the lower layer's store. Config applied to the config context is
//! pulled lazily by the layers above.

pub mod config;
pub mod credentials;
pub mod oci;
pub mod ocm;

pub use config::{ConfigContext, ConfigObject, ConfigTarget};
pub use credentials::{ConsumerIdentity, Credentials, CredentialsContext};
pub use oci::OciContext;
pub use ocm::{default_context, OcmContext};
