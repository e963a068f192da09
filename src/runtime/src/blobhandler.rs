//! Blob handlers decide how blobs added to a component version are stored.
//!
//! Handlers are registered for a `(context type, repository type, mime type)`
//! key where any part may be empty. Lookup tiers, most specific first:
//!
//! ```text
//! 1. exact key                      (mime narrowed by stripping +suffix)
//! 2. mime type only                 (narrowed the same way)
//! 3. repository type only
//! 4. default handlers
//! ```
//!
//! Within a tier handlers run in registration order. A handler declines by
//! returning `Ok(None)`; the next candidate is tried.

use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use ocm_core::typed::UnstructuredTypedObject;
use parking_lot::RwLock;

use crate::access::{AccessSpec, LocalBlobSpec, OciBlobSpec};
use crate::blob::BlobAccess;

/// Storage backend a handler works on.
pub trait BlobSink {
    /// Store a blob natively and return its local access.
    fn store_local(&self, blob: &dyn BlobAccess, reference_hint: Option<&str>)
        -> Result<LocalBlobSpec>;

    /// `host/namespace` under which stored blobs are reachable from outside.
    fn external_namespace(&self) -> Option<String> {
        None
    }
}

/// Where a blob is being stored.
pub struct StorageContext<'a> {
    pub context_type: &'a str,
    pub repository_type: &'a str,
    pub sink: &'a dyn BlobSink,
}

pub trait BlobHandler: Send + Sync {
    fn store_blob(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
        ctx: &StorageContext<'_>,
    ) -> Result<Option<AccessSpec>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub context_type: String,
    pub repository_type: String,
    pub mime_type: String,
}

impl HandlerKey {
    pub fn new(context_type: &str, repository_type: &str, mime_type: &str) -> Self {
        Self {
            context_type: context_type.to_string(),
            repository_type: repository_type.to_string(),
            mime_type: mime_type.to_string(),
        }
    }

    pub fn for_mime(mime_type: &str) -> Self {
        Self::new("", "", mime_type)
    }

    pub fn for_repository(context_type: &str, repository_type: &str) -> Self {
        Self::new(context_type, repository_type, "")
    }
}

/// `a/b+c+d` → `[a/b+c+d, a/b+c, a/b]`
fn narrowed_mime_types(mime: &str) -> Vec<&str> {
    let mut result = vec![mime];
    let mut cur = mime;
    while let Some(idx) = cur.rfind('+') {
        cur = &cur[..idx];
        result.push(cur);
    }
    result
}

#[derive(Default)]
pub struct BlobHandlerRegistry {
    handlers: RwLock<Vec<(HandlerKey, Arc<dyn BlobHandler>)>>,
    defaults: RwLock<Vec<Arc<dyn BlobHandler>>>,
}

impl std::fmt::Debug for BlobHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<HandlerKey> = self.handlers.read().iter().map(|(k, _)| k.clone()).collect();
        f.debug_struct("BlobHandlerRegistry")
            .field("handlers", &keys)
            .field("defaults", &self.defaults.read().len())
            .finish()
    }
}

impl BlobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers of this crate.
    pub fn standard() -> Self {
        let registry = Self::new();
        registry.register(
            HandlerKey::for_repository("", crate::oci::spec::OCI_REGISTRY_TYPE),
            Arc::new(OciGlobalBlobHandler),
        );
        registry.register_default(Arc::new(LocalBlobHandler));
        registry
    }

    pub fn register(&self, key: HandlerKey, handler: Arc<dyn BlobHandler>) {
        self.handlers.write().push((key, handler));
    }

    pub fn register_default(&self, handler: Arc<dyn BlobHandler>) {
        self.defaults.write().push(handler);
    }

    /// Handlers to try for a storage request, most specific first.
    pub fn candidates(
        &self,
        context_type: &str,
        repository_type: &str,
        mime_type: &str,
    ) -> Vec<Arc<dyn BlobHandler>> {
        let handlers = self.handlers.read();
        let mut result = Vec::new();
        let ctx_matches = |k: &HandlerKey| k.context_type.is_empty() || k.context_type == context_type;

        for mime in narrowed_mime_types(mime_type) {
            result.extend(
                handlers
                    .iter()
                    .filter(|(k, _)| {
                        !k.repository_type.is_empty()
                            && !k.mime_type.is_empty()
                            && ctx_matches(k)
                            && k.repository_type == repository_type
                            && k.mime_type == mime
                    })
                    .map(|(_, h)| h.clone()),
            );
        }
        for mime in narrowed_mime_types(mime_type) {
            result.extend(
                handlers
                    .iter()
                    .filter(|(k, _)| {
                        k.repository_type.is_empty() && k.mime_type == mime && !mime.is_empty()
                    })
                    .map(|(_, h)| h.clone()),
            );
        }
        result.extend(
            handlers
                .iter()
                .filter(|(k, _)| {
                    k.mime_type.is_empty()
                        && !k.repository_type.is_empty()
                        && ctx_matches(k)
                        && k.repository_type == repository_type
                })
                .map(|(_, h)| h.clone()),
        );
        result.extend(self.defaults.read().iter().cloned());
        result
    }

    /// Store a blob with the first handler that accepts it.
    pub fn store_blob(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
        ctx: &StorageContext<'_>,
    ) -> Result<AccessSpec> {
        for handler in self.candidates(ctx.context_type, ctx.repository_type, blob.mime_type()) {
            if let Some(spec) = handler.store_blob(blob, reference_hint, global, ctx)? {
                return Ok(spec);
            }
        }
        Err(OcmError::not_supported(format!(
            "storing blob of type {} in {} repository",
            blob.mime_type(),
            ctx.repository_type
        )))
    }
}

/// Stores the blob locally, keeping a given global access.
#[derive(Debug, Default)]
pub struct LocalBlobHandler;

impl BlobHandler for LocalBlobHandler {
    fn store_blob(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
        ctx: &StorageContext<'_>,
    ) -> Result<Option<AccessSpec>> {
        let mut spec = ctx.sink.store_local(blob, reference_hint)?;
        if spec.global_access.is_none() {
            spec.global_access = global.cloned();
        }
        Ok(Some(spec.into()))
    }
}

/// For repositories reachable through the OCI distribution API: the local
/// blob additionally gets an `ociBlob` global access.
#[derive(Debug, Default)]
pub struct OciGlobalBlobHandler;

impl BlobHandler for OciGlobalBlobHandler {
    fn store_blob(
        &self,
        blob: &dyn BlobAccess,
        reference_hint: Option<&str>,
        global: Option<&UnstructuredTypedObject>,
        ctx: &StorageContext<'_>,
    ) -> Result<Option<AccessSpec>> {
        let Some(namespace) = ctx.sink.external_namespace() else {
            return Ok(None);
        };
        let local = ctx.sink.store_local(blob, reference_hint)?;
        let spec = if let Some(g) = global {
            LocalBlobSpec {
                global_access: Some(g.clone()),
                ..local
            }
        } else {
            let oci = OciBlobSpec::new(&namespace, blob.mime_type(), &blob.digest()?, blob.size()?);
            local.with_global_access(&oci.into())?
        };
        Ok(Some(spec.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlob;
    use ocm_core::ErrorKind;
    use parking_lot::Mutex;

    /// Records its name and then declines or accepts.
    struct Recording {
        name: &'static str,
        accept: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl BlobHandler for Recording {
        fn store_blob(
            &self,
            _blob: &dyn BlobAccess,
            _hint: Option<&str>,
            _global: Option<&UnstructuredTypedObject>,
            _ctx: &StorageContext<'_>,
        ) -> Result<Option<AccessSpec>> {
            self.log.lock().push(self.name);
            Ok(self
                .accept
                .then(|| LocalBlobSpec::new(self.name, "text/plain").into()))
        }
    }

    struct NullSink;

    impl BlobSink for NullSink {
        fn store_local(&self, blob: &dyn BlobAccess, _hint: Option<&str>) -> Result<LocalBlobSpec> {
            Ok(LocalBlobSpec::new(&blob.digest()?, blob.mime_type()))
        }
    }

    struct ExternalSink;

    impl BlobSink for ExternalSink {
        fn store_local(&self, blob: &dyn BlobAccess, _hint: Option<&str>) -> Result<LocalBlobSpec> {
            Ok(LocalBlobSpec::new(&blob.digest()?, blob.mime_type()))
        }

        fn external_namespace(&self) -> Option<String> {
            Some("ghcr.io/acme/component-descriptors/app".to_string())
        }
    }

    fn recording(
        name: &'static str,
        accept: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn BlobHandler> {
        Arc::new(Recording {
            name,
            accept,
            log: log.clone(),
        })
    }

    fn stored_by(registry: &BlobHandlerRegistry, ctx: &str, repo: &str, mime: &str) -> String {
        let sink = NullSink;
        let storage = StorageContext {
            context_type: ctx,
            repository_type: repo,
            sink: &sink,
        };
        match registry
            .store_blob(&MemoryBlob::new("x", mime), None, None, &storage)
            .unwrap()
        {
            AccessSpec::LocalBlob(l) => l.local_reference,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = BlobHandlerRegistry::new();
        registry.register_default(recording("default", true, &log));
        registry.register(HandlerKey::for_mime("mimeX"), recording("mime", true, &log));
        registry.register(
            HandlerKey::new("ctxA", "repoA", "mimeX"),
            recording("exact", true, &log),
        );

        assert_eq!(stored_by(&registry, "ctxA", "repoA", "mimeX"), "exact");
        assert_eq!(stored_by(&registry, "ctxB", "repoB", "mimeX"), "mime");
        assert_eq!(stored_by(&registry, "ctxA", "repoA", "mimeY"), "default");
    }

    #[test]
    fn test_mime_narrowing_and_decline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = BlobHandlerRegistry::new();
        registry.register(
            HandlerKey::for_mime("application/vnd.x+tar"),
            recording("tar", false, &log),
        );
        registry.register(
            HandlerKey::for_mime("application/vnd.x"),
            recording("base", true, &log),
        );
        registry.register_default(recording("default", true, &log));

        assert_eq!(
            stored_by(&registry, "", "", "application/vnd.x+tar+gzip"),
            "base"
        );
        assert_eq!(*log.lock(), vec!["tar", "base"]);
    }

    #[test]
    fn test_repository_tier() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = BlobHandlerRegistry::new();
        registry.register(
            HandlerKey::for_repository("ocm", "OCIRegistry"),
            recording("repo", true, &log),
        );
        registry.register_default(recording("default", true, &log));
        assert_eq!(stored_by(&registry, "ocm", "OCIRegistry", "text/plain"), "repo");
        assert_eq!(stored_by(&registry, "other", "OCIRegistry", "text/plain"), "default");
    }

    #[test]
    fn test_all_decline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = BlobHandlerRegistry::new();
        registry.register_default(recording("default", false, &log));
        let sink = NullSink;
        let storage = StorageContext {
            context_type: "",
            repository_type: "x",
            sink: &sink,
        };
        let err = registry
            .store_blob(&MemoryBlob::new("x", "text/plain"), None, None, &storage)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_oci_handler_adds_global_access() {
        let registry = BlobHandlerRegistry::standard();
        let sink = ExternalSink;
        let storage = StorageContext {
            context_type: "ocm.context.ocm.software",
            repository_type: "OCIRegistry",
            sink: &sink,
        };
        let spec = registry
            .store_blob(&MemoryBlob::new("hello", "text/plain"), None, None, &storage)
            .unwrap();
        let global = spec.global_access().unwrap();
        assert_eq!(ocm_core::TypedObject::get_type(global), "ociBlob");
        assert_eq!(global.get("size").unwrap(), 5);

        let plain = StorageContext {
            context_type: "ocm.context.ocm.software",
            repository_type: "OCIRegistry",
            sink: &NullSink,
        };
        let spec = registry
            .store_blob(&MemoryBlob::new("hello", "text/plain"), None, None, &plain)
            .unwrap();
        assert!(spec.global_access().is_none());
    }
}
