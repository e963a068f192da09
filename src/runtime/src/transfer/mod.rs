//! Transfer of component versions between repositories.
//!
//! A version is copied with its resources and sources; references are
//! followed as the [`TransferHandler`] decides. Every recursion branch
//! carries its own [`History`], so a reference cycle is reported with the
//! full chain instead of recursing forever.

pub mod handler;

use std::fmt;
use std::sync::Arc;

use ocm_core::error::{OcmError, Result};
use ocm_core::ComponentDescriptor;

use crate::repositories::{ComponentAccess, ComponentVersionAccess, Repository};
use crate::session::Session;

pub use handler::{StandardHandler, TransferHandler, TransferOptions};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey {
    pub name: String,
    pub version: String,
}

impl VersionKey {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn of(cv: &dyn ComponentVersionAccess) -> Self {
        Self::new(cv.name(), cv.version())
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Versions visited on the way to the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History(Vec<VersionKey>);

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &VersionKey) -> bool {
        self.0.contains(key)
    }

    /// A new history extended by `key`; `self` is unchanged.
    pub fn append(&self, key: VersionKey) -> History {
        let mut keys = self.0.clone();
        keys.push(key);
        History(keys)
    }

    pub fn keys(&self) -> &[VersionKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&keys.join("->"))
    }
}

/// Copy `src` from `src_repo` into `target`.
///
/// Handles acquired for referenced versions are released before returning.
pub fn transfer_version(
    src_repo: &Arc<dyn Repository>,
    src: &Arc<dyn ComponentVersionAccess>,
    target: &Arc<dyn Repository>,
    handler: &dyn TransferHandler,
) -> Result<()> {
    let session = Session::new();
    let result = transfer_with_session(&session, &History::new(), src_repo, src, target, handler);
    let closed = session.close();
    result?;
    closed
}

/// Copy `src` into `target` using the handles of `session`.
pub fn transfer_with_session(
    session: &Session,
    history: &History,
    src_repo: &Arc<dyn Repository>,
    src: &Arc<dyn ComponentVersionAccess>,
    target: &Arc<dyn Repository>,
    handler: &dyn TransferHandler,
) -> Result<()> {
    let key = VersionKey::of(src.as_ref());
    if history.contains(&key) {
        let chain = history
            .keys()
            .iter()
            .chain(std::iter::once(&key))
            .map(ToString::to_string)
            .collect();
        return Err(OcmError::Recursion { chain });
    }
    let history = history.append(key);
    tracing::info!(component = %src.name(), version = %src.version(), history = %history, "transferring component version");

    let comp = target.write_component(src.name())?;
    let src_desc = src.get_descriptor()?;

    if !handler.overwrite() && comp.has_version(src.version())? {
        if handler.skip_update() {
            tracing::info!(component = %src.name(), version = %src.version(), "version exists in target, skipping");
            return Ok(());
        }
        tracing::info!(component = %src.name(), version = %src.version(), "version exists in target, following references only");
        return transfer_references(session, &history, src_repo, src, &src_desc, target, handler);
    }

    let target_cv = comp.new_version(src.version(), handler.overwrite())?;
    let mut desc = src_desc.clone();
    desc.add_repository_context(target.get_specification().to_unstructured()?);
    target_cv.set_descriptor(desc)?;

    for (i, res) in src_desc.component.resources.iter().enumerate() {
        handler
            .transfer_resource(src.as_ref(), res, target_cv.as_ref())
            .map_err(|e| e.wrap(format!("{}: transferring resource {} ({})", history, i, res.meta.name)))?;
    }
    for (i, source) in src_desc.component.sources.iter().enumerate() {
        handler
            .transfer_source(src.as_ref(), source, target_cv.as_ref())
            .map_err(|e| e.wrap(format!("{}: transferring source {} ({})", history, i, source.meta.name)))?;
    }

    transfer_references(session, &history, src_repo, src, &src_desc, target, handler)?;

    comp.add_version(target_cv.as_ref(), handler.overwrite())
        .map_err(|e| e.wrap(format!("{}: adding version", history)))?;
    target_cv.close()?;
    tracing::debug!(component = %src.name(), version = %src.version(), "transferred component version");
    Ok(())
}

fn transfer_references(
    session: &Session,
    history: &History,
    src_repo: &Arc<dyn Repository>,
    src: &Arc<dyn ComponentVersionAccess>,
    desc: &ComponentDescriptor,
    target: &Arc<dyn Repository>,
    handler: &dyn TransferHandler,
) -> Result<()> {
    for reference in &desc.component.references {
        let Some((repo, sub_handler)) = handler.transfer_version(src_repo, src.as_ref(), reference)?
        else {
            tracing::debug!(reference = %reference.meta.name, "not following reference");
            continue;
        };
        let cv = session
            .lookup_component_version(&repo, &reference.component_name, &reference.meta.version)
            .map_err(|e| {
                e.wrap(format!(
                    "{}: resolving reference {}",
                    history, reference.meta.name
                ))
            })?;
        transfer_with_session(session, history, &repo, &cv, target, sub_handler.as_ref())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobAccess, MemoryBlob};
    use crate::contexts::ocm::OcmContext;
    use crate::oci::MemoryOciRepository;
    use crate::repositories::OciComponentRepository;
    use ocm_core::compdesc::ResourceRelation;
    use ocm_core::{ComponentReference, ElementMeta, ErrorKind, Identity, Resource};
    use parking_lot::Mutex;

    fn memory_repo(ctx: &Arc<OcmContext>) -> Arc<dyn Repository> {
        Arc::new(OciComponentRepository::new(
            ctx.clone(),
            Arc::new(MemoryOciRepository::new()),
        ))
    }

    fn add(repo: &Arc<dyn Repository>, name: &str, refs: &[(&str, &str)]) {
        let comp = repo.write_component(name).unwrap();
        let cv = comp.new_version("1.0.0", false).unwrap();
        let mut desc = cv.get_descriptor().unwrap();
        desc.component.provider = "acme".to_string();
        cv.set_descriptor(desc).unwrap();
        cv.set_resource_blob(
            Resource::new(ElementMeta::new("data", ""), "blob", ResourceRelation::local()),
            &MemoryBlob::new(format!("data of {}", name), "text/plain"),
            None,
            None,
        )
        .unwrap();
        for (local, component) in refs {
            cv.set_reference(ComponentReference::new(local, component, "1.0.0"))
                .unwrap();
        }
        comp.add_version(cv.as_ref(), false).unwrap();
        cv.close().unwrap();
    }

    fn recursive() -> StandardHandler {
        StandardHandler::new(TransferOptions {
            recursive: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_history_is_immutable() {
        let base = History::new().append(VersionKey::new("a", "1"));
        let left = base.append(VersionKey::new("b", "1"));
        let right = base.append(VersionKey::new("c", "1"));
        assert_eq!(base.len(), 1);
        assert!(left.contains(&VersionKey::new("b", "1")));
        assert!(!right.contains(&VersionKey::new("b", "1")));
        assert_eq!(left.to_string(), "a:1->b:1");
    }

    #[test]
    fn test_transfer_copies_local_blobs() {
        let ctx = OcmContext::builder().build();
        let src = memory_repo(&ctx);
        let target = memory_repo(&ctx);
        add(&src, "acme.org/app", &[]);

        let cv = src.lookup_component_version("acme.org/app", "1.0.0").unwrap();
        transfer_version(&src, &cv, &target, &StandardHandler::default()).unwrap();

        let copied = target.lookup_component_version("acme.org/app", "1.0.0").unwrap();
        let desc = copied.get_descriptor().unwrap();
        assert_eq!(
            desc.component.repository_contexts.last(),
            Some(&target.get_specification().to_unstructured().unwrap())
        );
        let method = copied.resource_access_method(&Identity::new("data")).unwrap();
        assert_eq!(method.get().unwrap(), b"data of acme.org/app");
    }

    #[test]
    fn test_copied_blob_gets_target_global_access() {
        let ctx = OcmContext::builder().build();
        let host_repo = |host: &str| -> Arc<dyn Repository> {
            Arc::new(OciComponentRepository::new(
                ctx.clone(),
                Arc::new(MemoryOciRepository::with_host(host)),
            ))
        };
        let src = host_repo("src.acme.org");
        let target = host_repo("tgt.acme.org");
        add(&src, "acme.org/app", &[]);

        let cv = src.lookup_component_version("acme.org/app", "1.0.0").unwrap();
        let res = cv.get_resource(&Identity::new("data")).unwrap();
        let global = res.access.unwrap().get("globalAccess").cloned().unwrap();
        assert_eq!(global["ref"], "src.acme.org/component-descriptors/acme.org/app");

        transfer_version(&src, &cv, &target, &StandardHandler::default()).unwrap();

        let copied = target.lookup_component_version("acme.org/app", "1.0.0").unwrap();
        let res = copied.get_resource(&Identity::new("data")).unwrap();
        let global = res.access.unwrap().get("globalAccess").cloned().unwrap();
        assert_eq!(global["type"], "ociBlob");
        assert_eq!(global["ref"], "tgt.acme.org/component-descriptors/acme.org/app");
    }

    #[test]
    fn test_references_followed_when_recursive() {
        let ctx = OcmContext::builder().build();
        let src = memory_repo(&ctx);
        add(&src, "acme.org/lib", &[]);
        add(&src, "acme.org/app", &[("lib", "acme.org/lib")]);
        let cv = src.lookup_component_version("acme.org/app", "1.0.0").unwrap();

        let flat = memory_repo(&ctx);
        transfer_version(&src, &cv, &flat, &StandardHandler::default()).unwrap();
        assert!(!flat.exists_component_version("acme.org/lib", "1.0.0").unwrap());

        let deep = memory_repo(&ctx);
        transfer_version(&src, &cv, &deep, &recursive()).unwrap();
        assert!(deep.exists_component_version("acme.org/lib", "1.0.0").unwrap());
        assert!(deep.exists_component_version("acme.org/app", "1.0.0").unwrap());
    }

    #[test]
    fn test_cycle_is_reported() {
        let ctx = OcmContext::builder().build();
        let src = memory_repo(&ctx);
        add(&src, "acme.org/a", &[("b", "acme.org/b")]);
        add(&src, "acme.org/b", &[("a", "acme.org/a")]);
        let target = memory_repo(&ctx);

        let cv = src.lookup_component_version("acme.org/a", "1.0.0").unwrap();
        let err = transfer_version(&src, &cv, &target, &recursive()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Recursion);
        match err.root() {
            OcmError::Recursion { chain } => assert_eq!(
                chain,
                &vec![
                    "acme.org/a:1.0.0".to_string(),
                    "acme.org/b:1.0.0".to_string(),
                    "acme.org/a:1.0.0".to_string()
                ]
            ),
            other => panic!("unexpected error {}", other),
        }
        assert!(!target.exists_component_version("acme.org/a", "1.0.0").unwrap());
    }

    #[test]
    fn test_existing_version() {
        let ctx = OcmContext::builder().build();
        let src = memory_repo(&ctx);
        let target = memory_repo(&ctx);
        add(&src, "acme.org/app", &[]);
        let cv = src.lookup_component_version("acme.org/app", "1.0.0").unwrap();
        transfer_version(&src, &cv, &target, &StandardHandler::default()).unwrap();

        // a second run is a no-op
        transfer_version(&src, &cv, &target, &StandardHandler::default()).unwrap();

        let overwrite = StandardHandler::new(TransferOptions {
            overwrite: true,
            ..Default::default()
        });
        transfer_version(&src, &cv, &target, &overwrite).unwrap();
        assert!(target.exists_component_version("acme.org/app", "1.0.0").unwrap());
    }

    struct FailingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl TransferHandler for FailingHandler {
        fn transfer_version(
            &self,
            _repo: &Arc<dyn Repository>,
            _src: &dyn ComponentVersionAccess,
            _reference: &ComponentReference,
        ) -> Result<Option<(Arc<dyn Repository>, Arc<dyn TransferHandler>)>> {
            Ok(None)
        }

        fn transfer_resource(
            &self,
            _src: &dyn ComponentVersionAccess,
            res: &Resource,
            _target: &dyn ComponentVersionAccess,
        ) -> Result<()> {
            self.calls.lock().push(res.meta.name.clone());
            Err(OcmError::not_supported("resource copy"))
        }

        fn transfer_source(
            &self,
            _src: &dyn ComponentVersionAccess,
            _source: &ocm_core::Source,
            _target: &dyn ComponentVersionAccess,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resource_failure_aborts() {
        let ctx = OcmContext::builder().build();
        let src = memory_repo(&ctx);
        let target = memory_repo(&ctx);
        add(&src, "acme.org/app", &[]);
        let cv = src.lookup_component_version("acme.org/app", "1.0.0").unwrap();

        let handler = FailingHandler {
            calls: Mutex::new(Vec::new()),
        };
        let err = transfer_version(&src, &cv, &target, &handler).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(err.to_string().contains("acme.org/app:1.0.0"));
        assert_eq!(*handler.calls.lock(), vec!["data"]);
        assert!(!target.exists_component_version("acme.org/app", "1.0.0").unwrap());
    }
}
