//! Sessions: handle caching and deferred close.
//!
//! A session hands out one shared handle per `(container, name)` and
//! closes everything it handed out, in reverse order, when it is closed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ocm_core::error::{MultiError, OcmError, Result};
use parking_lot::Mutex;

use crate::contexts::ocm::OcmContext;
use crate::repositories::{ComponentAccess, ComponentVersionAccess, Repository, RepositorySpec};

type Closer = Box<dyn FnOnce() -> Result<()> + Send>;

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    container: usize,
    value_type: TypeId,
    name: String,
}

struct CacheEntry {
    /// Keeps the container alive so its address is not reused
    _container: Box<dyn Any + Send + Sync>,
    value: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    closers: Mutex<Vec<(String, Closer)>>,
}

pub struct Session {
    shared: Arc<Shared>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.is_closed())
            .field("cached", &self.cache.lock().len())
            .field("closers", &self.shared.closers.lock().len())
            .finish()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A session with its own cache closing together with this one.
    pub fn sub_session(&self) -> Session {
        Session {
            shared: self.shared.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(OcmError::closed("session", ""));
        }
        Ok(())
    }

    /// Register a function run on close.
    pub fn add_closer<F>(&self, name: &str, closer: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.check_open()?;
        self.shared
            .closers
            .lock()
            .push((name.to_string(), Box::new(closer)));
        Ok(())
    }

    /// Cached handle named `name` in `container`.
    ///
    /// On a miss `lookup` is called and its result cached; `close` is
    /// registered to release it when the session closes.
    pub fn lookup<C, T, L, F>(&self, container: &Arc<C>, name: &str, lookup: L, close: F) -> Result<T>
    where
        C: ?Sized + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
        L: FnOnce(&C, &str) -> Result<T>,
        F: FnOnce(&T) -> Result<()> + Send + 'static,
    {
        self.check_open()?;
        let key = CacheKey {
            container: Arc::as_ptr(container) as *const () as usize,
            value_type: TypeId::of::<T>(),
            name: name.to_string(),
        };
        let mut cache = self.cache.lock();
        if let Some(value) = cache.get(&key).and_then(|e| e.value.downcast_ref::<T>()) {
            return Ok(value.clone());
        }

        let value = lookup(container, name)?;
        let held = value.clone();
        self.add_closer(name, move || close(&held))?;
        cache.insert(
            key,
            CacheEntry {
                _container: Box::new(container.clone()),
                value: Box::new(value.clone()),
            },
        );
        tracing::trace!(name = %name, "session cached handle");
        Ok(value)
    }

    pub fn lookup_repository(
        &self,
        ctx: &Arc<OcmContext>,
        spec: &RepositorySpec,
    ) -> Result<Arc<dyn Repository>> {
        let name = serde_json::to_string(&spec.to_unstructured()?.to_value())?;
        let spec = spec.clone();
        self.lookup(
            ctx,
            &name,
            move |_, _| ctx.repository_for_spec(&spec),
            |repo: &Arc<dyn Repository>| repo.close(),
        )
    }

    pub fn lookup_component(
        &self,
        repo: &Arc<dyn Repository>,
        name: &str,
    ) -> Result<Arc<dyn ComponentAccess>> {
        self.lookup(
            repo,
            name,
            |r, n| r.lookup_component(n),
            |c: &Arc<dyn ComponentAccess>| c.close(),
        )
    }

    pub fn lookup_component_version(
        &self,
        repo: &Arc<dyn Repository>,
        name: &str,
        version: &str,
    ) -> Result<Arc<dyn ComponentVersionAccess>> {
        let key = format!("{}:{}", name, version);
        self.lookup(
            repo,
            &key,
            |r, _| r.lookup_component_version(name, version),
            |cv: &Arc<dyn ComponentVersionAccess>| cv.close(),
        )
    }

    /// Version of a component obtained from this or another session.
    pub fn get_component_version(
        &self,
        comp: &Arc<dyn ComponentAccess>,
        version: &str,
    ) -> Result<Arc<dyn ComponentVersionAccess>> {
        self.lookup(
            comp,
            version,
            |c, v| c.lookup_version(v),
            |cv: &Arc<dyn ComponentVersionAccess>| cv.close(),
        )
    }

    /// Run all closers, newest first, and drop the cache.
    ///
    /// Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let closers = std::mem::take(&mut *self.shared.closers.lock());
        self.cache.lock().clear();

        let mut errs = MultiError::new();
        for (name, closer) in closers.into_iter().rev() {
            errs.add(closer().map_err(|e| e.wrap(format!("closing {}", name))));
        }
        tracing::debug!(failures = errs.len(), "session closed");
        errs.into_result()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // sub sessions share the closers; only an unreferenced core closes them
        if Arc::strong_count(&self.shared) == 1 {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "closing session on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::MemoryOciRepository;
    use crate::repositories::OciComponentRepository;
    use ocm_core::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Container {
        lookups: AtomicUsize,
    }

    impl Container {
        fn lookup(&self, name: &str) -> Result<Arc<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(name.to_string()))
        }
    }

    #[test]
    fn test_lookup_is_cached() {
        let session = Session::new();
        let container = Arc::new(Container::default());
        let closed = Arc::new(AtomicUsize::new(0));

        let lookup = |name: &str| {
            let closed = closed.clone();
            session.lookup(
                &container,
                name,
                |c, n| c.lookup(n),
                move |_: &Arc<String>| {
                    closed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
        };
        let a = lookup("x").unwrap();
        let b = lookup("x").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        lookup("y").unwrap();
        assert_eq!(container.lookups.load(Ordering::SeqCst), 2);

        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_order_and_errors() {
        let session = Session::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            session
                .add_closer(&format!("c{}", i), move || {
                    order.lock().push(i);
                    if i == 1 {
                        return Err(OcmError::not_supported("closing c1"));
                    }
                    Ok(())
                })
                .unwrap();
        }
        let err = session.close().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_closed_session_rejects_lookups() {
        let session = Session::new();
        session.close().unwrap();
        let container = Arc::new(Container::default());
        let err = session
            .lookup(&container, "x", |c, n| c.lookup(n), |_: &Arc<String>| Ok(()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(session.add_closer("late", || Ok(())).is_err());
    }

    #[test]
    fn test_sub_session() {
        let session = Session::new();
        let sub = session.sub_session();
        let container = Arc::new(Container::default());
        let a = session
            .lookup(&container, "x", |c, n| c.lookup(n), |_: &Arc<String>| Ok(()))
            .unwrap();
        let b = sub
            .lookup(&container, "x", |c, n| c.lookup(n), |_: &Arc<String>| Ok(()))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        sub.close().unwrap();
        assert!(session.is_closed());
    }

    #[test]
    fn test_lookup_repository() {
        let ctx = OcmContext::builder().build();
        let store = MemoryOciRepository::with_host("registry.acme.org");
        ctx.oci().register_repository("registry.acme.org", Arc::new(store.clone()));
        let repo: Arc<dyn Repository> =
            Arc::new(OciComponentRepository::new(ctx.clone(), Arc::new(store)));
        let spec = repo.get_specification();

        let session = Session::new();
        let a = session.lookup_repository(&ctx, &spec).unwrap();
        let b = session.lookup_repository(&ctx, &spec).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(session
            .lookup_component(&repo, "acme.org/none")
            .err()
            .unwrap()
            .is_not_found());
        session.close().unwrap();
    }
}
