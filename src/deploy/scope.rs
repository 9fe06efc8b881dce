use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tracing::debug;

use crate::handler::{EchoHandler, HttpHandler, StaticHandler};
use crate::middleware::{AccessLogMiddleware, Middleware};
use crate::container::LifecycleListener;

/// Constructor for a handler implementation, keyed by its declared
/// implementation reference.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn HttpHandler> + Send + Sync>;

/// Constructor for a middleware implementation.
pub type MiddlewareFactory = Arc<dyn Fn() -> Box<dyn Middleware> + Send + Sync>;

/// Constructor for an application lifecycle listener.
pub type ListenerFactory = Arc<dyn Fn() -> Arc<dyn LifecycleListener> + Send + Sync>;

/// Platform-wide name resolution: the implementations every application can
/// see. Owned by whoever builds the tree (the binary, or a test), never
/// process-global, so independent hosts and test instances do not interfere.
pub struct SharedScope {
    handlers: RwLock<HashMap<String, HandlerFactory>>,
    middleware: RwLock<HashMap<String, MiddlewareFactory>>,
    listeners: RwLock<HashMap<String, ListenerFactory>>,
}

impl Default for SharedScope {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedScope {
    /// A shared scope pre-populated with the built-in implementations.
    pub fn new() -> Self {
        let scope = Self {
            handlers: RwLock::new(HashMap::new()),
            middleware: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
        };
        scope.register_handler("arbor.EchoHandler", Arc::new(|| Box::new(EchoHandler)));
        scope.register_handler(
            "arbor.StaticHandler",
            Arc::new(|| Box::new(StaticHandler::new())),
        );
        scope.register_middleware(
            "arbor.AccessLogMiddleware",
            Arc::new(|| Box::new(AccessLogMiddleware)),
        );
        scope
    }

    pub fn register_handler(&self, name: &str, factory: HandlerFactory) {
        self.handlers
            .write()
            .unwrap()
            .insert(name.to_string(), factory);
    }

    pub fn register_middleware(&self, name: &str, factory: MiddlewareFactory) {
        self.middleware
            .write()
            .unwrap()
            .insert(name.to_string(), factory);
    }

    pub fn register_listener(&self, name: &str, factory: ListenerFactory) {
        self.listeners
            .write()
            .unwrap()
            .insert(name.to_string(), factory);
    }

    fn handler(&self, name: &str) -> Option<HandlerFactory> {
        self.handlers.read().unwrap().get(name).map(Arc::clone)
    }

    fn middleware(&self, name: &str) -> Option<MiddlewareFactory> {
        self.middleware.read().unwrap().get(name).map(Arc::clone)
    }

    fn listener(&self, name: &str) -> Option<ListenerFactory> {
        self.listeners.read().unwrap().get(name).map(Arc::clone)
    }
}

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Arc<IsolationScope>>> = RefCell::new(None);
}

/// Restores the previously-entered scope when dropped.
pub struct ScopeGuard {
    previous: Option<Arc<IsolationScope>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT_SCOPE.with(|s| *s.borrow_mut() = self.previous.take());
    }
}

/// An application-private code-resolution boundary.
///
/// Name lookups first delegate to the shared platform scope (interfaces and
/// common infrastructure), then fall back to the application's own private
/// registrations — so two applications with colliding implementation names
/// get independent, non-interfering definitions.
///
/// The scope snapshots the modification times of the application's class
/// root and library archives when it is built; [`IsolationScope::modified`]
/// reports whether any underlying repository changed since, which decides
/// whether a reload must rebuild the scope rather than just the routing
/// tables.
pub struct IsolationScope {
    shared: Arc<SharedScope>,
    private_handlers: RwLock<HashMap<String, HandlerFactory>>,
    private_middleware: RwLock<HashMap<String, MiddlewareFactory>>,
    class_root: PathBuf,
    lib_dir: PathBuf,
    snapshot: Vec<(PathBuf, SystemTime)>,
}

/// Directory inside a deployed application that holds its descriptor,
/// class root, and library archives.
pub const DESCRIPTOR_DIR: &str = "APP-INF";
/// Class root under the descriptor directory.
pub const CLASS_ROOT: &str = "classes";
/// Library directory under the descriptor directory.
pub const LIB_DIR: &str = "lib";

impl IsolationScope {
    /// Build a scope for the application rooted at `base_path`, snapshotting
    /// the current state of its repositories.
    pub fn new(shared: Arc<SharedScope>, base_path: &Path) -> Self {
        let class_root = base_path.join(DESCRIPTOR_DIR).join(CLASS_ROOT);
        let lib_dir = base_path.join(DESCRIPTOR_DIR).join(LIB_DIR);
        let snapshot = repository_snapshot(&class_root, &lib_dir);
        Self {
            shared,
            private_handlers: RwLock::new(HashMap::new()),
            private_middleware: RwLock::new(HashMap::new()),
            class_root,
            lib_dir,
            snapshot,
        }
    }

    /// Register an application-private handler implementation. Shadowed by
    /// a shared registration of the same name, per the delegation order.
    pub fn register_handler(&self, name: &str, factory: HandlerFactory) {
        self.private_handlers
            .write()
            .unwrap()
            .insert(name.to_string(), factory);
    }

    pub fn register_middleware(&self, name: &str, factory: MiddlewareFactory) {
        self.private_middleware
            .write()
            .unwrap()
            .insert(name.to_string(), factory);
    }

    /// Resolve a handler implementation: shared scope first, then private.
    pub fn resolve_handler(&self, name: &str) -> Option<HandlerFactory> {
        self.shared.handler(name).or_else(|| {
            self.private_handlers.read().unwrap().get(name).map(Arc::clone)
        })
    }

    pub fn resolve_middleware(&self, name: &str) -> Option<MiddlewareFactory> {
        self.shared.middleware(name).or_else(|| {
            self.private_middleware
                .read()
                .unwrap()
                .get(name)
                .map(Arc::clone)
        })
    }

    pub fn resolve_listener(&self, name: &str) -> Option<ListenerFactory> {
        self.shared.listener(name)
    }

    /// Locate a file resource inside the application's private
    /// repositories: the class root first, then the library directory.
    pub fn resolve_resource(&self, relative: &str) -> Option<PathBuf> {
        let relative = relative.trim_start_matches('/');
        for base in [&self.class_root, &self.lib_dir] {
            let candidate = base.join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// True if any underlying repository changed since this scope was built.
    pub fn modified(&self) -> bool {
        let current = repository_snapshot(&self.class_root, &self.lib_dir);
        if current != self.snapshot {
            debug!(
                class_root = %self.class_root.display(),
                "Isolation scope repositories modified"
            );
            return true;
        }
        false
    }

    /// Make this the calling worker's current scope until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ScopeGuard {
        let previous =
            CURRENT_SCOPE.with(|s| s.borrow_mut().replace(Arc::clone(self)));
        ScopeGuard { previous }
    }

    /// The scope most recently entered on this worker, if any.
    pub fn current() -> Option<Arc<IsolationScope>> {
        CURRENT_SCOPE.with(|s| s.borrow().clone())
    }
}

/// Mtimes of the class root, the library directory, and every direct entry
/// of each. Missing directories contribute nothing, so a scope over a bare
/// application is never spuriously "modified".
fn repository_snapshot(class_root: &Path, lib_dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut snapshot = Vec::new();
    for dir in [class_root, lib_dir] {
        if let Ok(meta) = fs::metadata(dir) {
            if let Ok(mtime) = meta.modified() {
                snapshot.push((dir.to_path_buf(), mtime));
            }
        }
        if let Ok(entries) = fs::read_dir(dir) {
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .collect();
            paths.sort();
            for path in paths {
                if let Ok(meta) = fs::metadata(&path) {
                    if let Ok(mtime) = meta.modified() {
                        snapshot.push((path, mtime));
                    }
                }
            }
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Request, Response};

    struct MarkerHandler(&'static str);

    impl HttpHandler for MarkerHandler {
        fn invoke(&self, _request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
            response.send_json(200, serde_json::json!({ "marker": self.0 }));
            Ok(())
        }
    }

    fn scope_over(dir: &Path) -> (Arc<SharedScope>, IsolationScope) {
        let shared = Arc::new(SharedScope::new());
        let scope = IsolationScope::new(Arc::clone(&shared), dir);
        (shared, scope)
    }

    #[test]
    fn test_shared_scope_wins_over_private() {
        let dir = tempfile::tempdir().unwrap();
        let (shared, scope) = scope_over(dir.path());
        shared.register_handler("acme.Handler", Arc::new(|| Box::new(MarkerHandler("shared"))));
        scope.register_handler("acme.Handler", Arc::new(|| Box::new(MarkerHandler("private"))));

        let factory = scope.resolve_handler("acme.Handler").unwrap();
        let mut req = Request::new(http::Method::GET, "/", crate::server::Protocol::Http11);
        let mut res = Response::new();
        factory().invoke(&mut req, &mut res).unwrap();
        assert!(String::from_utf8_lossy(res.body()).contains("shared"));
    }

    #[test]
    fn test_private_registrations_do_not_interfere() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let shared = Arc::new(SharedScope::new());
        let scope_a = IsolationScope::new(Arc::clone(&shared), dir_a.path());
        let scope_b = IsolationScope::new(Arc::clone(&shared), dir_b.path());

        scope_a.register_handler("acme.Handler", Arc::new(|| Box::new(MarkerHandler("a"))));
        assert!(scope_a.resolve_handler("acme.Handler").is_some());
        // the colliding name is invisible from the other application
        assert!(scope_b.resolve_handler("acme.Handler").is_none());
    }

    #[test]
    fn test_resource_resolution_prefers_class_root() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join(DESCRIPTOR_DIR).join(CLASS_ROOT);
        let lib = dir.path().join(DESCRIPTOR_DIR).join(LIB_DIR);
        fs::create_dir_all(&classes).unwrap();
        fs::create_dir_all(&lib).unwrap();
        fs::write(classes.join("shared.txt"), "classes").unwrap();
        fs::write(lib.join("shared.txt"), "lib").unwrap();
        fs::write(lib.join("only-lib.txt"), "lib").unwrap();

        let (_, scope) = scope_over(dir.path());
        assert_eq!(
            scope.resolve_resource("shared.txt").unwrap(),
            classes.join("shared.txt")
        );
        assert_eq!(
            scope.resolve_resource("only-lib.txt").unwrap(),
            lib.join("only-lib.txt")
        );
        assert!(scope.resolve_resource("missing.txt").is_none());
    }

    #[test]
    fn test_modified_tracks_repository_changes() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join(DESCRIPTOR_DIR).join(CLASS_ROOT);
        fs::create_dir_all(&classes).unwrap();
        fs::write(classes.join("impl.bin"), "v1").unwrap();

        let (_, scope) = scope_over(dir.path());
        assert!(!scope.modified());

        // a new entry in the class root marks the scope modified
        fs::write(classes.join("extra.bin"), "v1").unwrap();
        assert!(scope.modified());
    }

    #[test]
    fn test_enter_restores_previous_scope_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(SharedScope::new());
        let outer = Arc::new(IsolationScope::new(Arc::clone(&shared), dir.path()));
        let inner = Arc::new(IsolationScope::new(Arc::clone(&shared), dir.path()));

        let _outer_guard = outer.enter();
        {
            let _inner_guard = inner.enter();
            assert!(Arc::ptr_eq(&IsolationScope::current().unwrap(), &inner));
        }
        assert!(Arc::ptr_eq(&IsolationScope::current().unwrap(), &outer));
    }
}
