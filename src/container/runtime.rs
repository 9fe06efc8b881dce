use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::deploy::scope::IsolationScope;
use crate::middleware::Middleware;

/// Where a middleware mapping attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapTarget {
    /// Matched against the request path relative to the contextPath, using
    /// the same exact / `/*` prefix / `*.ext` pattern kinds as the handler
    /// mapper.
    Url(String),
    /// Matched against the resolved handler's name.
    Handler(String),
}

/// A declared middleware-to-target mapping, kept in declaration order.
#[derive(Debug, Clone)]
pub struct MiddlewareMap {
    pub middleware_name: String,
    pub target: MapTarget,
}

/// Everything about an Application that a reload replaces in one swap:
/// the mapping tables the handler mapper consults, the configured
/// middleware instances and their mappings, and the isolation scope.
///
/// Requests pin the `Arc<AppRuntime>` they load at admission, so a swap
/// never disturbs an in-flight request; when the last pin drops, the old
/// middleware set is destroyed.
pub struct AppRuntime {
    /// Declared pattern → handler-name mappings, in declaration order.
    pub mappings: Vec<(String, String)>,
    exact: HashMap<String, String>,
    prefixes: HashMap<String, String>,
    extensions: HashMap<String, String>,
    default_handler: Option<String>,
    /// Configured middleware, in declaration order.
    middleware: Vec<(String, Arc<dyn Middleware>)>,
    maps: Vec<MiddlewareMap>,
    pub scope: Arc<IsolationScope>,
}

impl AppRuntime {
    /// A runtime with no mappings and no middleware; applications start
    /// with one until their descriptor is applied.
    pub fn empty(scope: Arc<IsolationScope>) -> Self {
        AppRuntimeBuilder::new(scope).build()
    }

    pub fn builder(scope: Arc<IsolationScope>) -> AppRuntimeBuilder {
        AppRuntimeBuilder::new(scope)
    }

    /// Exact-mapping lookup (`/a/b`).
    pub fn exact_mapping(&self, path: &str) -> Option<&str> {
        self.exact.get(path).map(String::as_str)
    }

    /// Prefix-mapping lookup for a candidate segment (declared `<seg>/*`).
    pub fn prefix_mapping(&self, segment: &str) -> Option<&str> {
        self.prefixes.get(segment).map(String::as_str)
    }

    /// Extension-mapping lookup (declared `*.<ext>`).
    pub fn extension_mapping(&self, extension: &str) -> Option<&str> {
        self.extensions.get(extension).map(String::as_str)
    }

    /// The catch-all mapping declared for bare `/`.
    pub fn default_mapping(&self) -> Option<&str> {
        self.default_handler.as_deref()
    }

    pub fn middleware_instance(&self, name: &str) -> Option<&Arc<dyn Middleware>> {
        self.middleware
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, mw)| mw)
    }

    pub fn middleware_maps(&self) -> &[MiddlewareMap] {
        &self.maps
    }
}

impl Drop for AppRuntime {
    fn drop(&mut self) {
        // Runs once the last in-flight request releases its pin.
        for (_, mw) in &self.middleware {
            mw.destroy();
        }
    }
}

/// Assembles an [`AppRuntime`], splitting declared mappings into the
/// per-rule lookup tables and sanity-checking middleware references.
pub struct AppRuntimeBuilder {
    mappings: Vec<(String, String)>,
    middleware: Vec<(String, Arc<dyn Middleware>)>,
    maps: Vec<MiddlewareMap>,
    scope: Arc<IsolationScope>,
}

impl AppRuntimeBuilder {
    fn new(scope: Arc<IsolationScope>) -> Self {
        Self {
            mappings: Vec::new(),
            middleware: Vec::new(),
            maps: Vec::new(),
            scope,
        }
    }

    /// Declare a pattern → handler-name mapping.
    pub fn mapping(mut self, pattern: &str, handler_name: &str) -> Self {
        self.mappings
            .push((pattern.to_string(), handler_name.to_string()));
        self
    }

    /// Register a configured middleware instance under a name.
    pub fn middleware(mut self, name: &str, instance: Arc<dyn Middleware>) -> Self {
        self.middleware.push((name.to_string(), instance));
        self
    }

    pub fn url_map(mut self, middleware_name: &str, pattern: &str) -> Self {
        self.maps.push(MiddlewareMap {
            middleware_name: middleware_name.to_string(),
            target: MapTarget::Url(pattern.to_string()),
        });
        self
    }

    pub fn handler_map(mut self, middleware_name: &str, handler_name: &str) -> Self {
        self.maps.push(MiddlewareMap {
            middleware_name: middleware_name.to_string(),
            target: MapTarget::Handler(handler_name.to_string()),
        });
        self
    }

    pub fn build(self) -> AppRuntime {
        let mut exact = HashMap::new();
        let mut prefixes = HashMap::new();
        let mut extensions = HashMap::new();
        let mut default_handler = None;
        for (pattern, handler) in &self.mappings {
            if pattern == "/" {
                default_handler = Some(handler.clone());
            } else if let Some(seg) = pattern.strip_suffix("/*") {
                prefixes.insert(seg.to_string(), handler.clone());
            } else if let Some(ext) = pattern.strip_prefix("*.") {
                extensions.insert(ext.to_string(), handler.clone());
            } else {
                exact.insert(pattern.clone(), handler.clone());
            }
        }
        // A mapping that names an unconfigured middleware is a consistency
        // problem worth surfacing at build time; it is skipped at request
        // time.
        for map in &self.maps {
            if !self.middleware.iter().any(|(n, _)| *n == map.middleware_name) {
                warn!(
                    middleware = %map.middleware_name,
                    "Middleware mapping references an unconfigured middleware"
                );
            }
        }
        AppRuntime {
            mappings: self.mappings,
            exact,
            prefixes,
            extensions,
            default_handler,
            middleware: self.middleware,
            maps: self.maps,
            scope: self.scope,
        }
    }
}
