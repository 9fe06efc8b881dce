//! Shared fixtures for the integration suites: recording handlers and
//! middleware, lifecycle event recorders, and request/tree construction
//! helpers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use serde_json::json;

use arbor::container::{
    AppRuntime, Container, LifecycleEvent, LifecycleListener,
};
use arbor::deploy::{IsolationScope, SharedScope};
use arbor::handler::{HttpHandler, UnavailableError};
use arbor::middleware::{FilterChain, Middleware};
use arbor::server::{Protocol, Request, Response};

/// Ordered record of what handlers/middleware/listeners observed.
pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn trace_entries(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

pub fn request(method: Method, uri: &str, vhost: Option<&str>) -> Request {
    let mut req = Request::new(method, uri, Protocol::Http11);
    req.vhost = vhost.map(str::to_string);
    req
}

pub fn scope(shared: &Arc<SharedScope>) -> Arc<IsolationScope> {
    Arc::new(IsolationScope::new(
        Arc::clone(shared),
        std::env::temp_dir().as_path(),
    ))
}

/// Handler that records its invocations and answers 200.
pub struct RecordingHandler {
    pub trace: Trace,
}

impl HttpHandler for RecordingHandler {
    fn invoke(&self, request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        let name = request
            .handler
            .as_ref()
            .map(|h| h.name().to_string())
            .unwrap_or_default();
        self.trace.lock().unwrap().push(format!("invoke:{name}"));
        response.send_json(200, json!({ "handler": name }));
        Ok(())
    }

    fn destroy(&self) {
        self.trace.lock().unwrap().push("destroy".to_string());
    }
}

/// Handler that always fails with a plain error.
pub struct FailingHandler;

impl HttpHandler for FailingHandler {
    fn invoke(&self, _request: &mut Request, _response: &mut Response) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("backend exploded"))
    }
}

/// Handler that signals temporary unavailability.
pub struct OverloadedHandler {
    pub retry_after: Duration,
}

impl HttpHandler for OverloadedHandler {
    fn invoke(&self, _request: &mut Request, _response: &mut Response) -> anyhow::Result<()> {
        Err(UnavailableError::temporary(self.retry_after).into())
    }
}

/// Middleware that records before/after around delegation.
pub struct TaggingMiddleware {
    pub tag: String,
    pub trace: Trace,
}

impl Middleware for TaggingMiddleware {
    fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        chain: &mut FilterChain,
    ) -> anyhow::Result<()> {
        self.trace.lock().unwrap().push(format!("{}:before", self.tag));
        let result = chain.next(request, response);
        self.trace.lock().unwrap().push(format!("{}:after", self.tag));
        result
    }

    fn destroy(&self) {
        self.trace.lock().unwrap().push(format!("{}:destroy", self.tag));
    }
}

/// Middleware that refuses to delegate.
pub struct BlockingMiddleware {
    pub trace: Trace,
}

impl Middleware for BlockingMiddleware {
    fn invoke(
        &self,
        _request: &mut Request,
        response: &mut Response,
        _chain: &mut FilterChain,
    ) -> anyhow::Result<()> {
        self.trace.lock().unwrap().push("blocked".to_string());
        response.send_error(403, "refused by middleware");
        Ok(())
    }
}

/// Lifecycle listener that records `container:event` lines.
pub struct EventRecorder {
    pub trace: Trace,
}

impl LifecycleListener for EventRecorder {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        self.trace
            .lock()
            .unwrap()
            .push(format!("{}:{}", event.container.name(), event.kind));
        Ok(())
    }
}

/// Lifecycle listener that records `tag:event` lines, for asserting
/// registration order.
pub struct TaggingListener {
    pub tag: String,
    pub trace: Trace,
}

impl LifecycleListener for TaggingListener {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        self.trace
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.tag, event.kind));
        Ok(())
    }
}

/// Lifecycle listener that always fails.
pub struct BrokenListener;

impl LifecycleListener for BrokenListener {
    fn on_event(&self, _event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("listener failure"))
    }
}

/// Build a router → host → application tree where the application carries
/// the given pattern → handler mappings and one handler container per
/// distinct handler name, each backed by a [`RecordingHandler`].
pub struct TestTree {
    pub router: Arc<Container>,
    pub host: Arc<Container>,
    pub app: Arc<Container>,
    pub trace: Trace,
}

pub fn recording_tree(context_path: &str, mappings: &[(&str, &str)]) -> TestTree {
    let shared = Arc::new(SharedScope::new());
    let trace = trace();
    let handler_trace = Arc::clone(&trace);
    shared.register_handler(
        "test.RecordingHandler",
        Arc::new(move || {
            Box::new(RecordingHandler {
                trace: Arc::clone(&handler_trace),
            })
        }),
    );

    let router = Container::new_router("edge", "main");
    let host = Container::new_host("main", std::env::temp_dir());
    router.add_child(Arc::clone(&host)).unwrap();

    let app_scope = scope(&shared);
    let app = Container::new_application(
        "app",
        std::env::temp_dir(),
        context_path,
        true,
        Arc::clone(&app_scope),
    );
    let mut builder = AppRuntime::builder(app_scope);
    let mut names: Vec<&str> = Vec::new();
    for (pattern, handler) in mappings {
        builder = builder.mapping(pattern, handler);
        if !names.contains(handler) {
            names.push(handler);
        }
    }
    app.app_state().unwrap().swap_runtime(builder.build());
    for name in names {
        app.add_child(Container::new_handler(
            name,
            "test.RecordingHandler",
            Default::default(),
        ))
        .unwrap();
    }
    host.install_app(Arc::clone(&app)).unwrap();
    router.start().unwrap();

    TestTree {
        router,
        host,
        app,
        trace,
    }
}

/// Run one request through the tree's router-level checkpoint.
pub fn dispatch(tree: &TestTree, req: &mut Request) -> Response {
    let mut res = Response::new();
    tree.router
        .pipeline()
        .invoke(&tree.router, req, &mut res)
        .unwrap();
    res
}
