//! End-to-end checkpoint pipeline tests: the full
//! Router → Host → Application → Handler dispatch and its rejection
//! taxonomy (400/403/404/500/503).

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::Method;

use arbor::container::{AppRuntime, Container};
use arbor::deploy::SharedScope;
use arbor::server::{Protocol, Request, Response};
use common::{
    dispatch, recording_tree, request, scope, trace_entries, FailingHandler, OverloadedHandler,
};

#[test]
fn test_full_dispatch_reaches_handler() {
    let tree = recording_tree("", &[("/", "default")]);
    let mut req = request(Method::GET, "/hello", Some("main"));
    let res = dispatch(&tree, &mut req);

    assert_eq!(res.status(), 200);
    assert_eq!(trace_entries(&tree.trace), vec!["invoke:default"]);
    // the application-level checkpoint attached the application
    assert!(Arc::ptr_eq(res.application().unwrap(), &tree.app));
    assert_eq!(req.context_path, "");
    assert_eq!(req.handler_path, "/hello");
}

#[test]
fn test_http11_without_host_is_bad_request() {
    let tree = recording_tree("", &[("/", "default")]);
    let mut req = request(Method::GET, "/hello", None);
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 400);
    assert!(trace_entries(&tree.trace).is_empty());
}

#[test]
fn test_http10_without_host_uses_default_host() {
    let tree = recording_tree("", &[("/", "default")]);
    let mut req = Request::new(Method::GET, "/hello", Protocol::Http10);
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 200);
    // the substitution was written back
    assert_eq!(req.vhost.as_deref(), Some("main"));
}

#[test]
fn test_unknown_vhost_is_not_found() {
    let tree = recording_tree("", &[("/", "default")]);
    let mut req = request(Method::GET, "/hello", Some("nowhere"));
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 404);
}

#[test]
fn test_unmatched_application_is_not_found() {
    // application mounted at /shop only
    let tree = recording_tree("/shop", &[("/", "default")]);
    let mut req = request(Method::GET, "/elsewhere", Some("main"));
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 404);
}

#[test]
fn test_unmatched_handler_is_not_found() {
    // no default mapping: only /api/* is routable
    let tree = recording_tree("", &[("/api/*", "api")]);
    let mut req = request(Method::GET, "/other", Some("main"));
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 404);
}

#[test]
fn test_reserved_paths_are_forbidden() {
    let tree = recording_tree("", &[("/", "default")]);
    for path in ["/APP-INF/app.yaml", "/app-inf", "/.hidden/secret"] {
        let mut req = request(Method::GET, path, Some("main"));
        let res = dispatch(&tree, &mut req);
        assert_eq!(res.status(), 403, "path {path} must be forbidden");
    }
    assert!(trace_entries(&tree.trace).is_empty());
}

#[test]
fn test_undecodable_target_is_bad_request() {
    let tree = recording_tree("", &[("/", "default")]);
    // %FF%FE decodes to bytes that are not valid UTF-8
    let mut req = request(Method::GET, "/bad%FF%FE", Some("main"));
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 400);
}

#[test]
fn test_handler_error_is_internal_error_with_diagnostic() {
    let shared = Arc::new(SharedScope::new());
    shared.register_handler("test.FailingHandler", Arc::new(|| Box::new(FailingHandler)));

    let router = Container::new_router("edge", "main");
    let host = Container::new_host("main", std::env::temp_dir());
    router.add_child(Arc::clone(&host)).unwrap();
    let app_scope = scope(&shared);
    let app = Container::new_application("app", std::env::temp_dir(), "", true, Arc::clone(&app_scope));
    app.app_state()
        .unwrap()
        .swap_runtime(AppRuntime::builder(app_scope).mapping("/", "boom").build());
    app.add_child(Container::new_handler("boom", "test.FailingHandler", Default::default()))
        .unwrap();
    host.install_app(Arc::clone(&app)).unwrap();
    router.start().unwrap();

    let mut req = request(Method::GET, "/x", Some("main"));
    let mut res = Response::new();
    router.pipeline().invoke(&router, &mut req, &mut res).unwrap();

    assert_eq!(res.status(), 500);
    // the failure was attached to the request as diagnostic context
    assert!(req.diagnostic.is_some());
    assert!(req.diagnostic.unwrap().to_string().contains("backend exploded"));
    // the in-flight counter was released on the error path
    let handler = app.find_child("boom").unwrap();
    assert_eq!(handler.inflight(), 0);
}

#[test]
fn test_temporarily_unavailable_handler_gets_retry_hint() {
    let tree = recording_tree("", &[("/", "default")]);
    let handler = tree.app.find_child("default").unwrap();
    handler.mark_unavailable(Some(Duration::from_secs(30)));

    let mut req = request(Method::GET, "/x", Some("main"));
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 503);
    let retry: u64 = res.get_header("retry-after").unwrap().parse().unwrap();
    assert!(retry >= 1 && retry <= 30);
    assert!(trace_entries(&tree.trace).is_empty());
}

#[test]
fn test_expired_unavailability_clears() {
    let tree = recording_tree("", &[("/", "default")]);
    let handler = tree.app.find_child("default").unwrap();
    handler.mark_unavailable(Some(Duration::from_millis(10)));
    std::thread::sleep(Duration::from_millis(30));

    let mut req = request(Method::GET, "/x", Some("main"));
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 200);
}

#[test]
fn test_permanently_unavailable_handler_unloads_when_idle() {
    let tree = recording_tree("", &[("/", "default")]);
    let handler = tree.app.find_child("default").unwrap();

    // load the instance with one successful request
    let mut req = request(Method::GET, "/x", Some("main"));
    assert_eq!(dispatch(&tree, &mut req).status(), 200);
    assert!(handler.is_loaded());

    // simulate an in-flight request holding a lease across the marking
    let runtime = tree.app.app_state().unwrap().runtime();
    let lease = handler.allocate(&runtime.scope, None).unwrap();
    handler.mark_unavailable(None);
    assert!(handler.is_loaded(), "unload must wait for in-flight work");

    drop(lease);
    assert!(!handler.is_loaded(), "idle handler must unload");
    assert!(trace_entries(&tree.trace).contains(&"destroy".to_string()));

    // later requests see 503
    let mut req = request(Method::GET, "/y", Some("main"));
    assert_eq!(dispatch(&tree, &mut req).status(), 503);
}

#[test]
fn test_unavailable_application_is_service_unavailable() {
    let tree = recording_tree("", &[("/", "default")]);
    tree.app.app_state().unwrap().set_available(false);
    let mut req = request(Method::GET, "/x", Some("main"));
    assert_eq!(dispatch(&tree, &mut req).status(), 503);

    tree.app.app_state().unwrap().set_available(true);
    let mut req = request(Method::GET, "/x", Some("main"));
    assert_eq!(dispatch(&tree, &mut req).status(), 200);
}

#[test]
fn test_middleware_unavailable_signal_marks_handler() {
    let shared = Arc::new(SharedScope::new());
    shared.register_handler(
        "test.OverloadedHandler",
        Arc::new(|| {
            Box::new(OverloadedHandler {
                retry_after: Duration::from_secs(60),
            })
        }),
    );

    let router = Container::new_router("edge", "main");
    let host = Container::new_host("main", std::env::temp_dir());
    router.add_child(Arc::clone(&host)).unwrap();
    let app_scope = scope(&shared);
    let app = Container::new_application("app", std::env::temp_dir(), "", true, Arc::clone(&app_scope));
    app.app_state().unwrap().swap_runtime(
        AppRuntime::builder(app_scope)
            .mapping("/", "busy")
            .build(),
    );
    app.add_child(Container::new_handler("busy", "test.OverloadedHandler", Default::default()))
        .unwrap();
    host.install_app(Arc::clone(&app)).unwrap();
    router.start().unwrap();

    let before = SystemTime::now();
    let mut req = request(Method::GET, "/x", Some("main"));
    let mut res = Response::new();
    router.pipeline().invoke(&router, &mut req, &mut res).unwrap();

    assert_eq!(res.status(), 503);
    assert!(res.get_header("retry-after").is_some());

    // the handler itself is now marked unavailable
    let handler = app.find_child("busy").unwrap();
    match handler.availability() {
        arbor::container::Availability::Until(t) => assert!(t > before),
        other => panic!("expected finite unavailability, got {other:?}"),
    }
}

#[test]
fn test_provisional_ack_is_sent_when_requested() {
    let tree = recording_tree("", &[("/", "default")]);
    let mut req = request(Method::POST, "/upload", Some("main"));
    req.expects_ack = true;
    let res = dispatch(&tree, &mut req);
    assert_eq!(res.status(), 200);
    assert!(res.ack_sent());
}
