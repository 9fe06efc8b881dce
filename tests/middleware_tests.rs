//! Middleware chain construction and invocation: two-pass build order,
//! pattern matching, short-circuiting, and unconfigured-reference
//! skipping.

mod common;

use std::sync::Arc;

use http::Method;
use serde_json::json;

use arbor::container::AppRuntime;
use arbor::deploy::SharedScope;
use arbor::handler::HttpHandler;
use arbor::middleware::build_chain;
use arbor::server::{Request, Response};
use common::{request, scope, trace, trace_entries, BlockingMiddleware, TaggingMiddleware};

struct TerminalHandler {
    trace: common::Trace,
}

impl HttpHandler for TerminalHandler {
    fn invoke(&self, _request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        self.trace.lock().unwrap().push("handler".to_string());
        response.send_json(200, json!({ "ok": true }));
        Ok(())
    }
}

fn run_chain(runtime: &AppRuntime, path: &str, handler_name: &str, events: &common::Trace) -> Response {
    let terminal: Arc<dyn HttpHandler> = Arc::new(TerminalHandler {
        trace: Arc::clone(events),
    });
    let mut chain = build_chain(runtime, path, handler_name, terminal);
    let mut req = request(Method::GET, path, Some("main"));
    let mut res = Response::new();
    chain.next(&mut req, &mut res).unwrap();
    res
}

fn bare_runtime_builder() -> arbor::container::AppRuntimeBuilder {
    AppRuntime::builder(scope(&Arc::new(SharedScope::new())))
}

#[test]
fn test_no_mappings_yields_handler_only_chain() {
    let events = trace();
    let runtime = bare_runtime_builder().build();
    let res = run_chain(&runtime, "/x", "h", &events);
    assert_eq!(res.status(), 200);
    assert_eq!(trace_entries(&events), vec!["handler"]);
}

#[test]
fn test_middleware_wraps_handler_outermost_first() {
    let events = trace();
    let runtime = bare_runtime_builder()
        .middleware(
            "outer",
            Arc::new(TaggingMiddleware {
                tag: "outer".into(),
                trace: Arc::clone(&events),
            }),
        )
        .middleware(
            "inner",
            Arc::new(TaggingMiddleware {
                tag: "inner".into(),
                trace: Arc::clone(&events),
            }),
        )
        .url_map("outer", "/*")
        .url_map("inner", "/*")
        .build();

    run_chain(&runtime, "/x", "h", &events);
    assert_eq!(
        trace_entries(&events),
        vec![
            "outer:before",
            "inner:before",
            "handler",
            "inner:after",
            "outer:after"
        ]
    );
}

#[test]
fn test_url_pass_precedes_handler_name_pass() {
    let events = trace();
    // the name-mapped middleware is declared first, but URL maps build
    // the first pass, so it still lands after the URL-mapped one
    let runtime = bare_runtime_builder()
        .middleware(
            "by-name",
            Arc::new(TaggingMiddleware {
                tag: "by-name".into(),
                trace: Arc::clone(&events),
            }),
        )
        .middleware(
            "by-url",
            Arc::new(TaggingMiddleware {
                tag: "by-url".into(),
                trace: Arc::clone(&events),
            }),
        )
        .handler_map("by-name", "h")
        .url_map("by-url", "/*")
        .build();

    run_chain(&runtime, "/x", "h", &events);
    assert_eq!(
        trace_entries(&events),
        vec![
            "by-url:before",
            "by-name:before",
            "handler",
            "by-name:after",
            "by-url:after"
        ]
    );
}

#[test]
fn test_handler_name_map_only_matches_its_handler() {
    let events = trace();
    let runtime = bare_runtime_builder()
        .middleware(
            "mw",
            Arc::new(TaggingMiddleware {
                tag: "mw".into(),
                trace: Arc::clone(&events),
            }),
        )
        .handler_map("mw", "other")
        .build();

    run_chain(&runtime, "/x", "h", &events);
    assert_eq!(trace_entries(&events), vec!["handler"]);
}

#[test]
fn test_url_patterns_select_by_request_path() {
    let events = trace();
    let runtime = bare_runtime_builder()
        .middleware(
            "api",
            Arc::new(TaggingMiddleware {
                tag: "api".into(),
                trace: Arc::clone(&events),
            }),
        )
        .middleware(
            "ext",
            Arc::new(TaggingMiddleware {
                tag: "ext".into(),
                trace: Arc::clone(&events),
            }),
        )
        .url_map("api", "/api/*")
        .url_map("ext", "*.css")
        .build();

    run_chain(&runtime, "/api/users", "h", &events);
    assert_eq!(
        trace_entries(&events),
        vec!["api:before", "handler", "api:after"]
    );

    events.lock().unwrap().clear();
    run_chain(&runtime, "/styles/site.css", "h", &events);
    assert_eq!(
        trace_entries(&events),
        vec!["ext:before", "handler", "ext:after"]
    );

    events.lock().unwrap().clear();
    run_chain(&runtime, "/apiary", "h", &events);
    assert_eq!(trace_entries(&events), vec!["handler"]);
}

#[test]
fn test_short_circuit_skips_rest_of_chain_and_handler() {
    let events = trace();
    let runtime = bare_runtime_builder()
        .middleware(
            "gate",
            Arc::new(BlockingMiddleware {
                trace: Arc::clone(&events),
            }),
        )
        .middleware(
            "never",
            Arc::new(TaggingMiddleware {
                tag: "never".into(),
                trace: Arc::clone(&events),
            }),
        )
        .url_map("gate", "/*")
        .url_map("never", "/*")
        .build();

    let res = run_chain(&runtime, "/x", "h", &events);
    assert_eq!(res.status(), 403);
    assert_eq!(trace_entries(&events), vec!["blocked"]);
}

#[test]
fn test_unconfigured_reference_is_skipped_at_request_time() {
    let events = trace();
    let runtime = bare_runtime_builder()
        .middleware(
            "real",
            Arc::new(TaggingMiddleware {
                tag: "real".into(),
                trace: Arc::clone(&events),
            }),
        )
        .url_map("ghost", "/*")
        .url_map("real", "/*")
        .build();

    run_chain(&runtime, "/x", "h", &events);
    assert_eq!(
        trace_entries(&events),
        vec!["real:before", "handler", "real:after"]
    );
}

#[test]
fn test_runtime_drop_destroys_middleware() {
    let events = trace();
    let runtime = bare_runtime_builder()
        .middleware(
            "mw",
            Arc::new(TaggingMiddleware {
                tag: "mw".into(),
                trace: Arc::clone(&events),
            }),
        )
        .url_map("mw", "/*")
        .build();
    drop(runtime);
    assert_eq!(trace_entries(&events), vec!["mw:destroy"]);
}
