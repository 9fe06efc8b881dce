//! # Arbor
//!
//! **Arbor** is a hierarchical application server: a runtime that accepts
//! inbound HTTP requests, routes them through nested scopes
//! (virtual host → deployed application → request handler), applies
//! per-application middleware, and manages the full lifecycle of
//! dynamically deployed applications — isolated code resolution, hot
//! redeploy, and graceful start/stop.
//!
//! ## Architecture
//!
//! The library is organized around five subsystems:
//!
//! - **[`container`]** - the container tree (Root/Group/Router/Host/
//!   Application/Handler) and its cascading lifecycle state machine
//! - **[`pipeline`]** - per-level checkpoints with an explicit
//!   continuation object dispatching a request top-down
//! - **[`mapper`]** - per-level resolution: virtual host by name,
//!   application by longest contextPath prefix, handler by the
//!   exact/prefix/extension/default rule chain
//! - **[`deploy`]** - the per-host hot-deploy manager and the
//!   per-application isolation scope
//! - **[`middleware`]** - per-request middleware chains terminating in
//!   the resolved handler
//!
//! The transport ([`server`]) is a thin adapter over `may_minihttp`: it
//! parses the wire request, invokes the Router-level checkpoint, and
//! writes the completed response.
//!
//! ## Request flow
//!
//! ```text
//! transport → Router checkpoint ── HostMapper ──▶ Host checkpoint
//!           ── AppMapper (longest prefix) ──▶ Application checkpoint
//!           ── HandlerMapper (4 rules) ──▶ Handler checkpoint
//!           ── middleware chain ──▶ handler → response flows back
//! ```
//!
//! Each level rejects early with the matching status: 400 for a missing
//! required Host header or an undecodable target, 404 for an unresolved
//! host/application/handler, 403 for reserved resources, 503 (with a
//! Retry-After hint when known) for unavailability, 500 with the failure
//! attached to the request for handler errors.
//!
//! ## Hot deploy
//!
//! One deployer per Host scans its `appBase` on a fixed interval:
//! directories carrying an `APP-INF/` tree are installed as applications
//! (directory `ROOT` maps to the empty contextPath), and a changed
//! `APP-INF/app.yaml` triggers a rebuild-then-swap reload that never
//! disturbs in-flight requests.
//!
//! ## Runtime considerations
//!
//! Arbor runs request processing on the `may` coroutine runtime, not
//! tokio. The core introduces no suspension points of its own; blocking
//! I/O belongs to handlers. Stack size is configurable via
//! `ARBOR_STACK_SIZE`.

pub mod config;
pub mod container;
pub mod deploy;
pub mod handler;
pub mod ids;
pub mod mapper;
pub mod middleware;
pub mod pipeline;
pub mod runtime_config;
pub mod server;

pub use container::{Container, ContainerKind, LifecycleError, LifecycleState};
pub use deploy::{HostDeployer, IsolationScope, SharedScope};
pub use handler::{HttpHandler, UnavailableError};
pub use middleware::{FilterChain, Middleware};
pub use server::{EngineService, Request, Response};
