use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error};

use super::core::{Checkpoint, CheckpointChain};
use crate::container::{Availability, Container};
use crate::handler::UnavailableError;
use crate::mapper::{AppMapper, HandlerMapper, HostMapper, Mapper};
use crate::middleware::build_chain;
use crate::server::{Request, Response};

/// Request paths that must never be served: the hidden-file prefix and the
/// application's private descriptor/library tree. Compared
/// case-insensitively against the contextPath-relative path.
const RESERVED_PREFIXES: [&str; 2] = ["/.", "/app-inf"];

fn is_reserved(relative_path: &str) -> bool {
    let lower = relative_path.to_ascii_lowercase();
    RESERVED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Basic checkpoint for containers that never see requests (Root, Group).
pub struct NonRoutingCheckpoint;

impl Checkpoint for NonRoutingCheckpoint {
    fn invoke(
        &self,
        container: &Arc<Container>,
        _request: &mut Request,
        _response: &mut Response,
        _chain: &mut CheckpointChain<'_>,
    ) -> anyhow::Result<()> {
        Err(anyhow!(
            "container '{}' does not process requests",
            container.name()
        ))
    }
}

/// Router level: enforce the protocol's virtual-host requirement, resolve
/// the Host, forward.
pub struct RouterCheckpoint;

impl Checkpoint for RouterCheckpoint {
    fn invoke(
        &self,
        router: &Arc<Container>,
        request: &mut Request,
        response: &mut Response,
        _chain: &mut CheckpointChain<'_>,
    ) -> anyhow::Result<()> {
        if request.protocol.requires_host() && request.vhost.is_none() {
            response.send_error(400, "request protocol requires a Host header");
            return Ok(());
        }
        let Some(host) = HostMapper.map(router, request, true)? else {
            response.send_error(404, "no virtual host matched");
            return Ok(());
        };
        host.pipeline().invoke(&host, request, response)
    }
}

/// Host level: resolve the Application, pin its runtime on the request,
/// switch the worker's isolation scope, forward.
pub struct HostCheckpoint;

impl Checkpoint for HostCheckpoint {
    fn invoke(
        &self,
        host: &Arc<Container>,
        request: &mut Request,
        response: &mut Response,
        _chain: &mut CheckpointChain<'_>,
    ) -> anyhow::Result<()> {
        let app = match AppMapper.map(host, request, true) {
            Ok(Some(app)) => app,
            Ok(None) => {
                response.send_error(404, "no application matched");
                return Ok(());
            }
            Err(e) => {
                debug!(request_id = %request.id, error = %e, "Request target rejected");
                response.send_error(400, "malformed request target");
                return Ok(());
            }
        };
        let runtime = app
            .app_state()
            .ok_or_else(|| anyhow!("'{}' is not an application container", app.name()))?
            .runtime();
        // Pinned for the rest of this request: a reload swapping the
        // runtime does not disturb us.
        request.runtime = Some(Arc::clone(&runtime));
        let _scope = runtime.scope.enter();
        app.pipeline().invoke(&app, request, response)
    }
}

/// Application level: refuse reserved resources, resolve the Handler,
/// attach the application to the response, forward.
pub struct ApplicationCheckpoint;

impl Checkpoint for ApplicationCheckpoint {
    fn invoke(
        &self,
        app: &Arc<Container>,
        request: &mut Request,
        response: &mut Response,
        _chain: &mut CheckpointChain<'_>,
    ) -> anyhow::Result<()> {
        if is_reserved(request.relative_path()) {
            response.send_error(403, "access to a reserved resource is forbidden");
            return Ok(());
        }
        let handler = match HandlerMapper.map(app, request, true) {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                response.send_error(404, "no handler matched");
                return Ok(());
            }
            Err(e) => {
                debug!(request_id = %request.id, error = %e, "Handler mapping failed");
                response.send_error(400, "malformed request target");
                return Ok(());
            }
        };
        response.set_application(Arc::clone(app));
        handler.pipeline().invoke(&handler, request, response)
    }
}

/// Handler level: availability gate, instance allocation, provisional
/// acknowledgment, middleware chain construction and invocation, error
/// capture, scoped release.
pub struct HandlerCheckpoint;

impl Checkpoint for HandlerCheckpoint {
    fn invoke(
        &self,
        handler: &Arc<Container>,
        request: &mut Request,
        response: &mut Response,
        _chain: &mut CheckpointChain<'_>,
    ) -> anyhow::Result<()> {
        if let Some(app) = &request.application {
            if let Some(st) = app.app_state() {
                if !st.is_available() {
                    response.send_error(503, "application is temporarily unavailable");
                    return Ok(());
                }
            }
        }
        match handler.availability() {
            Availability::Available => {}
            Availability::Until(until) => {
                response.set_retry_after(until);
                response.send_error(503, "handler is temporarily unavailable");
                return Ok(());
            }
            Availability::Forever => {
                response.send_error(503, "handler is unavailable");
                return Ok(());
            }
        }

        let runtime = request
            .runtime
            .clone()
            .ok_or_else(|| anyhow!("no application runtime pinned on request"))?;
        let base_path = request
            .application
            .as_ref()
            .and_then(|a| a.app_state())
            .map(|s| s.base_path.clone());

        // Allocation increments the in-flight counter; the lease's drop
        // releases it on every path out of this function.
        let lease = match handler.allocate(&runtime.scope, base_path.as_deref()) {
            Ok(lease) => lease,
            Err(e) => {
                error!(
                    request_id = %request.id,
                    handler = %handler.name(),
                    error = %e,
                    "Handler allocation failed"
                );
                request.set_diagnostic(e);
                response.send_error(500, "handler allocation failed");
                return Ok(());
            }
        };

        if request.expects_ack {
            response.send_ack();
        }

        let relative_path = request.relative_path().to_string();
        let mut chain = build_chain(
            &runtime,
            &relative_path,
            handler.name(),
            Arc::clone(&lease.instance),
        );
        debug!(
            request_id = %request.id,
            handler = %handler.name(),
            middleware_count = chain.len(),
            "Invoking middleware chain"
        );

        if let Err(e) = chain.next(request, response) {
            match e.downcast_ref::<UnavailableError>() {
                Some(unavailable) => {
                    handler.mark_unavailable(unavailable.retry_after);
                    if let Availability::Until(until) = handler.availability() {
                        response.set_retry_after(until);
                    }
                    response.send_error(503, "handler is temporarily unavailable");
                }
                None => {
                    error!(
                        request_id = %request.id,
                        handler = %handler.name(),
                        error = %e,
                        "Handler invocation failed"
                    );
                    request.set_diagnostic(e);
                    response.send_error(500, "handler invocation failed");
                }
            }
        }
        // Dropped in reverse order here: the chain's per-request state
        // first, then the lease (in-flight decrement, and unload if the
        // handler is by now permanently unavailable and idle).
        Ok(())
    }
}
