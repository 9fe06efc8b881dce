use std::time::Instant;

use tracing::info;

use super::core::{FilterChain, Middleware};
use crate::server::{Request, Response};

/// Logs one structured line per request around chain delegation.
pub struct AccessLogMiddleware;

impl Middleware for AccessLogMiddleware {
    fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        chain: &mut FilterChain,
    ) -> anyhow::Result<()> {
        let start = Instant::now();
        let result = chain.next(request, response);
        info!(
            request_id = %request.id,
            method = %request.method,
            path = %request.relative_path(),
            status = response.status(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Request complete"
        );
        result
    }
}
