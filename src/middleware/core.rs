use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::HttpHandler;
use crate::server::{Request, Response};

/// Named initialization parameters handed to a middleware's `init`.
pub struct MiddlewareConfig {
    pub name: String,
    pub init_params: HashMap<String, String>,
}

/// Chain-composable unit wrapping handler invocation with cross-cutting
/// behaviour.
///
/// A middleware may run code before and after delegating via
/// [`FilterChain::next`], or refuse to delegate — short-circuiting every
/// following middleware and the handler.
pub trait Middleware: Send + Sync {
    fn init(&self, _config: &MiddlewareConfig) -> anyhow::Result<()> {
        Ok(())
    }

    fn invoke(
        &self,
        request: &mut Request,
        response: &mut Response,
        chain: &mut FilterChain,
    ) -> anyhow::Result<()>;

    fn destroy(&self) {}
}

/// Per-request middleware chain terminating in the target handler.
///
/// State is per-request: the chain is built for one invocation and
/// discarded after the handler-level checkpoint completes.
pub struct FilterChain {
    links: Vec<Arc<dyn Middleware>>,
    position: usize,
    terminal: Arc<dyn HttpHandler>,
}

impl FilterChain {
    pub fn new(links: Vec<Arc<dyn Middleware>>, terminal: Arc<dyn HttpHandler>) -> Self {
        Self {
            links,
            position: 0,
            terminal,
        }
    }

    /// Continue with the rest of the chain; the terminal position invokes
    /// the handler directly.
    pub fn next(&mut self, request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        if self.position < self.links.len() {
            let middleware = Arc::clone(&self.links[self.position]);
            self.position += 1;
            middleware.invoke(request, response, self)
        } else {
            self.terminal.invoke(request, response)
        }
    }

    /// Number of middleware links ahead of the handler.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
