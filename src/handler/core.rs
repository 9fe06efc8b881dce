use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use crate::server::{Request, Response};

/// Configuration handed to a handler's `init`: its container name, the
/// declared init parameters, and the owning application's deployment root.
pub struct HandlerConfig {
    pub name: String,
    pub init_params: HashMap<String, String>,
    pub base_path: Option<PathBuf>,
}

impl HandlerConfig {
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }
}

/// The leaf capability: produces a response for a matched request.
///
/// `init` is called once when the instance is created (lazily, on first
/// allocation); `destroy` when the instance is unloaded.
pub trait HttpHandler: Send + Sync {
    fn init(&self, _config: &HandlerConfig) -> anyhow::Result<()> {
        Ok(())
    }

    fn invoke(&self, request: &mut Request, response: &mut Response) -> anyhow::Result<()>;

    fn destroy(&self) {}
}

/// Signals from a handler or middleware that the target handler should be
/// marked unavailable: for `retry_after`, or permanently when `None`.
///
/// The handler-level checkpoint downcasts invocation errors to this type;
/// anything else becomes an internal error with the failure attached to the
/// request as diagnostic context.
#[derive(Debug)]
pub struct UnavailableError {
    pub retry_after: Option<Duration>,
}

impl UnavailableError {
    pub fn temporary(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent() -> Self {
        Self { retry_after: None }
    }
}

impl Display for UnavailableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.retry_after {
            Some(d) => write!(f, "unavailable, retry after {}s", d.as_secs()),
            None => write!(f, "permanently unavailable"),
        }
    }
}

impl std::error::Error for UnavailableError {}
