mod access_log;
mod builder;
mod core;

pub use access_log::AccessLogMiddleware;
pub use builder::build_chain;
pub use core::{FilterChain, Middleware, MiddlewareConfig};
