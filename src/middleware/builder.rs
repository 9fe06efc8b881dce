use std::sync::Arc;

use tracing::debug;

use super::core::{FilterChain, Middleware};
use crate::container::{AppRuntime, MapTarget};
use crate::handler::HttpHandler;

/// Assemble the per-request middleware chain for a resolved handler.
///
/// Two passes over the application's declared mappings, each in declaration
/// order: first every URL-pattern map matching the request's
/// contextPath-relative path, then every map declared against the resolved
/// handler's name. A map referencing an unconfigured middleware was warned
/// about at build time and is skipped here.
pub fn build_chain(
    runtime: &AppRuntime,
    relative_path: &str,
    handler_name: &str,
    terminal: Arc<dyn HttpHandler>,
) -> FilterChain {
    let maps = runtime.middleware_maps();
    if maps.is_empty() {
        return FilterChain::new(Vec::new(), terminal);
    }

    let mut links = Vec::new();
    for map in maps {
        if let MapTarget::Url(pattern) = &map.target {
            if matches_url(pattern, relative_path) {
                append(runtime, &map.middleware_name, &mut links);
            }
        }
    }
    for map in maps {
        if let MapTarget::Handler(name) = &map.target {
            if name == handler_name {
                append(runtime, &map.middleware_name, &mut links);
            }
        }
    }
    FilterChain::new(links, terminal)
}

fn append(runtime: &AppRuntime, name: &str, links: &mut Vec<Arc<dyn Middleware>>) {
    match runtime.middleware_instance(name) {
        Some(instance) => links.push(Arc::clone(instance)),
        None => debug!(middleware = %name, "Unconfigured middleware skipped"),
    }
}

/// URL-pattern match with the same three pattern kinds as handler mapping:
/// exact, trailing `/*` prefix, leading `*.` extension.
pub(crate) fn matches_url(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        if prefix.is_empty() {
            return true;
        }
        return path == prefix
            || (path.len() > prefix.len()
                && path.starts_with(prefix)
                && path.as_bytes()[prefix.len()] == b'/');
    }
    if let Some(extension) = pattern.strip_prefix("*.") {
        let last_segment = path.rsplit('/').next().unwrap_or("");
        if let Some(dot) = last_segment.rfind('.') {
            return &last_segment[dot + 1..] == extension;
        }
    }
    false
}
