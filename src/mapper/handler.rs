use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, warn};

use super::core::{decode_target, Mapper};
use crate::container::{AppRuntime, Container};
use crate::server::Request;

/// Application-level mapper: resolves a Handler from the request's path
/// relative to the matched contextPath.
///
/// Rules are tried in strict order until one succeeds:
/// 1. exact match (never for bare `/`, which belongs to rule 4),
/// 2. longest `/*` prefix match, stripping one trailing segment per step,
/// 3. `*.ext` extension match on the last segment,
/// 4. the `/` default mapping as catch-all.
///
/// With writeback, the matched handler path and extra path info are
/// recorded on the request (an empty rule-2 remainder is recorded as none,
/// not as an empty string).
pub struct HandlerMapper;

enum Resolution {
    /// handler name, handler path, path info
    Found(String, String, Option<String>),
    None,
}

fn resolve(runtime: &AppRuntime, relative: &str) -> Resolution {
    // Rule 1: exact.
    if relative != "/" {
        if let Some(name) = runtime.exact_mapping(relative) {
            return Resolution::Found(name.to_string(), relative.to_string(), None);
        }
    }

    // Rule 2: longest prefix, stripping trailing segments. The empty
    // candidate covers a declared bare "/*".
    let mut candidate = relative;
    loop {
        if let Some(name) = runtime.prefix_mapping(candidate) {
            let remainder = &relative[candidate.len()..];
            let path_info = if remainder.is_empty() {
                None
            } else {
                Some(remainder.to_string())
            };
            return Resolution::Found(name.to_string(), candidate.to_string(), path_info);
        }
        if candidate.is_empty() {
            break;
        }
        match candidate.rfind('/') {
            Some(idx) => candidate = &candidate[..idx],
            None => break,
        }
    }

    // Rule 3: extension of the last segment.
    let last_segment = relative.rsplit('/').next().unwrap_or("");
    if let Some(dot) = last_segment.rfind('.') {
        let extension = &last_segment[dot + 1..];
        if !extension.is_empty() {
            if let Some(name) = runtime.extension_mapping(extension) {
                return Resolution::Found(name.to_string(), relative.to_string(), None);
            }
        }
    }

    // Rule 4: default catch-all.
    if let Some(name) = runtime.default_mapping() {
        return Resolution::Found(name.to_string(), relative.to_string(), None);
    }
    Resolution::None
}

impl Mapper for HandlerMapper {
    fn map(
        &self,
        app: &Arc<Container>,
        request: &mut Request,
        writeback: bool,
    ) -> anyhow::Result<Option<Arc<Container>>> {
        let runtime = match &request.runtime {
            Some(runtime) => Arc::clone(runtime),
            None => app
                .app_state()
                .ok_or_else(|| anyhow!("'{}' is not an application container", app.name()))?
                .runtime(),
        };
        let decoded = match &request.decoded_path {
            Some(decoded) => decoded.clone(),
            None => decode_target(request)?,
        };
        let cut = request.context_path.len().min(decoded.len());
        let relative = if decoded[cut..].is_empty() {
            "/"
        } else {
            &decoded[cut..]
        };

        match resolve(&runtime, relative) {
            Resolution::Found(name, handler_path, path_info) => {
                let Some(handler) = app.find_child(&name) else {
                    warn!(
                        application = %app.name(),
                        handler = %name,
                        "Mapping names a handler that is not deployed"
                    );
                    return Ok(None);
                };
                debug!(
                    request_id = %request.id,
                    relative = %relative,
                    handler = %name,
                    handler_path = %handler_path,
                    path_info = ?path_info,
                    "Handler matched"
                );
                if writeback {
                    request.handler_path = handler_path;
                    request.path_info = path_info;
                    request.handler = Some(Arc::clone(&handler));
                }
                Ok(Some(handler))
            }
            Resolution::None => {
                debug!(request_id = %request.id, relative = %relative, "No handler matched");
                Ok(None)
            }
        }
    }
}
