use std::io::Read;
use std::sync::Arc;

use http::Method;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::container::{AppRuntime, Container};
use crate::ids::RequestId;

/// Maximum inline headers before heap allocation; most requests carry ≤16.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for the hot path.
///
/// Header names use `Arc<str>` because they repeat across requests
/// (`host`, `content-type`, ...) and `Arc::clone()` is O(1); values are
/// per-request data and stay `String`.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Declared protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http10,
    Http11,
}

impl Protocol {
    /// HTTP/1.1 requests must declare a virtual host.
    pub fn requires_host(self) -> bool {
        matches!(self, Protocol::Http11)
    }
}

/// A request as seen by the container tree.
///
/// The transport populates the immutable fields; the mapper chain writes
/// the match results (`context_path`, `handler_path`, `path_info`, resolved
/// container references) as the request moves down the hierarchy.
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    pub protocol: Protocol,
    /// Raw target URI as received, query string included.
    pub uri: String,
    /// Declared virtual-host name; the router mapper substitutes the
    /// default host here when absent.
    pub vhost: Option<String>,
    pub headers: HeaderVec,
    pub body: Option<Vec<u8>>,
    /// The request asked for a provisional acknowledgment
    /// (`Expect: 100-continue`).
    pub expects_ack: bool,

    /// Decoded request path, recorded by the host-level mapper.
    pub decoded_path: Option<String>,
    /// Matched application prefix; empty string for the root application.
    pub context_path: String,
    /// Path that selected the handler, relative to the contextPath.
    pub handler_path: String,
    /// Remainder of the path beyond the matched prefix, when rule 2 hit.
    pub path_info: Option<String>,

    pub host: Option<Arc<Container>>,
    pub application: Option<Arc<Container>>,
    pub handler: Option<Arc<Container>>,
    /// Application runtime pinned at admission; a reload swapping the
    /// runtime does not disturb this request.
    pub runtime: Option<Arc<AppRuntime>>,

    /// Diagnostic context attached when handler or middleware invocation
    /// failed.
    pub diagnostic: Option<anyhow::Error>,
}

impl Request {
    pub fn new(method: Method, uri: &str, protocol: Protocol) -> Self {
        Self {
            id: RequestId::new(),
            method,
            protocol,
            uri: uri.to_string(),
            vhost: None,
            headers: HeaderVec::new(),
            body: None,
            expects_ack: false,
            decoded_path: None,
            context_path: String::new(),
            handler_path: String::new(),
            path_info: None,
            host: None,
            application: None,
            handler: None,
            runtime: None,
            diagnostic: None,
        }
    }

    /// Raw target with the query string cut off.
    pub fn raw_path(&self) -> &str {
        self.uri.split('?').next().unwrap_or("/")
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Request path relative to the matched contextPath; `/` when the
    /// remainder is empty.
    pub fn relative_path(&self) -> &str {
        let decoded = self.decoded_path.as_deref().unwrap_or("/");
        let cut = self.context_path.len().min(decoded.len());
        let relative = &decoded[cut..];
        if relative.is_empty() {
            "/"
        } else {
            relative
        }
    }

    pub fn set_diagnostic(&mut self, error: anyhow::Error) {
        self.diagnostic = Some(error);
    }
}

/// Extract a core [`Request`] from a raw `may_minihttp` request.
pub fn parse_request(req: may_minihttp::Request) -> Request {
    let method: Method = req.method().parse().unwrap_or(Method::GET);
    let uri = req.path().to_string();
    let protocol = match format!("{:?}", req.version()).as_str() {
        "HTTP/1.0" | "Http10" => Protocol::Http10,
        _ => Protocol::Http11,
    };

    let mut headers = HeaderVec::new();
    for h in req.headers().iter() {
        headers.push((
            Arc::from(h.name.to_ascii_lowercase().as_str()),
            String::from_utf8_lossy(h.value).to_string(),
        ));
    }
    debug!(
        header_count = headers.len(),
        size_bytes = headers.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>(),
        "Headers extracted"
    );

    let body = {
        let mut buf = Vec::new();
        match req.body().read_to_end(&mut buf) {
            Ok(n) if n > 0 => Some(buf),
            _ => None,
        }
    };

    let mut request = Request::new(method, &uri, protocol);
    request.headers = headers;
    request.body = body;
    // Honor a caller-supplied correlation id when it parses.
    request.id = RequestId::from_header_or_new(request.get_header("x-request-id"));
    // The Host header may carry a port; only the name takes part in
    // virtual-host resolution.
    request.vhost = request
        .get_header("host")
        .map(|h| h.split(':').next().unwrap_or(h).to_string());
    request.expects_ack = request
        .get_header("expect")
        .map(|v| v.eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false);

    info!(
        request_id = %request.id,
        method = %request.method,
        uri = %request.uri,
        vhost = ?request.vhost,
        "HTTP request parsed"
    );
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_path_strips_query() {
        let req = Request::new(Method::GET, "/a/b?x=1", Protocol::Http11);
        assert_eq!(req.raw_path(), "/a/b");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = Request::new(Method::GET, "/", Protocol::Http11);
        req.set_header("Host", "example.test".to_string());
        assert_eq!(req.get_header("hOsT"), Some("example.test"));
    }

    #[test]
    fn test_relative_path_root_fallback() {
        let mut req = Request::new(Method::GET, "/app", Protocol::Http11);
        req.decoded_path = Some("/app".to_string());
        req.context_path = "/app".to_string();
        assert_eq!(req.relative_path(), "/");
    }
}
