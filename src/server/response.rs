use std::sync::Arc;
use std::time::SystemTime;

use serde_json::{json, Value};
use tracing::debug;

use super::request::HeaderVec;
use crate::container::Container;

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// The response under construction for one request.
///
/// Checkpoints and handlers fill this in; the transport adapter writes it
/// to the wire once the pipeline returns. A response is `committed` once an
/// error has been sent or a body set; later error sends are best-effort
/// no-ops so a failure while rejecting never masks the original failure.
pub struct Response {
    status: u16,
    headers: HeaderVec,
    body: Vec<u8>,
    committed: bool,
    ack_sent: bool,
    application: Option<Arc<Container>>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: HeaderVec::new(),
            body: Vec::new(),
            committed: false,
            ack_sent: false,
            application: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    pub fn headers(&self) -> &HeaderVec {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// The application this response was resolved against, attached by the
    /// application-level checkpoint.
    pub fn application(&self) -> Option<&Arc<Container>> {
        self.application.as_ref()
    }

    pub fn set_application(&mut self, app: Arc<Container>) {
        self.application = Some(app);
    }

    /// Send a JSON body and commit the response.
    pub fn send_json(&mut self, status: u16, body: Value) {
        self.status = status;
        self.set_header("content-type", "application/json".to_string());
        self.body = body.to_string().into_bytes();
        self.committed = true;
    }

    pub fn send_bytes(&mut self, status: u16, content_type: &str, body: Vec<u8>) {
        self.status = status;
        self.set_header("content-type", content_type.to_string());
        self.body = body;
        self.committed = true;
    }

    /// Reject the request with an error body. Best-effort once committed:
    /// a second error send is dropped rather than masking the first.
    pub fn send_error(&mut self, status: u16, message: &str) {
        if self.committed {
            debug!(status = status, message = %message, "Response already committed - error send dropped");
            return;
        }
        self.send_json(
            status,
            json!({ "error": message, "status": status, "reason": status_reason(status) }),
        );
    }

    /// Attach a retry hint for a `503`; emitted as `Retry-After` seconds.
    pub fn set_retry_after(&mut self, until: SystemTime) {
        let seconds = until
            .duration_since(SystemTime::now())
            .map(|d| d.as_secs().max(1))
            .unwrap_or(1);
        self.set_header("retry-after", seconds.to_string());
    }

    /// Record the provisional `100 Continue` acknowledgment.
    pub fn send_ack(&mut self) {
        self.ack_sent = true;
    }

    pub fn ack_sent(&self) -> bool {
        self.ack_sent
    }
}

/// Write a completed core response out through `may_minihttp`.
pub fn write_response(out: &mut may_minihttp::Response, response: &Response) {
    out.status_code(response.status() as usize, status_reason(response.status()));
    for (name, value) in response.headers().iter() {
        // may_minihttp only takes 'static header lines.
        let line = format!("{name}: {value}").into_boxed_str();
        out.header(Box::leak(line));
    }
    out.body_vec(response.body().to_vec());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(503), "Service Unavailable");
    }

    #[test]
    fn test_error_send_is_best_effort_once_committed() {
        let mut res = Response::new();
        res.send_error(404, "no such handler");
        res.send_error(500, "late failure");
        assert_eq!(res.status(), 404);
    }
}
