use serde_json::json;

use super::core::HttpHandler;
use crate::server::{Request, Response};

/// Built-in handler that echoes the request's resolved shape back as JSON.
pub struct EchoHandler;

impl HttpHandler for EchoHandler {
    fn invoke(&self, request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        response.send_json(
            200,
            json!({
                "method": request.method.to_string(),
                "uri": request.uri,
                "context_path": request.context_path,
                "handler_path": request.handler_path,
                "path_info": request.path_info,
                "handler": request.handler.as_ref().map(|h| h.name().to_string()),
            }),
        );
        Ok(())
    }
}
