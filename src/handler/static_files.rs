use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::anyhow;
use once_cell::sync::OnceCell;

use super::core::{HandlerConfig, HttpHandler};
use crate::server::{Request, Response};

/// Built-in handler serving files from the owning application's deployment
/// root. The conventional default-mapping (`/`) handler.
pub struct StaticHandler {
    root: OnceCell<PathBuf>,
    index: OnceCell<String>,
}

impl Default for StaticHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticHandler {
    pub fn new() -> Self {
        Self {
            root: OnceCell::new(),
            index: OnceCell::new(),
        }
    }

    /// Map a URL path under the document root, refusing any component that
    /// would escape it.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.root.get()?.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn content_type(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase()
            .as_str()
        {
            "html" => "text/html",
            "css" => "text/css",
            "js" => "application/javascript",
            "json" => "application/json",
            "txt" => "text/plain",
            "yaml" | "yml" => "text/yaml",
            _ => "application/octet-stream",
        }
    }
}

impl HttpHandler for StaticHandler {
    fn init(&self, config: &HandlerConfig) -> anyhow::Result<()> {
        let root = config
            .base_path
            .clone()
            .ok_or_else(|| anyhow!("static handler '{}' has no document root", config.name))?;
        let _ = self.root.set(root);
        let index = config.init_param("index").unwrap_or("index.html");
        let _ = self.index.set(index.to_string());
        Ok(())
    }

    fn invoke(&self, request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        let rel = request.relative_path().trim_start_matches('/');
        let rel = if rel.is_empty() {
            self.index.get().map(String::as_str).unwrap_or("index.html")
        } else {
            rel
        };
        let Some(path) = self.map_path(rel) else {
            response.send_error(404, "invalid path");
            return Ok(());
        };
        if !path.is_file() {
            response.send_error(404, "file not found");
            return Ok(());
        }
        let bytes = fs::read(&path)?;
        response.send_bytes(200, Self::content_type(&path), bytes);
        Ok(())
    }
}
