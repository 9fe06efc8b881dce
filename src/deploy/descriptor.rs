use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::Deserialize;

use super::scope::{IsolationScope, SharedScope, DESCRIPTOR_DIR};
use crate::container::{AppRuntime, Container};
use crate::middleware::{Middleware, MiddlewareConfig};

/// File name of the application descriptor inside `APP-INF/`.
pub const DESCRIPTOR_FILE: &str = "app.yaml";

/// The `APP-INF/app.yaml` application descriptor.
///
/// An application without a descriptor is deployed with the default
/// descriptor: a single static handler mapped at `/`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppDescriptor {
    #[serde(default)]
    pub handlers: Vec<HandlerDecl>,
    #[serde(default)]
    pub mappings: Vec<MappingDecl>,
    #[serde(default)]
    pub middleware: Vec<MiddlewareDecl>,
    #[serde(default)]
    pub middleware_mappings: Vec<MiddlewareMapDecl>,
    #[serde(default)]
    pub listeners: Vec<String>,
    #[serde(default = "default_reloadable")]
    pub reloadable: bool,
}

fn default_reloadable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandlerDecl {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingDecl {
    pub pattern: String,
    pub handler: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiddlewareDecl {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Exactly one of `url` / `handler` must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct MiddlewareMapDecl {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
}

impl Default for AppDescriptor {
    fn default() -> Self {
        Self {
            handlers: vec![HandlerDecl {
                name: "default".to_string(),
                class: "arbor.StaticHandler".to_string(),
                params: HashMap::new(),
            }],
            mappings: vec![MappingDecl {
                pattern: "/".to_string(),
                handler: "default".to_string(),
            }],
            middleware: Vec::new(),
            middleware_mappings: Vec::new(),
            listeners: Vec::new(),
            reloadable: true,
        }
    }
}

impl AppDescriptor {
    /// Load the descriptor for the application rooted at `base_path`,
    /// falling back to the default descriptor when none exists.
    pub fn load(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(DESCRIPTOR_DIR).join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading descriptor {}", path.display()))?;
        let descriptor: AppDescriptor = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing descriptor {}", path.display()))?;
        Ok(descriptor)
    }

    /// Modification time of the descriptor file, if one exists.
    pub fn mtime(base_path: &Path) -> Option<std::time::SystemTime> {
        let path = base_path.join(DESCRIPTOR_DIR).join(DESCRIPTOR_FILE);
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

/// Build an application runtime and its handler containers from a
/// descriptor.
///
/// Middleware instances are created through the scope and initialized
/// here; nothing is published until the caller swaps the runtime in, so a
/// failure leaves the previous application state untouched.
pub fn build_runtime(
    descriptor: &AppDescriptor,
    base_path: &Path,
    shared: &Arc<SharedScope>,
    previous_scope: Option<&Arc<IsolationScope>>,
) -> anyhow::Result<(AppRuntime, Vec<Arc<Container>>)> {
    // Reuse the existing scope unless its repositories changed.
    let scope = match previous_scope {
        Some(prev) if !prev.modified() => Arc::clone(prev),
        _ => Arc::new(IsolationScope::new(Arc::clone(shared), base_path)),
    };

    let mut builder = AppRuntime::builder(Arc::clone(&scope));
    for mapping in &descriptor.mappings {
        builder = builder.mapping(&mapping.pattern, &mapping.handler);
    }
    for decl in &descriptor.middleware {
        let factory = scope.resolve_middleware(&decl.class).ok_or_else(|| {
            anyhow!("no middleware implementation registered for '{}'", decl.class)
        })?;
        let instance: Arc<dyn Middleware> = Arc::from(factory());
        instance.init(&MiddlewareConfig {
            name: decl.name.clone(),
            init_params: decl.params.clone(),
        })?;
        builder = builder.middleware(&decl.name, instance);
    }
    for map in &descriptor.middleware_mappings {
        builder = match (&map.url, &map.handler) {
            (Some(url), None) => builder.url_map(&map.name, url),
            (None, Some(handler)) => builder.handler_map(&map.name, handler),
            _ => {
                return Err(anyhow!(
                    "middleware mapping '{}' must name exactly one of url/handler",
                    map.name
                ))
            }
        };
    }

    let handlers = descriptor
        .handlers
        .iter()
        .map(|decl| Container::new_handler(&decl.name, &decl.class, decl.params.clone()))
        .collect();

    Ok((builder.build(), handlers))
}
