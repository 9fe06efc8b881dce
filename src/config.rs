//! Server descriptor loading and tree construction.
//!
//! The `arbor.yaml` descriptor describes the container tree down to the
//! Hosts; Applications and Handlers below them come from the hot-deploy
//! manager. The builder walks the typed descriptor in document order and
//! constructs the tree through the same public container-mutation
//! operations (constructors, `add_child`, `add_lifecycle_listener`) any
//! other builder would use.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::container::{Container, ContainerKind};
use crate::deploy::{HostDeployer, SharedScope};
use crate::runtime_config::RuntimeConfig;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub root: RootConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    #[serde(default = "default_root_name")]
    pub name: String,
    #[serde(default = "default_shutdown_port")]
    pub shutdown_port: u16,
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: String,
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    pub router: RouterConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    pub name: String,
    pub default_host: String,
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,
    pub app_base: PathBuf,
    /// Overrides `ARBOR_SCAN_INTERVAL_MS` for this host.
    #[serde(default)]
    pub scan_interval_ms: Option<u64>,
}

fn default_root_name() -> String {
    "arbor".to_string()
}

fn default_shutdown_port() -> u16 {
    8005
}

fn default_shutdown_command() -> String {
    "SHUTDOWN".to_string()
}

pub fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading server descriptor {}", path.display()))?;
    let config: ServerConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing server descriptor {}", path.display()))?;
    Ok(config)
}

/// Construct the container tree described by the config, attaching a
/// hot-deploy manager to every Host.
pub fn build_tree(
    config: &ServerConfig,
    shared: &Arc<SharedScope>,
) -> anyhow::Result<Arc<Container>> {
    let defaults = RuntimeConfig::from_env();
    let root = Container::new_root(
        &config.root.name,
        config.root.shutdown_port,
        &config.root.shutdown_command,
    );
    for group_cfg in &config.root.groups {
        let group = Container::new_group(&group_cfg.name);
        let router = Container::new_router(
            &group_cfg.router.name,
            &group_cfg.router.default_host,
        );
        for host_cfg in &group_cfg.router.hosts {
            let host = Container::new_host(&host_cfg.name, &host_cfg.app_base);
            let interval = host_cfg
                .scan_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_interval);
            host.add_lifecycle_listener(HostDeployer::new(Arc::clone(shared), interval));
            router.add_child(host)?;
        }
        group.add_child(router)?;
        root.add_child(group)?;
    }
    info!(
        root = %config.root.name,
        groups = config.root.groups.len(),
        "Container tree built"
    );
    Ok(root)
}

/// The first Router under the Root's groups: the request entry point the
/// transport binds to.
pub fn find_router(root: &Arc<Container>) -> Option<Arc<Container>> {
    for group in root.find_children() {
        for child in group.find_children() {
            if matches!(child.kind(), ContainerKind::Router(_)) {
                return Some(child);
            }
        }
    }
    None
}
