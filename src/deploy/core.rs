use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, warn};

use super::descriptor::{build_runtime, AppDescriptor};
use super::scope::{SharedScope, CLASS_ROOT, DESCRIPTOR_DIR, LIB_DIR};
use crate::container::{
    Container, LifecycleEvent, LifecycleEventKind, LifecycleListener, LifecycleState,
};

/// Directory name that deploys at the empty (root) contextPath.
pub const ROOT_APP: &str = "ROOT";

/// Default pause between deployment scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(15);

/// Per-host hot-deploy manager.
///
/// Registered as a lifecycle listener on its Host: on START it performs one
/// synchronous deployment scan and then starts a daemon thread that rescans
/// on a fixed interval and reloads applications whose descriptor changed;
/// on BEFORE_STOP it signals the daemon and joins it; on STOP (after the
/// children were stopped by the cascade) it undeploys every registered
/// application.
///
/// The daemon's interruptible sleep is a `recv_timeout` on the shutdown
/// channel, so stop never waits out a full interval.
pub struct HostDeployer {
    me: Weak<HostDeployer>,
    shared: Arc<SharedScope>,
    interval: Duration,
    /// Canonical application directory → contextPath it deployed at.
    deployed: Mutex<HashMap<PathBuf, String>>,
    /// contextPath → last observed descriptor mtime.
    timestamps: Mutex<HashMap<String, SystemTime>>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    daemon: Mutex<Option<JoinHandle<()>>>,
}

impl HostDeployer {
    pub fn new(shared: Arc<SharedScope>, interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            shared,
            interval,
            deployed: Mutex::new(HashMap::new()),
            timestamps: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(None),
            daemon: Mutex::new(None),
        })
    }

    /// One deployment scan over the host's `appBase`.
    ///
    /// Skips reserved names, entries already deployed (keyed by canonical
    /// path, so symlink aliases of a deployed directory are recognized),
    /// entries without a descriptor directory, and contextPaths already
    /// registered by any physical directory. A per-entry install failure is
    /// logged and does not abort the scan of remaining entries.
    pub fn scan(&self, host: &Arc<Container>) {
        let Some(hs) = host.host_state() else { return };
        let entries = match fs::read_dir(&hs.app_base) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    host = %host.name(),
                    app_base = %hs.app_base.display(),
                    error = %e,
                    "Deployment scan could not read appBase"
                );
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == DESCRIPTOR_DIR || name == CLASS_ROOT || name == LIB_DIR {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let key = fs::canonicalize(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Canonicalization failed, using lexical path");
                path.clone()
            });
            if self.deployed.lock().unwrap().contains_key(&key) {
                continue;
            }
            if !path.join(DESCRIPTOR_DIR).is_dir() {
                continue;
            }
            let context_path = if name == ROOT_APP {
                String::new()
            } else {
                format!("/{name}")
            };
            if host.find_app(&context_path).is_some() {
                debug!(
                    host = %host.name(),
                    context_path = %context_path,
                    path = %path.display(),
                    "Context path already registered - skipping directory"
                );
                continue;
            }
            match self.install(host, &name, &path, &context_path) {
                Ok(()) => {
                    self.deployed.lock().unwrap().insert(key, context_path.clone());
                    if let Some(mtime) = AppDescriptor::mtime(&path) {
                        self.timestamps.lock().unwrap().insert(context_path, mtime);
                    }
                }
                Err(e) => {
                    error!(
                        host = %host.name(),
                        path = %path.display(),
                        error = %e,
                        "Application install failed - skipping entry"
                    );
                }
            }
        }
    }

    fn install(
        &self,
        host: &Arc<Container>,
        name: &str,
        dir: &Path,
        context_path: &str,
    ) -> anyhow::Result<()> {
        let descriptor =
            AppDescriptor::load(dir).with_context(|| format!("deploying '{name}'"))?;
        let (runtime, handlers) = build_runtime(&descriptor, dir, &self.shared, None)?;
        let scope = Arc::clone(&runtime.scope);
        let app = Container::new_application(
            name,
            dir,
            context_path,
            descriptor.reloadable,
            Arc::clone(&scope),
        );
        app.app_state()
            .ok_or_else(|| anyhow!("application state missing"))?
            .swap_runtime(runtime);
        for handler in handlers {
            app.add_child(handler)?;
        }
        for listener_name in &descriptor.listeners {
            match scope.resolve_listener(listener_name) {
                Some(factory) => app.add_lifecycle_listener(factory()),
                None => warn!(
                    application = %name,
                    listener = %listener_name,
                    "No listener implementation registered - skipping"
                ),
            }
        }
        host.install_app(Arc::clone(&app))?;
        if host.state() == LifecycleState::Started {
            app.start()?;
        }
        Ok(())
    }

    /// Reload an application in place: rebuild the runtime (and, if the
    /// scope's repositories changed, the scope) from the current descriptor,
    /// then swap. A failure before the swap leaves the previous, working
    /// state serving requests.
    pub fn reload(&self, app: &Arc<Container>) -> anyhow::Result<()> {
        let st = app
            .app_state()
            .ok_or_else(|| anyhow!("'{}' is not an application container", app.name()))?;
        let descriptor = AppDescriptor::load(&st.base_path)?;
        let previous = st.runtime();
        let (runtime, handlers) =
            build_runtime(&descriptor, &st.base_path, &self.shared, Some(&previous.scope))?;
        st.swap_runtime(runtime);
        for child in app.find_children() {
            if child.handler_state().is_some() {
                if child.state() == LifecycleState::Started {
                    let _ = child.stop();
                }
                app.remove_child(child.name());
            }
        }
        let started = app.state() == LifecycleState::Started;
        for handler in handlers {
            app.add_child(Arc::clone(&handler))?;
            if started {
                handler.start()?;
            }
        }
        info!(
            application = %app.name(),
            context_path = %st.context_path,
            "Application reloaded"
        );
        Ok(())
    }

    /// Compare every deployed application's descriptor mtime against the
    /// previously recorded value; reload on change. The first observation
    /// of an application records its timestamp without reloading. The new
    /// timestamp is recorded even when the reload fails, so a broken
    /// descriptor is reported once per edit rather than every tick.
    pub fn check_reloads(&self, host: &Arc<Container>) {
        for app in host.deployed_apps() {
            let Some(st) = app.app_state() else { continue };
            if !st.reloadable {
                continue;
            }
            let Some(mtime) = AppDescriptor::mtime(&st.base_path) else {
                continue;
            };
            let context_path = st.context_path.clone();
            let changed = {
                let mut stamps = self.timestamps.lock().unwrap();
                match stamps.insert(context_path.clone(), mtime) {
                    None => false,
                    Some(previous) => previous != mtime,
                }
            };
            if changed {
                if let Err(e) = self.reload(&app) {
                    error!(
                        application = %app.name(),
                        context_path = %context_path,
                        error = %e,
                        "Application reload failed - previous state retained"
                    );
                }
            }
        }
    }

    fn spawn_daemon(&self, host: &Arc<Container>) {
        let (tx, rx) = mpsc::channel::<()>();
        *self.shutdown.lock().unwrap() = Some(tx);
        let me = self.me.clone();
        let weak_host = Arc::downgrade(host);
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name(format!("arbor-deploy-{}", host.name()))
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                let (Some(deployer), Some(host)) = (me.upgrade(), weak_host.upgrade()) else {
                    break;
                };
                deployer.scan(&host);
                deployer.check_reloads(&host);
            });
        match spawned {
            Ok(handle) => {
                *self.daemon.lock().unwrap() = Some(handle);
                debug!(host = %host.name(), interval_ms = interval.as_millis() as u64, "Deployer daemon started");
            }
            Err(e) => error!(host = %host.name(), error = %e, "Failed to spawn deployer daemon"),
        }
    }

    fn stop_daemon(&self) {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            // Interrupts a blocking recv_timeout; dropping the sender would
            // also do, the explicit send just makes the wake immediate.
            let _ = tx.send(());
        }
        if let Some(handle) = self.daemon.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("Deployer daemon panicked during shutdown");
            }
        }
    }

    fn undeploy_all(&self, host: &Arc<Container>) {
        for app in host.deployed_apps() {
            let context_path = app
                .app_state()
                .map(|s| s.context_path.clone())
                .unwrap_or_default();
            host.remove_app(&context_path);
        }
        self.deployed.lock().unwrap().clear();
        self.timestamps.lock().unwrap().clear();
        info!(host = %host.name(), "All applications undeployed");
    }
}

impl LifecycleListener for HostDeployer {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        match event.kind {
            LifecycleEventKind::Start => {
                self.scan(event.container);
                self.spawn_daemon(event.container);
            }
            LifecycleEventKind::BeforeStop => self.stop_daemon(),
            LifecycleEventKind::Stop => self.undeploy_all(event.container),
            _ => {}
        }
        Ok(())
    }
}
