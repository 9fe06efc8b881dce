use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use arc_swap::ArcSwap;
use tracing::{debug, info};

use super::lifecycle::{
    fire_event, LifecycleError, LifecycleEventKind, LifecycleListener, LifecycleState,
};
use super::runtime::AppRuntime;
use crate::deploy::scope::IsolationScope;
use crate::handler::{HandlerConfig, HttpHandler};
use crate::pipeline::Pipeline;

/// A node in the hierarchical request-routing tree.
///
/// One type with a kind tag covers the six node kinds
/// (Root/Group/Router/Host/Application/Handler); kind-specific state lives
/// in the corresponding [`ContainerKind`] variant. Children own their
/// subtrees; the parent pointer is a weak back-reference, never a second
/// ownership path.
///
/// Invariant: a container's parent pointer and its parent's children list
/// agree at all times. Both are updated under the parent's children lock.
pub struct Container {
    name: String,
    kind: ContainerKind,
    parent: RwLock<Weak<Container>>,
    children: RwLock<Vec<Arc<Container>>>,
    state: Mutex<LifecycleState>,
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    pipeline: Pipeline,
}

/// Kind tag plus kind-specific state for a [`Container`].
pub enum ContainerKind {
    Root(RootState),
    Group,
    Router(RouterState),
    Host(HostState),
    Application(AppState),
    Handler(HandlerState),
}

impl ContainerKind {
    pub fn label(&self) -> &'static str {
        match self {
            ContainerKind::Root(_) => "root",
            ContainerKind::Group => "group",
            ContainerKind::Router(_) => "router",
            ContainerKind::Host(_) => "host",
            ContainerKind::Application(_) => "application",
            ContainerKind::Handler(_) => "handler",
        }
    }
}

/// Top-of-tree state: where the shutdown monitor listens and what it says.
pub struct RootState {
    pub shutdown_port: u16,
    pub shutdown_command: String,
}

/// Router-level state; children are Hosts.
pub struct RouterState {
    /// Host substituted when a request carries no virtual-host name.
    pub default_host: String,
}

/// Host-level state; children are Applications.
pub struct HostState {
    /// Directory scanned by the hot-deploy manager.
    pub app_base: PathBuf,
    /// contextPath → Application. Kept consistent with the Host's children:
    /// an Application is always both a child and a registry entry.
    registry: RwLock<HashMap<String, Arc<Container>>>,
}

/// Application-level state; children are Handlers.
pub struct AppState {
    /// Physical deployment root.
    pub base_path: PathBuf,
    /// URL prefix; the empty string denotes the root application.
    pub context_path: String,
    pub reloadable: bool,
    available: AtomicBool,
    /// Swapped wholesale on reload; in-flight requests keep the Arc they
    /// loaded at admission.
    runtime: ArcSwap<AppRuntime>,
}

/// Handler unavailability marker.
///
/// An expired `Until` clears back to `Available` on the next check;
/// `Forever` makes the handler eligible for unload once its in-flight
/// count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Until(SystemTime),
    Forever,
}

/// Leaf state: the unit that actually produces responses.
pub struct HandlerState {
    /// Name resolved against the application's isolation scope.
    pub impl_ref: String,
    pub init_params: HashMap<String, String>,
    availability: Mutex<Availability>,
    inflight: AtomicUsize,
    instance: Mutex<Option<Arc<dyn HttpHandler>>>,
}

/// Scoped allocation of a handler instance.
///
/// Allocation increments the handler's in-flight counter; dropping the
/// lease decrements it and, if the handler is by then permanently
/// unavailable and idle, unloads the instance. Pairing is guaranteed by
/// scope, not by best-effort cleanup on each error path.
pub struct HandlerLease {
    container: Arc<Container>,
    pub instance: Arc<dyn HttpHandler>,
}

impl Drop for HandlerLease {
    fn drop(&mut self) {
        if let ContainerKind::Handler(hs) = &self.container.kind {
            let remaining = hs.inflight.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0
                && matches!(*hs.availability.lock().unwrap(), Availability::Forever)
            {
                self.container.unload();
            }
        }
    }
}

impl Container {
    fn new(name: &str, kind: ContainerKind) -> Arc<Self> {
        let pipeline = Pipeline::for_kind(&kind);
        Arc::new(Self {
            name: name.to_string(),
            kind,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            state: Mutex::new(LifecycleState::New),
            listeners: RwLock::new(Vec::new()),
            pipeline,
        })
    }

    pub fn new_root(name: &str, shutdown_port: u16, shutdown_command: &str) -> Arc<Self> {
        Self::new(
            name,
            ContainerKind::Root(RootState {
                shutdown_port,
                shutdown_command: shutdown_command.to_string(),
            }),
        )
    }

    pub fn new_group(name: &str) -> Arc<Self> {
        Self::new(name, ContainerKind::Group)
    }

    pub fn new_router(name: &str, default_host: &str) -> Arc<Self> {
        Self::new(
            name,
            ContainerKind::Router(RouterState {
                default_host: default_host.to_string(),
            }),
        )
    }

    pub fn new_host(name: &str, app_base: impl Into<PathBuf>) -> Arc<Self> {
        Self::new(
            name,
            ContainerKind::Host(HostState {
                app_base: app_base.into(),
                registry: RwLock::new(HashMap::new()),
            }),
        )
    }

    pub fn new_application(
        name: &str,
        base_path: impl Into<PathBuf>,
        context_path: &str,
        reloadable: bool,
        scope: Arc<IsolationScope>,
    ) -> Arc<Self> {
        Self::new(
            name,
            ContainerKind::Application(AppState {
                base_path: base_path.into(),
                context_path: context_path.to_string(),
                reloadable,
                available: AtomicBool::new(true),
                runtime: ArcSwap::from_pointee(AppRuntime::empty(scope)),
            }),
        )
    }

    pub fn new_handler(
        name: &str,
        impl_ref: &str,
        init_params: HashMap<String, String>,
    ) -> Arc<Self> {
        Self::new(
            name,
            ContainerKind::Handler(HandlerState {
                impl_ref: impl_ref.to_string(),
                init_params,
                availability: Mutex::new(Availability::Available),
                inflight: AtomicUsize::new(0),
                instance: Mutex::new(None),
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ContainerKind {
        &self.kind
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    pub fn parent(&self) -> Option<Arc<Container>> {
        self.parent.read().unwrap().upgrade()
    }

    // ---- tree mutation ----------------------------------------------------

    /// Link a child under this container. Names must be unique among
    /// siblings. The child's parent pointer and this container's children
    /// list are updated under one lock so a concurrent lookup never sees a
    /// partially-linked node.
    pub fn add_child(self: &Arc<Self>, child: Arc<Container>) -> anyhow::Result<()> {
        let mut children = self.children.write().unwrap();
        if children.iter().any(|c| c.name == child.name) {
            return Err(anyhow!(
                "container '{}' already has a child named '{}'",
                self.name,
                child.name
            ));
        }
        *child.parent.write().unwrap() = Arc::downgrade(self);
        children.push(Arc::clone(&child));
        debug!(
            parent = %self.name,
            child = %child.name,
            kind = child.kind.label(),
            "Child attached"
        );
        Ok(())
    }

    /// Unlink a child by name, returning it if present.
    pub fn remove_child(self: &Arc<Self>, name: &str) -> Option<Arc<Container>> {
        let mut children = self.children.write().unwrap();
        let idx = children.iter().position(|c| c.name == name)?;
        let child = children.remove(idx);
        *child.parent.write().unwrap() = Weak::new();
        debug!(parent = %self.name, child = %name, "Child detached");
        Some(child)
    }

    pub fn find_child(&self, name: &str) -> Option<Arc<Container>> {
        self.children
            .read()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .map(Arc::clone)
    }

    /// Snapshot of the children in insertion order.
    pub fn find_children(&self) -> Vec<Arc<Container>> {
        self.children.read().unwrap().clone()
    }

    pub fn add_lifecycle_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn remove_lifecycle_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        self.listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners.read().unwrap().clone()
    }

    // ---- lifecycle --------------------------------------------------------

    /// Start this container and, recursively, every child in insertion
    /// order. Fires `BEFORE_START`, transitions, fires `START`, starts the
    /// children, then fires `AFTER_START`.
    ///
    /// Starting a container that is neither `NEW` nor `STOPPED` is a
    /// programming error and fails fatally without touching its state.
    pub fn start(self: &Arc<Self>) -> Result<(), LifecycleError> {
        {
            let state = self.state.lock().unwrap();
            if !matches!(*state, LifecycleState::New | LifecycleState::Stopped) {
                return Err(LifecycleError::new(self, "start", *state));
            }
        }
        fire_event(self, LifecycleEventKind::BeforeStart);
        *self.state.lock().unwrap() = LifecycleState::Starting;
        fire_event(self, LifecycleEventKind::Start);

        for child in self.find_children() {
            child.start()?;
        }

        *self.state.lock().unwrap() = LifecycleState::Started;
        fire_event(self, LifecycleEventKind::AfterStart);
        info!(container = %self.name, kind = self.kind.label(), "Started");
        Ok(())
    }

    /// Stop this container: children first (reverse insertion order), then
    /// the container itself. Fires `BEFORE_STOP`, transitions, stops the
    /// children, fires `STOP`, transitions to `STOPPED`, fires `AFTER_STOP`.
    ///
    /// Stopping a container that is not `STARTED` fails fatally.
    pub fn stop(self: &Arc<Self>) -> Result<(), LifecycleError> {
        {
            let state = self.state.lock().unwrap();
            if *state != LifecycleState::Started {
                return Err(LifecycleError::new(self, "stop", *state));
            }
        }
        fire_event(self, LifecycleEventKind::BeforeStop);
        *self.state.lock().unwrap() = LifecycleState::Stopping;

        for child in self.find_children().into_iter().rev() {
            child.stop()?;
        }

        fire_event(self, LifecycleEventKind::Stop);
        *self.state.lock().unwrap() = LifecycleState::Stopped;
        fire_event(self, LifecycleEventKind::AfterStop);
        info!(container = %self.name, kind = self.kind.label(), "Stopped");
        Ok(())
    }

    // ---- kind accessors ---------------------------------------------------

    pub fn root_state(&self) -> Option<&RootState> {
        match &self.kind {
            ContainerKind::Root(s) => Some(s),
            _ => None,
        }
    }

    pub fn router_state(&self) -> Option<&RouterState> {
        match &self.kind {
            ContainerKind::Router(s) => Some(s),
            _ => None,
        }
    }

    pub fn host_state(&self) -> Option<&HostState> {
        match &self.kind {
            ContainerKind::Host(s) => Some(s),
            _ => None,
        }
    }

    pub fn app_state(&self) -> Option<&AppState> {
        match &self.kind {
            ContainerKind::Application(s) => Some(s),
            _ => None,
        }
    }

    pub fn handler_state(&self) -> Option<&HandlerState> {
        match &self.kind {
            ContainerKind::Handler(s) => Some(s),
            _ => None,
        }
    }

    // ---- host registry ----------------------------------------------------

    /// Install an Application under this Host: linked as a child first, then
    /// published in the contextPath registry. Mappers resolve through the
    /// registry only, so an application is never observed half-linked.
    pub fn install_app(self: &Arc<Self>, app: Arc<Container>) -> anyhow::Result<()> {
        let hs = self
            .host_state()
            .ok_or_else(|| anyhow!("'{}' is not a host container", self.name))?;
        let context_path = app
            .app_state()
            .ok_or_else(|| anyhow!("'{}' is not an application container", app.name))?
            .context_path
            .clone();
        if hs.registry.read().unwrap().contains_key(&context_path) {
            return Err(anyhow!(
                "host '{}' already serves context path '{}'",
                self.name,
                context_path
            ));
        }
        self.add_child(Arc::clone(&app))?;
        hs.registry.write().unwrap().insert(context_path.clone(), app);
        info!(host = %self.name, context_path = %context_path, "Application installed");
        Ok(())
    }

    /// Remove an Application: unpublished from the registry first, then
    /// unlinked from the children.
    pub fn remove_app(self: &Arc<Self>, context_path: &str) -> Option<Arc<Container>> {
        let hs = self.host_state()?;
        let app = hs.registry.write().unwrap().remove(context_path)?;
        self.remove_child(app.name());
        info!(host = %self.name, context_path = %context_path, "Application removed");
        Some(app)
    }

    pub fn find_app(&self, context_path: &str) -> Option<Arc<Container>> {
        self.host_state()?
            .registry
            .read()
            .unwrap()
            .get(context_path)
            .map(Arc::clone)
    }

    pub fn deployed_apps(&self) -> Vec<Arc<Container>> {
        match self.host_state() {
            Some(hs) => hs.registry.read().unwrap().values().map(Arc::clone).collect(),
            None => Vec::new(),
        }
    }

    // ---- handler allocation -----------------------------------------------

    /// Acquire the handler instance, creating it lazily on first use.
    ///
    /// The instance is resolved through the given isolation scope, `init()`
    /// is called once, and the in-flight counter is incremented for the
    /// lifetime of the returned lease.
    pub fn allocate(
        self: &Arc<Self>,
        scope: &IsolationScope,
        base_path: Option<&Path>,
    ) -> anyhow::Result<HandlerLease> {
        let hs = self
            .handler_state()
            .ok_or_else(|| anyhow!("'{}' is not a handler container", self.name))?;
        let instance = {
            let mut guard = hs.instance.lock().unwrap();
            if guard.is_none() {
                let factory = scope.resolve_handler(&hs.impl_ref).ok_or_else(|| {
                    anyhow!("no handler implementation registered for '{}'", hs.impl_ref)
                })?;
                let instance: Arc<dyn HttpHandler> = Arc::from(factory());
                let config = HandlerConfig {
                    name: self.name.clone(),
                    init_params: hs.init_params.clone(),
                    base_path: base_path.map(Path::to_path_buf),
                };
                instance.init(&config)?;
                debug!(handler = %self.name, impl_ref = %hs.impl_ref, "Handler instance created");
                *guard = Some(instance);
            }
            Arc::clone(guard.as_ref().unwrap())
        };
        hs.inflight.fetch_add(1, Ordering::AcqRel);
        Ok(HandlerLease {
            container: Arc::clone(self),
            instance,
        })
    }

    /// Release the current instance so the next allocation re-creates it.
    pub fn unload(&self) {
        if let ContainerKind::Handler(hs) = &self.kind {
            if let Some(instance) = hs.instance.lock().unwrap().take() {
                instance.destroy();
                info!(handler = %self.name, "Handler instance unloaded");
            }
        }
    }

    /// Mark the handler unavailable: for the given duration, or permanently
    /// when `duration` is `None`.
    pub fn mark_unavailable(&self, duration: Option<Duration>) {
        if let ContainerKind::Handler(hs) = &self.kind {
            let mut availability = hs.availability.lock().unwrap();
            *availability = match duration {
                Some(d) => Availability::Until(SystemTime::now() + d),
                None => Availability::Forever,
            };
            info!(handler = %self.name, availability = ?*availability, "Handler marked unavailable");
        }
    }

    /// Current availability. An expired `Until` marker is cleared here, so
    /// the first check past the retry instant sees `Available` again.
    pub fn availability(&self) -> Availability {
        match &self.kind {
            ContainerKind::Handler(hs) => {
                let mut availability = hs.availability.lock().unwrap();
                if let Availability::Until(t) = *availability {
                    if t <= SystemTime::now() {
                        *availability = Availability::Available;
                    }
                }
                *availability
            }
            _ => Availability::Available,
        }
    }

    pub fn inflight(&self) -> usize {
        match &self.kind {
            ContainerKind::Handler(hs) => hs.inflight.load(Ordering::Acquire),
            _ => 0,
        }
    }

    /// Whether a handler instance currently exists (observable for tests
    /// asserting unload behaviour).
    pub fn is_loaded(&self) -> bool {
        match &self.kind {
            ContainerKind::Handler(hs) => hs.instance.lock().unwrap().is_some(),
            _ => false,
        }
    }
}

impl AppState {
    pub fn runtime(&self) -> Arc<AppRuntime> {
        self.runtime.load_full()
    }

    /// Atomically publish a rebuilt runtime. In-flight requests keep using
    /// the runtime they loaded at admission until they drop it.
    pub fn swap_runtime(&self, runtime: AppRuntime) {
        self.runtime.store(Arc::new(runtime));
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }
}
