mod core;
mod lifecycle;
mod runtime;

pub use core::{
    Availability, AppState, Container, ContainerKind, HandlerLease, HandlerState, HostState,
    RootState, RouterState,
};
pub use lifecycle::{
    LifecycleError, LifecycleEvent, LifecycleEventKind, LifecycleListener, LifecycleState,
};
pub use runtime::{AppRuntime, AppRuntimeBuilder, MapTarget, MiddlewareMap};
