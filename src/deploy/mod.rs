mod core;
mod descriptor;
pub mod scope;

pub use core::{HostDeployer, DEFAULT_SCAN_INTERVAL, ROOT_APP};
pub use descriptor::{
    build_runtime, AppDescriptor, HandlerDecl, MappingDecl, MiddlewareDecl, MiddlewareMapDecl,
    DESCRIPTOR_FILE,
};
pub use scope::{
    HandlerFactory, IsolationScope, ListenerFactory, MiddlewareFactory, ScopeGuard, SharedScope,
    CLASS_ROOT, DESCRIPTOR_DIR, LIB_DIR,
};
