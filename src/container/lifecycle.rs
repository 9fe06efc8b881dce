use std::fmt::{Display, Formatter};
use std::sync::Arc;

use tracing::warn;

use super::core::Container;

/// Lifecycle states a container moves through.
///
/// The only legal transitions are the forward path
/// `New → Starting → Started → Stopping → Stopped` plus a restart from
/// `Stopped` back through `Starting`. Anything else is a programming error
/// and surfaces as a [`LifecycleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::New => "NEW",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Started => "STARTED",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
        };
        write!(f, "{s}")
    }
}

/// Event kinds fired around lifecycle transitions, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    BeforeStart,
    Start,
    AfterStart,
    BeforeStop,
    Stop,
    AfterStop,
}

impl Display for LifecycleEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleEventKind::BeforeStart => "before_start",
            LifecycleEventKind::Start => "start",
            LifecycleEventKind::AfterStart => "after_start",
            LifecycleEventKind::BeforeStop => "before_stop",
            LifecycleEventKind::Stop => "stop",
            LifecycleEventKind::AfterStop => "after_stop",
        };
        write!(f, "{s}")
    }
}

/// A lifecycle notification delivered synchronously to registered listeners.
pub struct LifecycleEvent<'a> {
    /// The container the transition happened on.
    pub container: &'a Arc<Container>,
    pub kind: LifecycleEventKind,
    /// Optional event payload (unused by the built-in events).
    pub data: Option<&'a str>,
}

/// Capability implemented by lifecycle observers (deployers, app listeners).
///
/// Notification is synchronous and ordered by registration. An `Err` return
/// is logged and the cascade continues; a failing listener must not strand
/// sibling containers in a half-started state.
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()>;
}

/// Fatal misuse of the lifecycle state machine (double start, stop before
/// start). Unlike every other failure in the request path this one is
/// propagated to the caller rather than logged and swallowed.
#[derive(Debug)]
pub struct LifecycleError {
    pub container: String,
    pub operation: &'static str,
    pub state: LifecycleState,
}

impl LifecycleError {
    pub(crate) fn new(container: &Container, operation: &'static str, state: LifecycleState) -> Self {
        Self {
            container: container.name().to_string(),
            operation,
            state,
        }
    }
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "container '{}': {}() is illegal in state {}",
            self.container, self.operation, self.state
        )
    }
}

impl std::error::Error for LifecycleError {}

/// Deliver an event to every registered listener, in registration order.
///
/// Listener failures are reported and skipped so one broken observer cannot
/// abort a start/stop cascade for its siblings.
pub(crate) fn fire_event(container: &Arc<Container>, kind: LifecycleEventKind) {
    let listeners = container.listeners();
    if listeners.is_empty() {
        return;
    }
    let event = LifecycleEvent {
        container,
        kind,
        data: None,
    };
    for listener in listeners {
        if let Err(e) = listener.on_event(&event) {
            warn!(
                container = %container.name(),
                event = %kind,
                error = %e,
                "Lifecycle listener failed - continuing cascade"
            );
        }
    }
}
