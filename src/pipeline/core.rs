use std::sync::{Arc, RwLock};

use anyhow::anyhow;

use super::checkpoints::{
    ApplicationCheckpoint, HandlerCheckpoint, HostCheckpoint, NonRoutingCheckpoint,
    RouterCheckpoint,
};
use crate::container::{Container, ContainerKind};
use crate::server::{Request, Response};

/// A unit of request processing bound to one container.
///
/// A checkpoint runs pre/post logic around delegation to the rest of its
/// pipeline through the explicit [`CheckpointChain`] continuation — a
/// chain-of-responsibility whose ordering and early termination are visible
/// and testable, not implicit recursion.
pub trait Checkpoint: Send + Sync {
    fn invoke(
        &self,
        container: &Arc<Container>,
        request: &mut Request,
        response: &mut Response,
        chain: &mut CheckpointChain<'_>,
    ) -> anyhow::Result<()>;
}

/// Continuation carrying the position within one pipeline's ordered
/// checkpoint sequence: the extra checkpoints first, the kind's basic
/// checkpoint last.
pub struct CheckpointChain<'a> {
    container: &'a Arc<Container>,
    checkpoints: &'a [Arc<dyn Checkpoint>],
    basic: &'a Arc<dyn Checkpoint>,
    position: usize,
}

impl CheckpointChain<'_> {
    pub fn container(&self) -> &Arc<Container> {
        self.container
    }

    /// Delegate to the next checkpoint in the sequence.
    pub fn invoke_next(
        &mut self,
        request: &mut Request,
        response: &mut Response,
    ) -> anyhow::Result<()> {
        if self.position < self.checkpoints.len() {
            let checkpoint = Arc::clone(&self.checkpoints[self.position]);
            self.position += 1;
            checkpoint.invoke(self.container, request, response, self)
        } else if self.position == self.checkpoints.len() {
            self.position += 1;
            let basic = Arc::clone(self.basic);
            basic.invoke(self.container, request, response, self)
        } else {
            Err(anyhow!("checkpoint sequence exhausted"))
        }
    }
}

/// Per-container checkpoint pipeline.
///
/// The basic checkpoint is fixed by the container kind; additional
/// checkpoints run ahead of it in registration order.
pub struct Pipeline {
    basic: Arc<dyn Checkpoint>,
    extras: RwLock<Vec<Arc<dyn Checkpoint>>>,
}

impl Pipeline {
    pub(crate) fn for_kind(kind: &ContainerKind) -> Self {
        let basic: Arc<dyn Checkpoint> = match kind {
            ContainerKind::Router(_) => Arc::new(RouterCheckpoint),
            ContainerKind::Host(_) => Arc::new(HostCheckpoint),
            ContainerKind::Application(_) => Arc::new(ApplicationCheckpoint),
            ContainerKind::Handler(_) => Arc::new(HandlerCheckpoint),
            ContainerKind::Root(_) | ContainerKind::Group => Arc::new(NonRoutingCheckpoint),
        };
        Self {
            basic,
            extras: RwLock::new(Vec::new()),
        }
    }

    pub fn add_checkpoint(&self, checkpoint: Arc<dyn Checkpoint>) {
        self.extras.write().unwrap().push(checkpoint);
    }

    /// Run this container's checkpoint sequence for one request.
    pub fn invoke(
        &self,
        container: &Arc<Container>,
        request: &mut Request,
        response: &mut Response,
    ) -> anyhow::Result<()> {
        let extras = self.extras.read().unwrap().clone();
        let mut chain = CheckpointChain {
            container,
            checkpoints: &extras,
            basic: &self.basic,
            position: 0,
        };
        chain.invoke_next(request, response)
    }
}
