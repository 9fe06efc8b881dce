mod checkpoints;
mod core;

pub use checkpoints::{
    ApplicationCheckpoint, HandlerCheckpoint, HostCheckpoint, RouterCheckpoint,
};
pub use core::{Checkpoint, CheckpointChain, Pipeline};
