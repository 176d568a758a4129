//! Stage machine, checkpoints and the orchestrator

pub mod checkpoint;
pub mod orchestrator;
pub mod stage;

pub use checkpoint::{
    read_snapshot, CheckpointError, CheckpointSnapshot, CheckpointStore, FileCheckpointStore,
    InMemoryCheckpointStore, CHECKPOINT_FILE,
};
pub use orchestrator::{reduce, Pipeline, PipelineBuilder, PipelineOutcome};
pub use stage::{next_stage, Stage, StagePlan};
