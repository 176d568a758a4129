//! Errors that abort an evaluation run

use std::path::PathBuf;

use crate::analysis::mapper::MappingError;
use crate::config::ConfigError;
use crate::pipeline::checkpoint::CheckpointError;
use crate::queries::loader::LoadError;

/// Run-level failure; per-item failures never surface here
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load custom queries: {0}")]
    Queries(#[from] LoadError),

    #[error("field mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error(
        "checkpoint for run '{run_id}' at {} is corrupt: {reason}; re-run with --fresh to start over",
        path.display()
    )]
    CheckpointCorruption {
        run_id: String,
        path: PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_message_mentions_fresh() {
        let err = PipelineError::CheckpointCorruption {
            run_id: "default".to_string(),
            path: PathBuf::from("out/default/checkpoint.json"),
            reason: "EOF while parsing".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("out/default/checkpoint.json"));
        assert!(message.contains("--fresh"));
    }
}
