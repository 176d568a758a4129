//! Durable run state
//!
//! A run's progress lives in one snapshot per run id. The file store writes
//! it atomically and never lets a saved stage move backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::stage::Stage;
use crate::analysis::metrics::EvaluationResult;
use crate::analysis::pairwise::PairwiseVerdict;
use crate::queries::GeneratedQuery;
use crate::runner::collector::CollectionResult;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Checkpoint storage errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("refusing to move run '{run_id}' back from {stored} to {attempted}")]
    Regression {
        run_id: String,
        stored: Stage,
        attempted: Stage,
    },

    #[error("checkpoint serialization failed: {0}")]
    Serialize(String),

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Everything a run has produced so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub run_id: String,
    pub stage: Stage,
    #[serde(default)]
    pub queries: Vec<GeneratedQuery>,
    #[serde(default)]
    pub query_shortfall: Option<usize>,
    /// Generation batches that failed and were skipped
    #[serde(default)]
    pub failed_generation_batches: usize,
    #[serde(default)]
    pub responses: Option<CollectionResult>,
    #[serde(default)]
    pub rubrics: Vec<String>,
    #[serde(default)]
    pub comparisons: Vec<PairwiseVerdict>,
    #[serde(default)]
    pub result: Option<EvaluationResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointSnapshot {
    pub fn new(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            stage: Stage::NotStarted,
            queries: Vec::new(),
            query_shortfall: None,
            failed_generation_batches: 0,
            responses: None,
            rubrics: Vec::new(),
            comparisons: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark `stage` as completed
    pub fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Check that the recorded stage is backed by the data it implies
    pub fn validate(&self, expected_run_id: &str) -> Result<(), String> {
        if self.run_id != expected_run_id {
            return Err(format!(
                "snapshot belongs to run '{}', expected '{}'",
                self.run_id, expected_run_id
            ));
        }

        let mut ids = HashSet::new();
        for query in &self.queries {
            if !ids.insert(query.id.as_str()) {
                return Err(format!("duplicate query id '{}'", query.id));
            }
        }

        if self.stage >= Stage::ResponsesCollected {
            let responses = self
                .responses
                .as_ref()
                .ok_or_else(|| format!("stage {} but no responses recorded", self.stage))?;
            for (endpoint, list) in &responses.responses {
                if list.len() != self.queries.len() {
                    return Err(format!(
                        "endpoint '{}' has {} responses for {} queries",
                        endpoint,
                        list.len(),
                        self.queries.len()
                    ));
                }
                for (response, query) in list.iter().zip(&self.queries) {
                    if response.query_id != query.id {
                        return Err(format!(
                            "endpoint '{}' response for '{}' is out of order (expected '{}')",
                            endpoint, response.query_id, query.id
                        ));
                    }
                }
            }
        }

        if self.stage >= Stage::RubricsGenerated && self.rubrics.is_empty() {
            return Err(format!("stage {} but no rubrics recorded", self.stage));
        }

        if self.stage >= Stage::EvaluationComplete {
            if self.result.is_none() {
                return Err(format!("stage {} but no result recorded", self.stage));
            }
            if let Some(verdict) = self.comparisons.iter().find(|v| !ids.contains(v.query_id.as_str())) {
                return Err(format!("verdict for unknown query '{}'", verdict.query_id));
            }
        }

        Ok(())
    }
}

/// Persistence for run snapshots
pub trait CheckpointStore: Send + Sync {
    /// Latest snapshot for the run, if any
    fn load(&self, run_id: &str) -> Result<Option<CheckpointSnapshot>, CheckpointError>;

    /// Persist a snapshot; its stage must not be lower than the stored one
    fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError>;

    /// Forget the run's snapshot
    fn clear(&self, run_id: &str) -> Result<(), CheckpointError>;

    /// Where the run's snapshot lives, for error messages
    fn location(&self, run_id: &str) -> PathBuf {
        PathBuf::from(format!("<memory>/{}", run_id))
    }
}

/// Read a checkpoint file directly
pub fn read_snapshot(path: &Path) -> Result<CheckpointSnapshot, CheckpointError> {
    let content = fs::read_to_string(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| CheckpointError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Stores `<root>/<run_id>/checkpoint.json`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(CHECKPOINT_FILE)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, run_id: &str) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        let path = self.path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        read_snapshot(&path).map(Some)
    }

    fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError> {
        if let Some(stored) = self.load(&snapshot.run_id)? {
            if stored.stage > snapshot.stage {
                return Err(CheckpointError::Regression {
                    run_id: snapshot.run_id.clone(),
                    stored: stored.stage,
                    attempted: snapshot.stage,
                });
            }
        }

        let dir = self.run_dir(&snapshot.run_id);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CheckpointError::Io { path, source }
        };
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| CheckpointError::Serialize(e.to_string()))?;

        // Write beside the target, then rename over it
        let path = self.path(&snapshot.run_id);
        let tmp = dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        fs::write(&tmp, content).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;

        tracing::debug!("Saved checkpoint for run {} at stage {}", snapshot.run_id, snapshot.stage);
        Ok(())
    }

    fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        let path = self.path(run_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Cleared checkpoint {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }

    fn location(&self, run_id: &str) -> PathBuf {
        self.path(run_id)
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    snapshots: Mutex<HashMap<String, CheckpointSnapshot>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a snapshot without the regression check
    pub fn insert(&self, snapshot: CheckpointSnapshot) -> Result<(), CheckpointError> {
        self.lock()?.insert(snapshot.run_id.clone(), snapshot);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CheckpointSnapshot>>, CheckpointError> {
        self.snapshots
            .lock()
            .map_err(|_| CheckpointError::Unavailable("snapshot lock poisoned".to_string()))
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, run_id: &str) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        Ok(self.lock()?.get(run_id).cloned())
    }

    fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError> {
        let mut snapshots = self.lock()?;
        if let Some(stored) = snapshots.get(&snapshot.run_id) {
            if stored.stage > snapshot.stage {
                return Err(CheckpointError::Regression {
                    run_id: snapshot.run_id.clone(),
                    stored: stored.stage,
                    attempted: snapshot.stage,
                });
            }
        }
        snapshots.insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.lock()?.remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::Provenance;

    fn snapshot_at(stage: Stage) -> CheckpointSnapshot {
        let mut snapshot = CheckpointSnapshot::new("run-1");
        snapshot.queries = vec![GeneratedQuery::new("q0001", "hello", Provenance::Custom)];
        snapshot.advance(stage);
        snapshot
    }

    #[test]
    fn test_file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        assert!(store.load("run-1").unwrap().is_none());

        let snapshot = snapshot_at(Stage::QueriesGenerated);
        store.save(&snapshot).unwrap();
        assert!(store.path("run-1").exists());
        assert!(!store.run_dir("run-1").join("checkpoint.json.tmp").exists());

        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        store.clear("run-1").unwrap();
        assert!(store.load("run-1").unwrap().is_none());
        store.clear("run-1").unwrap();
    }

    #[test]
    fn test_file_store_refuses_regression() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut snapshot = snapshot_at(Stage::QueriesGenerated);
        snapshot.responses = Some(CollectionResult::default());
        snapshot.advance(Stage::ResponsesCollected);
        store.save(&snapshot).unwrap();

        let err = store.save(&snapshot_at(Stage::QueriesGenerated)).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Regression {
                stored: Stage::ResponsesCollected,
                attempted: Stage::QueriesGenerated,
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&snapshot_at(Stage::QueriesGenerated)).unwrap();

        let path = store.path("run-1");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, &content[..content.len() / 2]).unwrap();

        assert!(matches!(store.load("run-1"), Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn test_validate_requires_stage_data() {
        assert!(snapshot_at(Stage::QueriesGenerated).validate("run-1").is_ok());
        assert!(snapshot_at(Stage::QueriesGenerated).validate("other").is_err());
        assert!(snapshot_at(Stage::ResponsesCollected).validate("run-1").is_err());
    }

    #[test]
    fn test_memory_store_refuses_regression() {
        let store = InMemoryCheckpointStore::new();
        store.save(&snapshot_at(Stage::RubricsGenerated)).unwrap();
        assert!(store.save(&snapshot_at(Stage::QueriesGenerated)).is_err());
        store.clear("run-1").unwrap();
        store.save(&snapshot_at(Stage::QueriesGenerated)).unwrap();
    }
}
