//! Checkpoint save and restore.
//!
//! Layout under the checkpoint directory:
//!
//! ```text
//! checkpoints/
//!   latest              # name of the most recent checkpoint directory
//!   step_2000/
//!     metadata.json
//!     model/            # written by the model's `Checkpoint::save`
//!     optimizer/        # only when optimizer state is saved
//! ```
//!
//! Checkpoints are never deleted.

use std::fs;
use std::path::{Path, PathBuf};

use ddsp_core::{Checkpoint, DdspError, Result};
use serde::{Deserialize, Serialize};

use crate::TrainingState;

const METADATA_FILE: &str = "metadata.json";
const LATEST_MARKER: &str = "latest";
const MODEL_DIR: &str = "model";
const OPTIMIZER_DIR: &str = "optimizer";

/// Training state metadata stored next to each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Global step at save time.
    pub step: usize,
    /// Epoch at save time.
    pub epoch: usize,
    /// Best validation loss seen so far, if any was finite.
    pub best_loss: Option<f64>,
    /// Whether optimizer state was saved.
    pub has_optimizer: bool,
    /// Timestamp (RFC 3339).
    pub timestamp: String,
}

impl CheckpointMetadata {
    /// Metadata for the given training state.
    pub fn new(state: &TrainingState) -> Self {
        Self {
            step: state.global_step,
            epoch: state.epoch,
            best_loss: state.best_loss.is_finite().then_some(state.best_loss),
            has_optimizer: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Mark whether optimizer state is included.
    pub fn with_optimizer(mut self, has_optimizer: bool) -> Self {
        self.has_optimizer = has_optimizer;
        self
    }

    /// Read metadata from a checkpoint directory.
    pub fn load(checkpoint_path: &Path) -> Result<Self> {
        let path = checkpoint_path.join(METADATA_FILE);
        let json = fs::read_to_string(&path).map_err(|e| {
            DdspError::Checkpoint(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| DdspError::Checkpoint(format!("Failed to parse metadata: {}", e)))
    }
}

/// Checkpoint manager for saving and restoring training state.
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    /// Create a new checkpoint manager, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir).map_err(|e| {
            DdspError::Checkpoint(format!("Failed to create checkpoint directory: {}", e))
        })?;

        Ok(Self { checkpoint_dir })
    }

    /// Save model and optional optimizer state into `step_<postfix>`.
    ///
    /// Returns the checkpoint directory.
    pub fn save<M, O>(
        &self,
        model: &M,
        optimizer: Option<&O>,
        postfix: &str,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf>
    where
        M: Checkpoint,
        O: Checkpoint,
    {
        let step_dir = self.checkpoint_dir.join(format!("step_{}", postfix));

        let model_dir = step_dir.join(MODEL_DIR);
        fs::create_dir_all(&model_dir).map_err(|e| {
            DdspError::Checkpoint(format!("Failed to create checkpoint directory: {}", e))
        })?;
        model.save(&model_dir)?;

        if let Some(optimizer) = optimizer {
            let optimizer_dir = step_dir.join(OPTIMIZER_DIR);
            fs::create_dir_all(&optimizer_dir)?;
            optimizer.save(&optimizer_dir)?;
        }

        let metadata = metadata.clone().with_optimizer(optimizer.is_some());
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| DdspError::Checkpoint(format!("Failed to serialize metadata: {}", e)))?;
        fs::write(step_dir.join(METADATA_FILE), json)?;

        // Plain marker file instead of a symlink
        fs::write(
            self.checkpoint_dir.join(LATEST_MARKER),
            format!("step_{}", postfix),
        )?;

        tracing::info!(
            "Saved checkpoint at step {} to {:?}",
            metadata.step,
            step_dir
        );

        Ok(step_dir)
    }

    /// Directory of the most recent checkpoint, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        let marker = self.checkpoint_dir.join(LATEST_MARKER);
        if !marker.exists() {
            return Ok(None);
        }

        let name = fs::read_to_string(&marker)?;
        let path = self.checkpoint_dir.join(name.trim());
        if path.is_dir() {
            Ok(Some(path))
        } else {
            tracing::warn!("Latest marker points to missing checkpoint {:?}", path);
            Ok(None)
        }
    }

    /// Restore the most recent checkpoint into `model` and, when it was
    /// saved with one, `optimizer`.
    ///
    /// Returns `None` when there is nothing to restore.
    pub fn restore<M, O>(
        &self,
        model: &mut M,
        optimizer: Option<&mut O>,
    ) -> Result<Option<CheckpointMetadata>>
    where
        M: Checkpoint,
        O: Checkpoint,
    {
        let Some(path) = self.latest()? else {
            return Ok(None);
        };

        let metadata = CheckpointMetadata::load(&path)?;
        model.load(&path.join(MODEL_DIR))?;

        match optimizer {
            Some(optimizer) if metadata.has_optimizer => {
                optimizer.load(&path.join(OPTIMIZER_DIR))?;
            }
            Some(_) => tracing::debug!("Checkpoint {:?} has no optimizer state", path),
            None => {}
        }

        tracing::info!(
            "Loaded checkpoint from step {} ({:?})",
            metadata.step,
            path
        );

        Ok(Some(metadata))
    }

    /// List all checkpoints with a numeric step, oldest first.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut checkpoints: Vec<(usize, PathBuf)> = fs::read_dir(&self.checkpoint_dir)
            .map_err(|e| {
                DdspError::Checkpoint(format!("Failed to read checkpoint directory: {}", e))
            })?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let step = name.strip_prefix("step_")?.parse::<usize>().ok()?;
                Some((step, entry.path()))
            })
            .collect();

        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Weights(Vec<u8>);

    impl Checkpoint for Weights {
        fn save(&self, dir: &Path) -> Result<()> {
            fs::write(dir.join("weights.bin"), &self.0)?;
            Ok(())
        }

        fn load(&mut self, dir: &Path) -> Result<()> {
            self.0 = fs::read(dir.join("weights.bin"))?;
            Ok(())
        }
    }

    fn state(step: usize) -> TrainingState {
        TrainingState::new(step)
    }

    #[test]
    fn test_metadata_skips_infinite_best() {
        let meta = CheckpointMetadata::new(&state(100));
        assert_eq!(meta.step, 100);
        assert_eq!(meta.best_loss, None);

        let mut s = state(200);
        s.record_validation(0.25);
        assert_eq!(CheckpointMetadata::new(&s).best_loss, Some(0.25));
    }

    #[test]
    fn test_save_and_restore_latest() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path()).unwrap();

        for step in [10, 20, 30] {
            let model = Weights(vec![step as u8]);
            let meta = CheckpointMetadata::new(&state(step));
            manager
                .save(&model, None::<&Weights>, &step.to_string(), &meta)
                .unwrap();
        }

        let mut model = Weights::default();
        let meta = manager
            .restore(&mut model, None::<&mut Weights>)
            .unwrap()
            .unwrap();
        assert_eq!(meta.step, 30);
        assert_eq!(model.0, vec![30]);
        assert!(!meta.has_optimizer);
    }

    #[test]
    fn test_optimizer_state_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path()).unwrap();

        let meta = CheckpointMetadata::new(&state(5));
        let path = manager
            .save(&Weights(vec![1]), Some(&Weights(vec![9, 9])), "5", &meta)
            .unwrap();
        assert!(path.join("optimizer").join("weights.bin").exists());

        let mut model = Weights::default();
        let mut optimizer = Weights::default();
        let meta = manager
            .restore(&mut model, Some(&mut optimizer))
            .unwrap()
            .unwrap();
        assert!(meta.has_optimizer);
        assert_eq!(optimizer.0, vec![9, 9]);
    }

    #[test]
    fn test_nothing_to_restore() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path().join("checkpoints")).unwrap();
        let mut model = Weights::default();
        assert!(manager
            .restore(&mut model, None::<&mut Weights>)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_checkpoints_are_kept() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp_dir.path()).unwrap();

        for step in [50, 10, 40, 20, 30, 60] {
            let meta = CheckpointMetadata::new(&state(step));
            manager
                .save(&Weights(vec![]), None::<&Weights>, &step.to_string(), &meta)
                .unwrap();
        }

        let steps: Vec<usize> = manager.list().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![10, 20, 30, 40, 50, 60]);
    }
}
