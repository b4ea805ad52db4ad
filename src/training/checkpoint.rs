//! Atomic step-named checkpoints
//!
//! A save point is one directory named by the decimal global step, holding the
//! model record, the optimizer record, and a JSON metadata file with the scheduler,
//! scaler and loop state. Components are written into a staging directory and
//! published with a single `rename`, so no reader ever observes a partial
//! checkpoint. Retention pruning keeps the newest save points (and any explicitly
//! protected steps, e.g. the best-validation one).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scaler::GradScaler;
use super::scheduler::PlateauScheduler;
use super::trainer::LossWindow;
use crate::utils::error::{Result, ShlightError};

/// File stem of the model record (recorder appends its extension)
pub const MODEL_STEM: &str = "model";

/// File stem of the optimizer record
pub const OPTIMIZER_STEM: &str = "optimizer";

/// Metadata file name
pub const META_FILE: &str = "trainer.json";

/// Extension the record files carry on disk
const RECORD_EXT: &str = "mpk";

/// Serialized loop state stored alongside the model and optimizer records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Global step counter at save time
    pub step: u64,
    /// Epoch the run was in
    pub epoch: usize,
    /// Scheduler state (includes the current learning rate)
    pub scheduler: PlateauScheduler,
    /// Loss-scale state
    pub scaler: GradScaler,
    /// Rolling step-loss window
    pub loss_window: LossWindow,
    /// Best validation loss seen so far
    pub best_val_loss: f64,
}

/// Manages step-named checkpoint artifacts under a root directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    root: PathBuf,
    keep_last: Option<usize>,
}

impl CheckpointManager {
    /// Create a manager rooted at `root` (created lazily on first save)
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            keep_last: None,
        }
    }

    /// Keep at most `n` published checkpoints (protected steps excepted)
    pub fn with_retention(mut self, n: Option<usize>) -> Self {
        self.keep_last = n;
        self
    }

    /// Root directory of the manager
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a save point for a step
    pub fn path_for(&self, step: u64) -> PathBuf {
        self.root.join(step.to_string())
    }

    fn staging_for(&self, step: u64) -> PathBuf {
        self.root.join(format!(".staging-{step}"))
    }

    /// Create (and clear) the staging directory for a save point. The caller
    /// writes all components into the returned path, then calls [`publish`].
    ///
    /// [`publish`]: CheckpointManager::publish
    pub fn stage(&self, step: u64) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let staging = self.staging_for(step);
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir(&staging)?;
        Ok(staging)
    }

    /// Atomically publish a staged save point and prune old ones.
    ///
    /// `protect` lists steps that must survive pruning regardless of age.
    pub fn publish(&self, step: u64, protect: &[u64]) -> Result<PathBuf> {
        let staging = self.staging_for(step);
        let target = self.path_for(step);

        // Overwriting an existing save point for the same step is a re-publish
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(&staging, &target)?;
        info!("Checkpoint published: {}", target.display());

        self.prune(step, protect)?;
        Ok(target)
    }

    /// Drop a staged save point after a failed write
    pub fn discard(&self, step: u64) {
        let staging = self.staging_for(step);
        if staging.exists() {
            if let Err(e) = std::fs::remove_dir_all(&staging) {
                warn!("Failed to discard staging {}: {}", staging.display(), e);
            }
        }
    }

    /// All published save points, sorted by step ascending
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut found = Vec::new();
        if !self.root.is_dir() {
            return Ok(found);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Ok(step) = name.parse::<u64>() {
                found.push((step, path));
            }
        }
        found.sort_by_key(|(step, _)| *step);
        Ok(found)
    }

    /// The most recent save point, if any
    pub fn latest(&self) -> Result<Option<(u64, PathBuf)>> {
        Ok(self.list()?.into_iter().last())
    }

    /// Verify that every component of a save point is present.
    ///
    /// Readability of the records themselves is established by the caller when it
    /// deserializes them; a missing component fails here already.
    pub fn validate(&self, path: &Path) -> Result<()> {
        for file in [
            format!("{MODEL_STEM}.{RECORD_EXT}"),
            format!("{OPTIMIZER_STEM}.{RECORD_EXT}"),
            META_FILE.to_string(),
        ] {
            if !path.join(&file).is_file() {
                return Err(ShlightError::CorruptCheckpoint {
                    path: path.to_path_buf(),
                    detail: format!("missing component '{file}'"),
                });
            }
        }
        Ok(())
    }

    /// Read and parse the metadata component of a save point
    pub fn read_meta(&self, path: &Path) -> Result<CheckpointMeta> {
        let meta_path = path.join(META_FILE);
        let text =
            std::fs::read_to_string(&meta_path).map_err(|e| ShlightError::CorruptCheckpoint {
                path: path.to_path_buf(),
                detail: format!("unreadable {}: {}", META_FILE, e),
            })?;
        serde_json::from_str(&text).map_err(|e| ShlightError::CorruptCheckpoint {
            path: path.to_path_buf(),
            detail: format!("malformed {}: {}", META_FILE, e),
        })
    }

    fn prune(&self, newest: u64, protect: &[u64]) -> Result<()> {
        let Some(keep) = self.keep_last else {
            return Ok(());
        };

        let saved = self.list()?;
        if saved.len() <= keep {
            return Ok(());
        }

        let cut = saved.len() - keep;
        for (step, path) in saved.into_iter().take(cut) {
            // The newest save point is never pruned, whatever the retention says
            if step == newest || protect.contains(&step) {
                continue;
            }
            debug!("Pruning checkpoint {}", path.display());
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_components(dir: &Path) {
        std::fs::write(dir.join("model.mpk"), b"m").unwrap();
        std::fs::write(dir.join("optimizer.mpk"), b"o").unwrap();
        std::fs::write(dir.join(META_FILE), b"{}").unwrap();
    }

    fn publish_step(manager: &CheckpointManager, step: u64) -> PathBuf {
        let staging = manager.stage(step).unwrap();
        write_components(&staging);
        manager.publish(step, &[]).unwrap()
    }

    #[test]
    fn test_stage_and_publish() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path());

        let published = publish_step(&manager, 1000);
        assert!(published.ends_with("1000"));
        assert!(published.join("model.mpk").is_file());
        // staging is gone
        assert!(!root.path().join(".staging-1000").exists());
    }

    #[test]
    fn test_latest_picks_highest_step() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path());

        publish_step(&manager, 1000);
        publish_step(&manager, 9000);
        publish_step(&manager, 2000);

        let (step, _) = manager.latest().unwrap().unwrap();
        assert_eq!(step, 9000);
    }

    #[test]
    fn test_latest_on_empty_root() {
        let manager = CheckpointManager::new("/nonexistent/shlight-checkpoints");
        assert!(manager.latest().unwrap().is_none());
    }

    #[test]
    fn test_retention_prunes_oldest() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path()).with_retention(Some(2));

        for step in [1000, 2000, 3000, 4000] {
            publish_step(&manager, step);
        }

        let steps: Vec<u64> = manager.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![3000, 4000]);
    }

    #[test]
    fn test_protected_step_survives_pruning() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path()).with_retention(Some(1));

        let staging = manager.stage(1000).unwrap();
        write_components(&staging);
        manager.publish(1000, &[]).unwrap();

        for step in [2000, 3000] {
            let staging = manager.stage(step).unwrap();
            write_components(&staging);
            manager.publish(step, &[1000]).unwrap();
        }

        let steps: Vec<u64> = manager.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![1000, 3000]);
    }

    #[test]
    fn test_validate_detects_missing_component() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path());

        let staging = manager.stage(500).unwrap();
        std::fs::write(staging.join("model.mpk"), b"m").unwrap();
        // optimizer + meta missing
        let path = manager.publish(500, &[]).unwrap();

        assert!(matches!(
            manager.validate(&path),
            Err(ShlightError::CorruptCheckpoint { .. })
        ));
    }

    #[test]
    fn test_discard_removes_staging() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path());

        manager.stage(7).unwrap();
        manager.discard(7);
        assert!(!root.path().join(".staging-7").exists());
        assert!(manager.latest().unwrap().is_none());
    }

    #[test]
    fn test_malformed_meta_is_corrupt() {
        let root = TempDir::new().unwrap();
        let manager = CheckpointManager::new(root.path());

        let staging = manager.stage(10).unwrap();
        write_components(&staging);
        std::fs::write(staging.join(META_FILE), b"not json").unwrap();
        let path = manager.publish(10, &[]).unwrap();

        assert!(matches!(
            manager.read_meta(&path),
            Err(ShlightError::CorruptCheckpoint { .. })
        ));
    }
}
