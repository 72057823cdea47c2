use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;
use machine_learning::{optimization::SgdState, params::StateDict};
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const BEST_FILE: &str = "model_best.json";

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The next epoch to run.
    pub epoch: usize,
    pub global_step: u64,
    pub model: StateDict,
    pub teacher: StateDict,
    /// The stabilized average as scored at the end of the epoch.
    pub stabilized: StateDict,
    pub best_error: f32,
    pub best_test: Option<f32>,
    pub optimizer: SgdState,
    /// The last epoch whose learning rate decay has been applied.
    pub lr_decayed_at: Option<usize>,
}

impl Checkpoint {
    /// Reads a checkpoint from `path`.
    ///
    /// # Returns
    /// `TrainErr::MissingCheckpoint` if there's no file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TrainErr::MissingCheckpoint {
                path: path.to_path_buf(),
            });
        }

        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Writes the latest checkpoint every epoch and keeps a copy of the best one.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    dir: PathBuf,
}

impl CheckpointPolicy {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_FILE)
    }

    /// Persists `checkpoint`, copying it over the best one when `is_best`.
    pub fn save(&self, checkpoint: &Checkpoint, is_best: bool) -> Result<()> {
        let latest = self.latest_path();
        checkpoint.save(&latest)?;

        if is_best {
            fs::copy(&latest, self.best_path())?;
            info!(epoch = checkpoint.epoch, best_error = checkpoint.best_error; "new best checkpoint");
        }

        Ok(())
    }
}
