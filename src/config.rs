use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{Result, TrainErr, data::SplitSizes, meta_step::MetaTarget};

pub const CONFIG_FILE: &str = "config.json";

/// Semi-supervised meta-learned facial landmark regression.
#[derive(Debug, Clone, PartialEq, Parser, Serialize, Deserialize)]
#[command(version, about)]
pub struct TrainConfig {
    /// Number of total epochs to run.
    #[arg(long, default_value_t = 150)]
    pub epochs: usize,

    /// Manual epoch number, useful on restarts.
    #[arg(long, default_value_t = 0)]
    pub start_epoch: usize,

    /// Train batch size.
    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    /// Initial learning rate.
    #[arg(long, alias = "learning-rate", default_value_t = 3e-2)]
    pub lr: f32,

    /// Path to the checkpoint to resume from.
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Seeds initialization, data generation and shuffling.
    #[arg(long, alias = "manual-seed", default_value_t = 0)]
    pub seed: u64,

    /// Number of labeled training faces.
    #[arg(long, default_value_t = 1024)]
    pub n_labeled: usize,

    /// Training iterations per epoch.
    #[arg(long, default_value_t = 150)]
    pub val_iteration: usize,

    /// Directory to output the result.
    #[arg(long, default_value = "result")]
    pub out: PathBuf,

    /// Decay of both moving average trackers.
    #[arg(long, default_value_t = 0.999)]
    pub ema_decay: f32,

    /// Cap on the unsupervised loss weight.
    #[arg(long, default_value_t = 1.)]
    pub lambda_u: f32,

    /// Sharpening temperature, accepted for compatibility with mixing based runs.
    #[arg(long = "T", alias = "temperature", default_value_t = 0.5)]
    pub temperature: f32,

    /// Mixing ratio, accepted for compatibility with mixing based runs.
    #[arg(long, default_value_t = 0.75)]
    pub alpha: f32,

    /// SGD momentum.
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f32,

    /// SGD L2 weight decay.
    #[arg(long, default_value_t = 5e-4)]
    pub weight_decay: f32,

    /// Step size of the inner adaptation.
    #[arg(long, default_value_t = 0.15)]
    pub inner_step_size: f32,

    /// Relative radius of the Hessian-vector product central difference.
    #[arg(long, default_value_t = 0.01)]
    pub fd_radius: f32,

    /// What the meta-gradient differentiates with respect to.
    #[arg(long, value_enum, default_value_t = MetaTarget::LiveParameters)]
    pub meta_target: MetaTarget,

    /// Number of unlabeled training faces.
    #[arg(long, default_value_t = 8192)]
    pub n_unlabeled: usize,

    /// Number of validation faces.
    #[arg(long, default_value_t = 512)]
    pub n_val: usize,

    /// Number of test faces.
    #[arg(long, default_value_t = 512)]
    pub n_test: usize,

    /// Side of the rendered face crops, in pixels.
    #[arg(long, default_value_t = 24)]
    pub image_side: usize,

    /// Largest view translation, in pixels.
    #[arg(long, default_value_t = 3.)]
    pub max_shift: f32,

    /// Width of the regressor's hidden layers.
    #[arg(long, default_value_t = 64)]
    pub hidden: usize,
}

impl TrainConfig {
    /// Checks the configuration before any work is done.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| {
            Err(TrainErr::InvalidConfig {
                field,
                reason: reason.to_string(),
            })
        };

        if self.epochs == 0 {
            return invalid("epochs", "must be positive");
        }
        if self.start_epoch > self.epochs {
            return invalid("start_epoch", "can't be past the last epoch");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be positive");
        }
        if self.val_iteration == 0 {
            return invalid("val_iteration", "must be positive");
        }
        if self.n_labeled < self.batch_size {
            return invalid("n_labeled", "must fill at least one batch");
        }
        if self.n_unlabeled < self.batch_size {
            return invalid("n_unlabeled", "must fill at least one batch");
        }
        if self.n_val == 0 || self.n_test == 0 {
            return invalid("n_val", "evaluation splits can't be empty");
        }
        if self.hidden == 0 {
            return invalid("hidden", "must be positive");
        }
        if !(self.lr > 0.) || !self.lr.is_finite() {
            return invalid("lr", "must be a positive number");
        }
        if !(0. ..=1.).contains(&self.ema_decay) {
            return invalid("ema_decay", "must lie in [0, 1]");
        }
        if !(0. ..1.).contains(&self.momentum) {
            return invalid("momentum", "must lie in [0, 1)");
        }
        if !(self.lambda_u >= 0.) || !(self.weight_decay >= 0.) {
            return invalid("lambda_u", "weights can't be negative");
        }

        Ok(())
    }

    /// Length of the unsupervised weight warm-up, in steps.
    pub fn rampup_length(&self) -> f32 {
        self.epochs as f32 * self.val_iteration as f32 * 0.4
    }

    /// The metrics step of the end of `epoch`.
    pub fn metrics_step(&self, epoch: usize) -> u64 {
        (self.batch_size * self.val_iteration * (epoch + 1)) as u64
    }

    pub fn split_sizes(&self) -> SplitSizes {
        SplitSizes {
            labeled: self.n_labeled,
            unlabeled: self.n_unlabeled,
            val: self.n_val,
            test: self.n_test,
        }
    }

    /// Writes the configuration as `config.json` under `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(dir.as_ref().join(CONFIG_FILE))?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::parse_from(["landmark-meta"])
    }
}
