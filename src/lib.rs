//! Semi-supervised facial landmark regression with a meta-learned pseudo-label step.
//!
//! Every training step fits the live network to labeled targets and to a teacher's
//! pseudo-labels, then refines it with a meta-gradient measured through one inner adaptation
//! on those pseudo-labels. Second order terms come from central differences of gradients.

pub mod adapter;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod ema;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod landmarks;
pub mod meta_step;
pub mod meter;
pub mod metrics;
pub mod network;
pub mod objective;
pub mod pseudo_label;
pub mod ramp;
pub mod trainer;

#[cfg(test)]
mod testing;

pub use error::{Result, TrainErr};
pub use trainer::{Trainer, TrainData};
