use machine_learning::{MlErr, params::ModelState};
use rayon::prelude::*;

use crate::{Result, TrainErr};

/// How a tracked value follows its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateRule {
    /// `tracked ← decay · tracked + (1 - decay) · source`.
    Blend { decay: f32 },
    /// `tracked ← source`.
    Copy,
}

/// Walks two equally laid out tables pairwise, applying `rule` to every tracked entry.
pub fn update_pairwise(tracked: &mut [f32], source: &[f32], rule: UpdateRule) -> Result<()> {
    if tracked.len() != source.len() {
        return Err(TrainErr::Ml(MlErr::SizeMismatch {
            what: "tracked parameters",
            got: tracked.len(),
            expected: source.len(),
        }));
    }

    let pairs = tracked.par_iter_mut().zip(source.par_iter());
    match rule {
        UpdateRule::Blend { decay } => pairs.for_each(|(t, s)| {
            *t = decay * *t + (1. - decay) * *s;
        }),
        UpdateRule::Copy => pairs.for_each(|(t, s)| *t = *s),
    }

    Ok(())
}

/// Bias corrected moving average of the live parameters, used to produce pseudo-labels.
#[derive(Debug, Clone, Copy)]
pub struct TeacherEma {
    alpha: f32,
}

impl TeacherEma {
    pub fn new(alpha: f32) -> Self {
        Self { alpha }
    }

    /// The decay at `step`: `min(1 - 1 / (step + 1), alpha)`.
    pub fn decay(&self, step: u64) -> f32 {
        (1. - 1. / (step as f64 + 1.)).min(self.alpha as f64) as f32
    }

    /// Moves the teacher's parameters towards the live ones. Buffers are left alone.
    ///
    /// # Returns
    /// The decay that was used.
    pub fn update(&self, teacher: &mut ModelState, live: &ModelState, step: u64) -> Result<f32> {
        teacher.ensure_compatible(live)?;
        let decay = self.decay(step);
        update_pairwise(
            teacher.params_mut(),
            live.params(),
            UpdateRule::Blend { decay },
        )?;
        Ok(decay)
    }
}

/// Fixed decay moving average used for evaluation, coupled with a decoupled weight decay on
/// the live parameters and resynchronized wholesale once per epoch.
#[derive(Debug, Clone, Copy)]
pub struct StabilizedEma {
    alpha: f32,
    weight_decay: f32,
}

impl StabilizedEma {
    /// Creates a new `StabilizedEma`.
    ///
    /// # Arguments
    /// * `alpha` - The fixed decay.
    /// * `learning_rate` - The initial learning rate, the live parameters shrink by
    ///   `0.02 · learning_rate` per step.
    pub fn new(alpha: f32, learning_rate: f32) -> Self {
        Self {
            alpha,
            weight_decay: 0.02 * learning_rate,
        }
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }

    /// Blends the live parameters in, then shrinks them.
    pub fn update(&self, stabilized: &mut ModelState, live: &mut ModelState) -> Result<()> {
        stabilized.ensure_compatible(live)?;
        update_pairwise(
            stabilized.params_mut(),
            live.params(),
            UpdateRule::Blend { decay: self.alpha },
        )?;

        let shrink = 1. - self.weight_decay;
        live.params_mut().par_iter_mut().for_each(|w| *w *= shrink);
        Ok(())
    }

    /// Takes over the live running statistics, keeping the averaged parameters.
    pub fn sync_buffers(&self, stabilized: &mut ModelState, live: &ModelState) -> Result<()> {
        stabilized.ensure_compatible(live)?;
        update_pairwise(stabilized.buffers_mut(), live.buffers(), UpdateRule::Copy)
    }

    /// Replaces the tracked copy with the live parameters and buffers.
    pub fn resync(&self, stabilized: &mut ModelState, live: &ModelState) -> Result<()> {
        stabilized.ensure_compatible(live)?;
        update_pairwise(stabilized.params_mut(), live.params(), UpdateRule::Copy)?;
        update_pairwise(stabilized.buffers_mut(), live.buffers(), UpdateRule::Copy)
    }
}
