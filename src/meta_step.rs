use clap::ValueEnum;
use log::debug;
use machine_learning::{
    arch::{
        Mode, Model, Trace,
        loss::{LossFn, Mse},
    },
    optimization::Optimizer,
    params::ModelState,
};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{
    Result, TrainErr,
    adapter::{Adaptation, InnerProblem},
    objective::{check_targets, mask_frozen, mse_objective},
};

/// Relative radius of the central difference used for Hessian-vector products.
pub const FD_RADIUS: f32 = 0.01;

/// Which parameters the meta-gradient differentiates with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MetaTarget {
    /// The live parameters the inner loop started from.
    #[default]
    LiveParameters,
    /// The scratch copy that produced the inner loop's pseudo-labels.
    PseudoLabelSource,
}

/// The scratch copy that produced the inner loop targets, with the trace of its forward pass
/// on the augmented view.
pub struct PseudoSource<'a, T> {
    pub params: &'a [f32],
    pub trace: &'a T,
}

/// A meta-gradient ready to be handed to the optimizer.
#[derive(Debug, Clone)]
pub struct MetaGradient {
    pub grad: Vec<f32>,
    /// The meta-validation loss at the adapted parameters.
    pub val_loss: f32,
}

/// Second order step through the inner loop adaptation.
///
/// With `θ' = θ - η ∇Lu(θ)` and `v = ∇Lv(θ')`, the derivative of `Lv(θ')` goes through the
/// inner gradient only. It is formed out of first order passes by differentiating the inner
/// gradient along `v` with a central difference of radius `r / ‖v‖`.
#[derive(Debug, Clone, Copy)]
pub struct MetaStep {
    target: MetaTarget,
    step_size: f32,
    radius: f32,
}

impl MetaStep {
    /// Creates a new `MetaStep`.
    ///
    /// # Arguments
    /// * `target` - What to differentiate with respect to.
    /// * `step_size` - The inner loop step size `η`.
    /// * `radius` - The central difference radius `r`.
    pub fn new(target: MetaTarget, step_size: f32, radius: f32) -> Result<Self> {
        if !(radius > 0.) || !radius.is_finite() {
            return Err(TrainErr::InvalidConfig {
                field: "fd_radius",
                reason: format!("{radius} is not a positive radius"),
            });
        }

        Ok(Self {
            target,
            step_size,
            radius,
        })
    }

    /// Computes the meta-gradient.
    ///
    /// # Arguments
    /// * `model` - The regression model.
    /// * `live` - The parameters the inner loop started from.
    /// * `problem` - The inner loop's unsupervised problem.
    /// * `adaptation` - The inner loop's result.
    /// * `source` - Where the inner loop targets came from.
    /// * `val_inputs` - The meta-validation batch.
    /// * `val_targets` - Its normalized targets.
    #[allow(clippy::too_many_arguments)]
    pub fn meta_gradient<M: Model>(
        &self,
        model: &M,
        live: &ModelState,
        problem: &InnerProblem,
        adaptation: &Adaptation,
        source: PseudoSource<'_, M::Trace>,
        val_inputs: ArrayView2<f32>,
        val_targets: ArrayView2<f32>,
    ) -> Result<MetaGradient> {
        let val = mse_objective(
            model,
            &adaptation.params,
            live.buffers(),
            val_inputs,
            val_targets,
        )?;

        let v = val.grad;
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0. || !norm.is_finite() {
            debug!(norm = norm; "flat meta-validation gradient, skipping second order term");
            return Ok(MetaGradient {
                grad: vec![0.; v.len()],
                val_loss: val.loss,
            });
        }

        let eps = self.radius / norm;
        let shifted = |sign: f32| -> Vec<f32> {
            live.params()
                .iter()
                .zip(&v)
                .map(|(w, v)| w + sign * eps * v)
                .collect()
        };
        let (plus, minus) = (shifted(1.), shifted(-1.));

        let mut grad = match self.target {
            MetaTarget::LiveParameters => {
                self.through_live(model, live, problem, &plus, &minus, eps)?
            }
            MetaTarget::PseudoLabelSource => {
                self.through_source(model, live, problem, source, &plus, &minus, eps)?
            }
        };
        mask_frozen(model.schema(), &mut grad);

        Ok(MetaGradient {
            grad,
            val_loss: val.loss,
        })
    }

    /// `-η · H v` with `H v ≈ (∇Lu(θ + εv) - ∇Lu(θ - εv)) / 2ε`.
    fn through_live<M: Model>(
        &self,
        model: &M,
        live: &ModelState,
        problem: &InnerProblem,
        plus: &[f32],
        minus: &[f32],
        eps: f32,
    ) -> Result<Vec<f32>> {
        let grad_at = |params: &[f32]| {
            mse_objective(
                model,
                params,
                live.buffers(),
                problem.inputs,
                problem.targets,
            )
            .map(|o| o.grad)
        };

        let (g_plus, g_minus) = (grad_at(plus)?, grad_at(minus)?);
        let scale = -self.step_size / (2. * eps);

        Ok(g_plus
            .iter()
            .zip(&g_minus)
            .map(|(p, m)| scale * (p - m))
            .collect())
    }

    /// `η · Jφᵀ u` where `u` is the central difference of the unsupervised loss derivative with
    /// respect to the predictions along `v`. The pseudo-label transfer is a translation in
    /// normalized space, so its jacobian is the identity.
    #[allow(clippy::too_many_arguments)]
    fn through_source<M: Model>(
        &self,
        model: &M,
        live: &ModelState,
        problem: &InnerProblem,
        source: PseudoSource<'_, M::Trace>,
        plus: &[f32],
        minus: &[f32],
        eps: f32,
    ) -> Result<Vec<f32>> {
        let delta_at = |params: &[f32]| -> Result<Array2<f32>> {
            let trace = model.forward(params, live.buffers(), problem.inputs, Mode::Train)?;
            check_targets(trace.output(), problem.targets)?;
            Ok(Mse.loss_prime(trace.output(), problem.targets))
        };

        let u = (delta_at(plus)? - delta_at(minus)?) * (self.step_size / (2. * eps));
        check_targets(source.trace.output(), u.view())?;

        let grad = model.gradient(source.params, source.trace, u)?;
        Ok(grad)
    }

    /// Hands `meta` to the optimizer as the live parameters' gradient.
    pub fn apply<O: Optimizer>(
        &self,
        optimizer: &mut O,
        live: &mut ModelState,
        meta: &MetaGradient,
    ) -> Result<()> {
        optimizer.update_params(live.params_mut(), &meta.grad)?;
        Ok(())
    }
}
