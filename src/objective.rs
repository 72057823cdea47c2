use machine_learning::{
    arch::{
        Mode, Model, Trace,
        loss::{LossFn, Mse},
    },
    params::ParamSchema,
};
use ndarray::{Array2, ArrayView2};

use crate::{Result, TrainErr};

/// A regression loss evaluated at some parameters, with its gradient.
#[derive(Debug, Clone)]
pub struct Objective {
    pub loss: f32,
    /// Gradient with respect to the parameters, zero on frozen tensors.
    pub grad: Vec<f32>,
    /// The buffers emitted by the forward pass.
    pub buffers: Vec<f32>,
}

/// Zeroes the entries of `grad` belonging to tensors that don't require gradients.
pub fn mask_frozen(schema: &ParamSchema, grad: &mut [f32]) {
    schema
        .params()
        .iter()
        .filter(|spec| !spec.requires_grad())
        .for_each(|spec| grad[spec.range()].fill(0.));
}

/// Fails unless `pred` and `targets` have the same shape.
pub fn check_targets(pred: ArrayView2<f32>, targets: ArrayView2<f32>) -> Result<()> {
    if pred.dim() != targets.dim() {
        return Err(TrainErr::ShapeMismatch {
            what: "regression targets",
            got: targets.dim(),
            expected: pred.dim(),
        });
    }

    Ok(())
}

/// Back-propagates the mean squared error of an already computed forward pass.
pub fn mse_gradient<M: Model>(
    model: &M,
    params: &[f32],
    trace: &M::Trace,
    targets: ArrayView2<f32>,
) -> Result<(f32, Vec<f32>)> {
    check_targets(trace.output(), targets)?;

    let loss = Mse.loss(trace.output(), targets);
    let d: Array2<f32> = Mse.loss_prime(trace.output(), targets);
    let mut grad = model.gradient(params, trace, d)?;
    mask_frozen(model.schema(), &mut grad);

    Ok((loss, grad))
}

/// Evaluates the mean squared error of `model` at `params` on a training mode forward pass.
pub fn mse_objective<M: Model>(
    model: &M,
    params: &[f32],
    buffers: &[f32],
    inputs: ArrayView2<f32>,
    targets: ArrayView2<f32>,
) -> Result<Objective> {
    let trace = model.forward(params, buffers, inputs, Mode::Train)?;
    let (loss, grad) = mse_gradient(model, params, &trace, targets)?;

    Ok(Objective {
        loss,
        grad,
        buffers: trace.buffers().to_vec(),
    })
}
