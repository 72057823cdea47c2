use machine_learning::{arch::Model, params::ModelState};
use ndarray::ArrayView2;

use crate::{Result, TrainErr, objective::mse_objective};

/// Step size of the functional inner update.
pub const INNER_STEP_SIZE: f32 = 0.15;

/// The unsupervised regression problem the inner loop descends on: the raw unlabeled view and
/// the pseudo-labels it should match.
#[derive(Debug, Clone, Copy)]
pub struct InnerProblem<'a> {
    pub inputs: ArrayView2<'a, f32>,
    pub targets: ArrayView2<'a, f32>,
}

/// Parameters after one inner gradient step. Lives for a single training step.
#[derive(Debug, Clone)]
pub struct Adaptation {
    /// `original - step_size * grad`, the original itself on frozen tensors.
    pub params: Vec<f32>,
    /// The unsupervised gradient at the original parameters.
    pub grad: Vec<f32>,
    /// The unsupervised loss at the original parameters.
    pub loss: f32,
    /// The buffers emitted by the unsupervised forward pass.
    pub buffers: Vec<f32>,
}

/// One step MAML style adaptation of the live parameters on the unsupervised loss.
#[derive(Debug, Clone, Copy)]
pub struct InnerLoop {
    step_size: f32,
}

impl InnerLoop {
    /// Creates a new `InnerLoop`.
    ///
    /// # Returns
    /// An error if `step_size` isn't a positive number.
    pub fn new(step_size: f32) -> Result<Self> {
        if !(step_size > 0.) || !step_size.is_finite() {
            return Err(TrainErr::InvalidConfig {
                field: "inner_step_size",
                reason: format!("{step_size} is not a positive step"),
            });
        }

        Ok(Self { step_size })
    }

    /// Adapts `live`'s parameters on `problem` without touching `live`.
    pub fn adapt<M: Model>(
        &self,
        model: &M,
        live: &ModelState,
        problem: &InnerProblem,
    ) -> Result<Adaptation> {
        let objective = mse_objective(
            model,
            live.params(),
            live.buffers(),
            problem.inputs,
            problem.targets,
        )?;

        let params = live
            .params()
            .iter()
            .zip(&objective.grad)
            .map(|(w, g)| w - self.step_size * g)
            .collect();

        Ok(Adaptation {
            params,
            grad: objective.grad,
            loss: objective.loss,
            buffers: objective.buffers,
        })
    }
}

impl Default for InnerLoop {
    fn default() -> Self {
        Self {
            step_size: INNER_STEP_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use machine_learning::arch::{Model, Sequential, layers::Layer};
    use ndarray::{Array2, array};

    use super::*;
    use crate::testing::Columns;

    #[test]
    fn adapted_is_original_minus_scaled_gradient() {
        let model = Sequential::new([Layer::dense((2, 1), None)]);
        let live = ModelState::new(model.schema().clone(), vec![1., -1., 0.5], vec![]).unwrap();
        let x = array![[1f32, 2.], [0., 1.]];
        let y = array![[0f32], [1.]];
        let problem = InnerProblem {
            inputs: x.view(),
            targets: y.view(),
        };

        let adaptation = InnerLoop::default().adapt(&model, &live, &problem).unwrap();

        // outputs are -0.5 and -0.5, residuals -0.5 and -1.5
        assert_abs_diff_eq!(adaptation.loss, (0.25 + 2.25) / 2., epsilon = 1e-6);
        for (i, g) in [-0.5f32, -2.5, -2.].into_iter().enumerate() {
            assert_abs_diff_eq!(adaptation.grad[i], g, epsilon = 1e-6);
            assert_abs_diff_eq!(
                adaptation.params[i],
                live.params()[i] - INNER_STEP_SIZE * g,
                epsilon = 1e-6
            );
        }

        assert_eq!(live.params(), &[1., -1., 0.5]);
    }

    #[test]
    fn zero_gradient_adaptation_is_the_identity() {
        let model = Columns::detached();
        let live = model.state(0.7);
        let x = Array2::from_shape_fn((4, 12), |(i, j)| (i * j) as f32);
        let y = Array2::ones((4, 10));
        let problem = InnerProblem {
            inputs: x.view(),
            targets: y.view(),
        };

        let adaptation = InnerLoop::default().adapt(&model, &live, &problem).unwrap();

        assert!(adaptation.loss > 0.);
        assert_eq!(adaptation.grad, [0.]);
        assert_eq!(adaptation.params, live.params());
    }

    #[test]
    fn frozen_tensors_keep_their_original_value() {
        let model = Columns::frozen();
        let live = model.state(2.);
        let x = Array2::ones((3, 10));
        let y = Array2::zeros((3, 10));
        let problem = InnerProblem {
            inputs: x.view(),
            targets: y.view(),
        };

        let adaptation = InnerLoop::default().adapt(&model, &live, &problem).unwrap();

        assert_eq!(adaptation.grad, [0.]);
        assert_eq!(adaptation.params, [2.]);
    }

    #[test]
    fn mismatched_targets_fail() {
        let model = Columns::trainable();
        let live = model.state(1.);
        let x = Array2::ones((3, 10));
        let y = Array2::zeros((2, 10));
        let problem = InnerProblem {
            inputs: x.view(),
            targets: y.view(),
        };

        assert!(matches!(
            InnerLoop::default().adapt(&model, &live, &problem),
            Err(TrainErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn non_positive_step_is_rejected() {
        assert!(InnerLoop::new(0.).is_err());
        assert!(InnerLoop::new(f32::NAN).is_err());
    }
}
