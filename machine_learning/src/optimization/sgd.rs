use serde::{Deserialize, Serialize};

use super::Optimizer;
use crate::{MlErr, Result, params::ParamSchema};

/// The serializable state of an `Sgd` optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdState {
    pub learning_rate: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    pub velocity: Vec<f32>,
}

/// Stochastic gradient descent with momentum and L2 weight decay:
///
/// ```text
/// v <- momentum · v + g + weight_decay · w
/// w <- w - learning_rate · v
/// ```
///
/// Parameters declared frozen on the schema are never touched.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Box<[f32]>,
    trainable: Box<[bool]>,
}

impl Sgd {
    /// Creates a new `Sgd` optimizer.
    ///
    /// # Arguments
    /// * `schema` - The layout of the parameters this optimizer updates.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - How much of the previous velocity is kept on every step.
    /// * `weight_decay` - The L2 penalty coefficient.
    pub fn new(
        schema: &ParamSchema,
        learning_rate: f32,
        momentum: f32,
        weight_decay: f32,
    ) -> Result<Self> {
        for (name, value) in [
            ("learning_rate", learning_rate),
            ("momentum", momentum),
            ("weight_decay", weight_decay),
        ] {
            if !value.is_finite() || value < 0. {
                return Err(MlErr::InvalidHyperparameter { name, value });
            }
        }

        let mut trainable = vec![false; schema.num_params()];
        for spec in schema.params().iter().filter(|spec| spec.requires_grad()) {
            trainable[spec.range()].fill(true);
        }

        Ok(Self {
            learning_rate,
            momentum,
            weight_decay,
            velocity: vec![0.; schema.num_params()].into_boxed_slice(),
            trainable: trainable.into_boxed_slice(),
        })
    }

    /// Rebuilds an optimizer from a previously exported state.
    pub fn from_state(schema: &ParamSchema, state: SgdState) -> Result<Self> {
        let mut sgd = Self::new(
            schema,
            state.learning_rate,
            state.momentum,
            state.weight_decay,
        )?;

        if state.velocity.len() != sgd.velocity.len() {
            return Err(MlErr::SizeMismatch {
                what: "velocity",
                got: state.velocity.len(),
                expected: sgd.velocity.len(),
            });
        }

        sgd.velocity = state.velocity.into_boxed_slice();
        Ok(sgd)
    }

    pub fn state(&self) -> SgdState {
        SgdState {
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            velocity: self.velocity.to_vec(),
        }
    }
}

impl Optimizer for Sgd {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        let expected = self.velocity.len();
        for (what, got) in [("params", params.len()), ("grad", grad.len())] {
            if got != expected {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected,
                });
            }
        }

        let lr = self.learning_rate;
        let mu = self.momentum;
        let wd = self.weight_decay;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .zip(self.trainable.iter())
            .filter(|(_, trainable)| **trainable)
            .for_each(|(((w, g), v), _)| {
                *v = mu * *v + g + wd * *w;
                *w -= lr * *v;
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn schema() -> ParamSchema {
        let mut schema = ParamSchema::new();
        schema.push_param("w", &[2]);
        schema.push_frozen_param("frozen", &[1]);
        schema
    }

    #[test]
    fn momentum_accumulates_gradient_and_decay() {
        let mut sgd = Sgd::new(&schema(), 0.1, 0.9, 0.5).unwrap();
        let mut params = [1., -2., 3.];
        let grad = [1., 1., 1.];

        sgd.update_params(&mut params, &grad).unwrap();
        // v = 1 + 0.5·1 = 1.5, w = 1 - 0.15
        assert_abs_diff_eq!(params[0], 0.85, epsilon = 1e-6);
        // v = 1 + 0.5·-2 = 0
        assert_abs_diff_eq!(params[1], -2., epsilon = 1e-6);

        sgd.update_params(&mut params, &grad).unwrap();
        // v = 0.9·1.5 + 1 + 0.425 = 2.775
        assert_abs_diff_eq!(params[0], 0.85 - 0.2775, epsilon = 1e-6);
    }

    #[test]
    fn frozen_parameters_are_left_alone() {
        let mut sgd = Sgd::new(&schema(), 0.1, 0.9, 5e-4).unwrap();
        let mut params = [0., 0., 3.];

        sgd.update_params(&mut params, &[1., 1., 1.]).unwrap();
        assert_eq!(params[2], 3.);
        assert_eq!(sgd.state().velocity[2], 0.);
    }

    #[test]
    fn state_restores_velocity_and_learning_rate() {
        let mut sgd = Sgd::new(&schema(), 0.1, 0.9, 0.).unwrap();
        let mut params = [0.; 3];
        sgd.update_params(&mut params, &[1., 2., 0.]).unwrap();
        sgd.set_learning_rate(0.01);

        let restored = Sgd::from_state(&schema(), sgd.state()).unwrap();
        assert_eq!(restored.state(), sgd.state());
        assert_eq!(restored.learning_rate(), 0.01);
    }

    #[test]
    fn mismatched_gradient_is_rejected() {
        let mut sgd = Sgd::new(&schema(), 0.1, 0.9, 0.).unwrap();
        let res = sgd.update_params(&mut [0.; 3], &[0.; 2]);

        assert!(matches!(res, Err(MlErr::SizeMismatch { what: "grad", .. })));
    }

    #[test]
    fn negative_learning_rate_is_rejected() {
        assert!(matches!(
            Sgd::new(&schema(), -0.1, 0.9, 0.),
            Err(MlErr::InvalidHyperparameter { name: "learning_rate", .. })
        ));
    }
}
