use machine_learning::arch::{Sequential, activations::ActFn, layers::Layer};

use crate::landmarks::LANDMARK_DIM;

/// The landmark regressor trained by the binary: two batch normalized hidden layers and a
/// linear head over the normalized landmark coordinates.
pub fn landmark_regressor(input: usize, hidden: usize) -> Sequential {
    Sequential::new([
        Layer::dense((input, hidden), None),
        Layer::batch_norm(hidden),
        Layer::activation(ActFn::relu()),
        Layer::dense((hidden, hidden), None),
        Layer::batch_norm(hidden),
        Layer::activation(ActFn::relu()),
        Layer::dense((hidden, LANDMARK_DIM), None),
    ])
}
