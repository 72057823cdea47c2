use machine_learning::{
    arch::{Mode, Model, Trace},
    params::ModelState,
};
use ndarray::{Array2, ArrayView2};

use crate::{
    Result,
    data::UnlabeledBatch,
    landmarks::{NormStats, translate},
};

/// Carries predictions made on the augmented view over to the raw view.
///
/// The predictions are de-normalized, every landmark is moved by the raw offset minus the
/// augmented offset, and the result is normalized again.
pub fn transfer(
    stats: &NormStats,
    augmented_pred: ArrayView2<f32>,
    batch: &UnlabeledBatch,
) -> Result<Array2<f32>> {
    let mut pixels = stats.denormalize(augmented_pred)?;
    translate(pixels.view_mut(), batch.shift().view())?;
    stats.normalize(pixels.view())
}

/// Predicts normalized raw view targets for `batch` using `source`.
///
/// The forward pass runs with batch statistics and its buffers are discarded.
pub fn generate<M: Model>(
    model: &M,
    source: &ModelState,
    batch: &UnlabeledBatch,
    stats: &NormStats,
) -> Result<Array2<f32>> {
    let (targets, _) = generate_traced(model, source, batch, stats)?;
    Ok(targets)
}

/// Like `generate`, also handing back the forward trace so the targets can be differentiated
/// with respect to `source`'s parameters.
pub fn generate_traced<M: Model>(
    model: &M,
    source: &ModelState,
    batch: &UnlabeledBatch,
    stats: &NormStats,
) -> Result<(Array2<f32>, M::Trace)> {
    let trace = model.predict(source, batch.augmented.view(), Mode::Train)?;
    let targets = transfer(stats, trace.output(), batch)?;
    Ok((targets, trace))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    use super::*;
    use crate::landmarks::LANDMARK_DIM;

    fn stats() -> NormStats {
        NormStats::new(Array1::from_elem(LANDMARK_DIM, 20.), Array1::from_elem(LANDMARK_DIM, 4.))
            .unwrap()
    }

    fn batch(raw: [f32; 2], aug: [f32; 2]) -> UnlabeledBatch {
        UnlabeledBatch {
            raw: Array2::zeros((1, 1)),
            raw_offsets: array![[raw[0], raw[1]]],
            augmented: Array2::zeros((1, 1)),
            augmented_offsets: array![[aug[0], aug[1]]],
        }
    }

    #[test]
    fn target_lands_on_the_raw_view_whatever_the_augmentation() {
        let canonical = array![[10f32, 12., 30., 12., 20., 20., 14., 28., 26., 28.]];
        let stats = stats();
        let raw = [1., -2.];

        for aug in [[0., 0.], [3., 1.], [-2.5, 4.]] {
            let mut seen = canonical.clone();
            translate(seen.view_mut(), array![[aug[0], aug[1]]].view()).unwrap();
            let pred = stats.normalize(seen.view()).unwrap();

            let targets = transfer(&stats, pred.view(), &batch(raw, aug)).unwrap();
            let pixels = stats.denormalize(targets.view()).unwrap();

            for (j, (p, c)) in pixels.iter().zip(&canonical).enumerate() {
                assert_abs_diff_eq!(*p, c + raw[j % 2], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn equal_offsets_leave_predictions_unchanged() {
        let stats = stats();
        let pred = Array2::from_shape_fn((1, LANDMARK_DIM), |(_, j)| j as f32 * 0.1);

        let targets = transfer(&stats, pred.view(), &batch([2., 2.], [2., 2.])).unwrap();
        for (t, p) in targets.iter().zip(&pred) {
            assert_abs_diff_eq!(t, p, epsilon = 1e-5);
        }
    }

    #[test]
    fn common_offset_shift_leaves_targets_unchanged() {
        let stats = stats();
        let pred = Array2::from_shape_fn((1, LANDMARK_DIM), |(_, j)| 0.3 - j as f32 * 0.07);
        let (raw, aug) = ([1.5, -2.], [-0.5, 3.]);

        let base = transfer(&stats, pred.view(), &batch(raw, aug)).unwrap();
        for c in [[4., -7.], [-3.25, 0.5]] {
            let moved = batch([raw[0] + c[0], raw[1] + c[1]], [aug[0] + c[0], aug[1] + c[1]]);
            let targets = transfer(&stats, pred.view(), &moved).unwrap();

            for (t, b) in targets.iter().zip(&base) {
                assert_abs_diff_eq!(t, b, epsilon = 1e-5);
            }
        }

        // distinct offsets do move the targets
        let unshifted = transfer(&stats, pred.view(), &batch(aug, aug)).unwrap();
        assert!(base.iter().zip(&unshifted).any(|(b, u)| (b - u).abs() > 0.1));
    }
}
