use ndarray::ArrayView2;

use crate::{
    Result, TrainErr,
    landmarks::{NUM_LANDMARKS, check_landmarks},
};

/// Normalized mean error above which a sample counts as a failure.
pub const FAILURE_THRESHOLD: f32 = 0.1;

/// The landmark accuracy of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Per sample error normalized by the inter-ocular distance, averaged over the batch.
    pub mean_error: f32,
    /// Fraction of samples whose normalized error exceeds `FAILURE_THRESHOLD`.
    pub failure_rate: f32,
}

/// Scores pixel space predictions against pixel space ground truth.
///
/// Each row holds five `(x, y)` landmarks, the first two being the eye centres. A sample's error
/// is the mean euclidean landmark distance divided by the distance between its true eye centres.
///
/// # Returns
/// The batch evaluation, or an error if the shapes differ or a sample has coincident eye centres.
pub fn evaluate(preds: ArrayView2<f32>, targets: ArrayView2<f32>) -> Result<Evaluation> {
    check_landmarks("evaluated predictions", preds)?;
    check_landmarks("evaluated targets", targets)?;
    if preds.nrows() != targets.nrows() {
        return Err(TrainErr::ShapeMismatch {
            what: "evaluation batch",
            got: preds.dim(),
            expected: targets.dim(),
        });
    }

    let n = preds.nrows();
    if n == 0 {
        return Ok(Evaluation {
            mean_error: 0.,
            failure_rate: 0.,
        });
    }

    let point = |row: ArrayView2<f32>, i: usize, k: usize| (row[[i, 2 * k]], row[[i, 2 * k + 1]]);
    let dist = |(ax, ay): (f32, f32), (bx, by): (f32, f32)| (ax - bx).hypot(ay - by);

    let mut errors = Vec::with_capacity(n);
    for i in 0..n {
        let iod = dist(point(targets, i, 0), point(targets, i, 1));
        if iod == 0. {
            return Err(TrainErr::DegenerateEyeDistance { sample: i });
        }

        let total: f32 = (0..NUM_LANDMARKS)
            .map(|k| dist(point(preds, i, k), point(targets, i, k)))
            .sum();
        errors.push(total / NUM_LANDMARKS as f32 / iod);
    }

    let failures = errors.iter().filter(|e| **e > FAILURE_THRESHOLD).count();

    Ok(Evaluation {
        mean_error: errors.iter().sum::<f32>() / n as f32,
        failure_rate: failures as f32 / n as f32,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Axis, array, concatenate};

    use super::*;

    fn face() -> Array2<f32> {
        array![[10., 10., 20., 10., 15., 15., 11., 20., 19., 20.]]
    }

    #[test]
    fn perfect_prediction_scores_zero() {
        let gt = face();
        let eval = evaluate(gt.view(), gt.view()).unwrap();

        assert_eq!(eval.mean_error, 0.);
        assert_eq!(eval.failure_rate, 0.);
    }

    #[test]
    fn offset_of_a_fifth_of_the_eye_distance_fails() {
        let gt = face();
        // every landmark 2px off, eyes 10px apart
        let mut preds = gt.clone();
        preds.iter_mut().step_by(2).for_each(|x| *x += 2.);

        let eval = evaluate(preds.view(), gt.view()).unwrap();

        assert_abs_diff_eq!(eval.mean_error, 0.2, epsilon = 1e-6);
        assert_eq!(eval.failure_rate, 1.);
    }

    #[test]
    fn averages_over_samples() {
        let gt = concatenate![Axis(0), face(), face()];
        let mut preds = gt.clone();
        preds.row_mut(1).iter_mut().step_by(2).for_each(|x| *x += 0.5);

        let eval = evaluate(preds.view(), gt.view()).unwrap();
        assert_abs_diff_eq!(eval.mean_error, 0.025, epsilon = 1e-6);
        assert_eq!(eval.failure_rate, 0.);
    }

    #[test]
    fn coincident_eyes_fail_fast() {
        let mut gt = face();
        gt[[0, 2]] = 10.;

        assert!(matches!(
            evaluate(gt.view(), gt.view()),
            Err(TrainErr::DegenerateEyeDistance { sample: 0 })
        ));
    }
}
