use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut2, Axis, Zip};

use crate::{Result, TrainErr};

/// Landmarks per face: two eye centres, the nose tip and two mouth corners.
pub const NUM_LANDMARKS: usize = 5;

/// Values per landmark vector, `(x, y)` interleaved.
pub const LANDMARK_DIM: usize = 2 * NUM_LANDMARKS;

/// Fails unless `landmarks` is an `N × LANDMARK_DIM` matrix.
pub fn check_landmarks(what: &'static str, landmarks: ArrayView2<f32>) -> Result<()> {
    if landmarks.ncols() != LANDMARK_DIM {
        return Err(TrainErr::ShapeMismatch {
            what,
            got: landmarks.dim(),
            expected: (landmarks.nrows(), LANDMARK_DIM),
        });
    }

    Ok(())
}

/// Moves every landmark of row `i` by `shift[i]`.
///
/// # Arguments
/// * `landmarks` - `N × 10` pixel coordinates.
/// * `shift` - `N × 2` per sample `(dx, dy)`.
pub fn translate(mut landmarks: ArrayViewMut2<f32>, shift: ArrayView2<f32>) -> Result<()> {
    check_landmarks("translated landmarks", landmarks.view())?;
    if shift.dim() != (landmarks.nrows(), 2) {
        return Err(TrainErr::ShapeMismatch {
            what: "landmark shift",
            got: shift.dim(),
            expected: (landmarks.nrows(), 2),
        });
    }

    Zip::from(landmarks.rows_mut())
        .and(shift.rows())
        .for_each(|mut row, d| {
            row.iter_mut()
                .enumerate()
                .for_each(|(j, v)| *v += d[j % 2]);
        });

    Ok(())
}

/// Per coordinate mean and standard deviation of the labeled training targets.
///
/// Computed once during setup and only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct NormStats {
    mean: Array1<f32>,
    std: Array1<f32>,
}

impl NormStats {
    /// Creates a new `NormStats`.
    ///
    /// # Returns
    /// An error if either vector isn't `LANDMARK_DIM` long or a deviation isn't positive.
    pub fn new(mean: Array1<f32>, std: Array1<f32>) -> Result<Self> {
        for (what, v) in [("mean", &mean), ("std", &std)] {
            if v.len() != LANDMARK_DIM {
                return Err(TrainErr::ShapeMismatch {
                    what,
                    got: (1, v.len()),
                    expected: (1, LANDMARK_DIM),
                });
            }
        }

        if let Some(coordinate) = std.iter().position(|s| !(*s > 0.)) {
            return Err(TrainErr::DegenerateStatistics { coordinate });
        }

        Ok(Self { mean, std })
    }

    /// Computes the statistics of `targets` (population standard deviation).
    pub fn from_targets(targets: ArrayView2<f32>) -> Result<Self> {
        check_landmarks("statistics targets", targets)?;
        let mean = targets
            .mean_axis(Axis(0))
            .ok_or(TrainErr::EmptySource { name: "statistics" })?;
        let std = targets.std_axis(Axis(0), 0.);
        Self::new(mean, std)
    }

    pub fn mean(&self) -> &Array1<f32> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f32> {
        &self.std
    }

    /// Maps pixel coordinates into the normalized space the network regresses.
    pub fn normalize(&self, pixels: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_landmarks("normalized landmarks", pixels)?;
        Ok((&pixels - &self.mean) / &self.std)
    }

    /// Maps network outputs back into pixel coordinates.
    pub fn denormalize(&self, normalized: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_landmarks("denormalized landmarks", normalized)?;
        Ok(&normalized * &self.std + &self.mean)
    }
}
