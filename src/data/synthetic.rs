use ndarray::{Array2, ArrayView1, ArrayViewMut1, Zip};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::{LabeledSet, UnlabeledBatch, UnlabeledSet};
use crate::{
    Result, TrainErr,
    landmarks::{LANDMARK_DIM, NUM_LANDMARKS, NormStats},
};

/// How many faces every split gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSizes {
    pub labeled: usize,
    pub unlabeled: usize,
    pub val: usize,
    pub test: usize,
}

/// Every split of a face landmark dataset, plus the statistics of its labeled targets.
#[derive(Debug, Clone)]
pub struct FaceSplits {
    pub labeled: LabeledSet,
    pub unlabeled: UnlabeledSet,
    pub val: LabeledSet,
    pub test: LabeledSet,
    pub stats: NormStats,
}

/// Renders small grayscale faces as five gaussian blobs, one per landmark, on a square canvas.
///
/// A face has canonical landmarks; every rendered view translates the whole face by its own
/// offset, so a landmark seen in a view is the canonical one plus that view's offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticFaces {
    side: usize,
    max_shift: f32,
    blob_sigma: f32,
    jitter: f32,
}

impl SyntheticFaces {
    /// Creates a new `SyntheticFaces` generator.
    ///
    /// # Arguments
    /// * `side` - The canvas width and height in pixels.
    /// * `max_shift` - The largest translation a view applies on either axis.
    pub fn new(side: usize, max_shift: f32) -> Result<Self> {
        if side < 8 {
            return Err(TrainErr::InvalidConfig {
                field: "image_side",
                reason: format!("a {side}px canvas can't fit a face"),
            });
        }

        if !(max_shift >= 0.) || max_shift * 4. > side as f32 {
            return Err(TrainErr::InvalidConfig {
                field: "max_shift",
                reason: format!("{max_shift}px doesn't fit a {side}px canvas"),
            });
        }

        Ok(Self {
            side,
            max_shift,
            blob_sigma: side as f32 / 16.,
            jitter: side as f32 / 64.,
        })
    }

    /// The width of a rendered, flattened image.
    pub fn input_dim(&self) -> usize {
        self.side * self.side
    }

    /// Draws the canonical landmarks of a new face.
    pub fn face<R: Rng>(&self, rng: &mut R) -> [f32; LANDMARK_DIM] {
        let s = self.side as f32;
        let cx = rng.random_range(0.45 * s..0.55 * s);
        let cy = rng.random_range(0.45 * s..0.55 * s);
        let eye_gap = rng.random_range(0.14 * s..0.2 * s);
        let mouth_gap = 0.75 * eye_gap;

        let mut lm = [
            cx - eye_gap,
            cy - 0.12 * s,
            cx + eye_gap,
            cy - 0.12 * s,
            cx,
            cy + 0.02 * s,
            cx - mouth_gap,
            cy + 0.16 * s,
            cx + mouth_gap,
            cy + 0.16 * s,
        ];

        if let Ok(noise) = Normal::new(0., self.jitter) {
            lm.iter_mut().for_each(|v| *v += noise.sample(rng));
        }

        lm
    }

    /// Draws a view translation.
    pub fn offset<R: Rng>(&self, rng: &mut R) -> [f32; 2] {
        if self.max_shift == 0. {
            return [0., 0.];
        }

        let d = self.max_shift;
        [rng.random_range(-d..=d), rng.random_range(-d..=d)]
    }

    /// Renders `landmarks` into `image`, a flattened `side × side` canvas.
    pub fn render(&self, landmarks: ArrayView1<f32>, mut image: ArrayViewMut1<f32>) {
        let inv = -0.5 / (self.blob_sigma * self.blob_sigma);

        image.indexed_iter_mut().for_each(|(i, px)| {
            let (x, y) = ((i % self.side) as f32, (i / self.side) as f32);

            *px = (0..NUM_LANDMARKS)
                .map(|k| {
                    let (dx, dy) = (x - landmarks[2 * k], y - landmarks[2 * k + 1]);
                    ((dx * dx + dy * dy) * inv).exp()
                })
                .sum();
        });
    }

    /// Renders one image per landmark row.
    pub fn render_all(&self, landmarks: &Array2<f32>) -> Array2<f32> {
        let mut images = Array2::zeros((landmarks.nrows(), self.input_dim()));

        Zip::from(images.rows_mut())
            .and(landmarks.rows())
            .par_for_each(|image, lm| self.render(lm, image));

        images
    }

    /// Generates a labeled split: each face seen through one random view.
    pub fn labeled<R: Rng>(&self, n: usize, rng: &mut R) -> Result<LabeledSet> {
        let mut targets = Array2::zeros((n, LANDMARK_DIM));

        for mut row in targets.rows_mut() {
            let face = self.face(rng);
            let [dx, dy] = self.offset(rng);
            row.iter_mut()
                .zip(face)
                .enumerate()
                .for_each(|(j, (t, v))| *t = v + if j % 2 == 0 { dx } else { dy });
        }

        LabeledSet::new(self.render_all(&targets), targets)
    }

    /// Generates an unlabeled split: each face seen through two independent views.
    pub fn unlabeled<R: Rng>(&self, n: usize, rng: &mut R) -> Result<UnlabeledSet> {
        let mut raw_lm = Array2::zeros((n, LANDMARK_DIM));
        let mut aug_lm = Array2::zeros((n, LANDMARK_DIM));
        let mut raw_offsets = Array2::zeros((n, 2));
        let mut augmented_offsets = Array2::zeros((n, 2));

        for i in 0..n {
            let face = self.face(rng);
            let raw = self.offset(rng);
            let aug = self.offset(rng);

            for (j, v) in face.into_iter().enumerate() {
                raw_lm[[i, j]] = v + raw[j % 2];
                aug_lm[[i, j]] = v + aug[j % 2];
            }

            raw_offsets[[i, 0]] = raw[0];
            raw_offsets[[i, 1]] = raw[1];
            augmented_offsets[[i, 0]] = aug[0];
            augmented_offsets[[i, 1]] = aug[1];
        }

        UnlabeledSet::new(UnlabeledBatch {
            raw: self.render_all(&raw_lm),
            raw_offsets,
            augmented: self.render_all(&aug_lm),
            augmented_offsets,
        })
    }

    /// Generates every split and the normalization statistics of the labeled targets.
    pub fn splits<R: Rng>(&self, sizes: SplitSizes, rng: &mut R) -> Result<FaceSplits> {
        let labeled = self.labeled(sizes.labeled, rng)?;
        let stats = NormStats::from_targets(labeled.targets().view())?;

        Ok(FaceSplits {
            unlabeled: self.unlabeled(sizes.unlabeled, rng)?,
            val: self.labeled(sizes.val, rng)?,
            test: self.labeled(sizes.test, rng)?,
            labeled,
            stats,
        })
    }
}
