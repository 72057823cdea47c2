use ndarray::{Array2, Axis};

use crate::{Result, TrainErr, landmarks::check_landmarks};

/// Face crops with their landmarks in pixel coordinates.
#[derive(Debug, Clone)]
pub struct LabeledBatch {
    pub inputs: Array2<f32>,
    pub targets: Array2<f32>,
}

/// Two views of the same unlabeled faces.
///
/// Offsets are `N × 2` pixel translations: a landmark seen in a view sits at the canonical
/// landmark plus that view's offset.
#[derive(Debug, Clone)]
pub struct UnlabeledBatch {
    pub raw: Array2<f32>,
    pub raw_offsets: Array2<f32>,
    pub augmented: Array2<f32>,
    pub augmented_offsets: Array2<f32>,
}

impl UnlabeledBatch {
    /// The per sample translation taking augmented view landmarks onto raw view landmarks.
    pub fn shift(&self) -> Array2<f32> {
        &self.raw_offsets - &self.augmented_offsets
    }
}

/// A dataset that can assemble a batch out of sample indices.
pub trait Gather {
    type Batch;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the samples at `indices`, in order, into a new batch.
    fn gather(&self, indices: &[usize]) -> Self::Batch;
}

/// An in-memory labeled split, one sample per row.
#[derive(Debug, Clone)]
pub struct LabeledSet {
    inputs: Array2<f32>,
    targets: Array2<f32>,
}

impl LabeledSet {
    /// Creates a new `LabeledSet`.
    ///
    /// # Returns
    /// An error if the row counts differ or the targets aren't landmark vectors.
    pub fn new(inputs: Array2<f32>, targets: Array2<f32>) -> Result<Self> {
        check_landmarks("labeled targets", targets.view())?;
        if inputs.nrows() != targets.nrows() {
            return Err(TrainErr::ShapeMismatch {
                what: "labeled inputs",
                got: inputs.dim(),
                expected: (targets.nrows(), inputs.ncols()),
            });
        }

        Ok(Self { inputs, targets })
    }

    pub fn inputs(&self) -> &Array2<f32> {
        &self.inputs
    }

    pub fn targets(&self) -> &Array2<f32> {
        &self.targets
    }
}

impl Gather for LabeledSet {
    type Batch = LabeledBatch;

    fn len(&self) -> usize {
        self.inputs.nrows()
    }

    fn gather(&self, indices: &[usize]) -> LabeledBatch {
        LabeledBatch {
            inputs: self.inputs.select(Axis(0), indices),
            targets: self.targets.select(Axis(0), indices),
        }
    }
}

/// An in-memory unlabeled split holding both views of every face.
#[derive(Debug, Clone)]
pub struct UnlabeledSet {
    views: UnlabeledBatch,
}

impl UnlabeledSet {
    /// Creates a new `UnlabeledSet`.
    ///
    /// # Returns
    /// An error if the views or offsets disagree on the amount of samples or their widths.
    pub fn new(views: UnlabeledBatch) -> Result<Self> {
        let n = views.raw.nrows();
        let width = views.raw.ncols();

        if views.augmented.dim() != (n, width) {
            return Err(TrainErr::ShapeMismatch {
                what: "augmented view",
                got: views.augmented.dim(),
                expected: (n, width),
            });
        }

        for (what, offsets) in [
            ("raw offsets", &views.raw_offsets),
            ("augmented offsets", &views.augmented_offsets),
        ] {
            if offsets.dim() != (n, 2) {
                return Err(TrainErr::ShapeMismatch {
                    what,
                    got: offsets.dim(),
                    expected: (n, 2),
                });
            }
        }

        Ok(Self { views })
    }
}

impl Gather for UnlabeledSet {
    type Batch = UnlabeledBatch;

    fn len(&self) -> usize {
        self.views.raw.nrows()
    }

    fn gather(&self, indices: &[usize]) -> UnlabeledBatch {
        let v = &self.views;
        UnlabeledBatch {
            raw: v.raw.select(Axis(0), indices),
            raw_offsets: v.raw_offsets.select(Axis(0), indices),
            augmented: v.augmented.select(Axis(0), indices),
            augmented_offsets: v.augmented_offsets.select(Axis(0), indices),
        }
    }
}
