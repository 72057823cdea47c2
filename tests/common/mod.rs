use std::sync::Arc;

use landmark_meta::{
    TrainData,
    config::TrainConfig,
    data::{LabeledSet, UnlabeledBatch, UnlabeledSet},
    landmarks::{LANDMARK_DIM, NormStats},
};
use machine_learning::{
    arch::{Mode, Model, Trace},
    params::{ModelState, ParamSchema},
};
use ndarray::{Array1, Array2, ArrayView2};

pub struct PassthroughTrace(Array2<f32>);

impl Trace for PassthroughTrace {
    fn output(&self) -> ArrayView2<'_, f32> {
        self.0.view()
    }

    fn buffers(&self) -> &[f32] {
        &[]
    }
}

/// Outputs its input as is. Its single parameter never reaches the output, so every gradient
/// is zero and predictions never move.
pub struct Passthrough {
    schema: Arc<ParamSchema>,
}

impl Passthrough {
    pub fn new() -> Self {
        let mut schema = ParamSchema::new();
        schema.push_param("gain", &[1]);
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn state(&self) -> ModelState {
        ModelState::new(self.schema.clone(), vec![1.], vec![]).unwrap()
    }
}

impl Model for Passthrough {
    type Trace = PassthroughTrace;

    fn schema(&self) -> &Arc<ParamSchema> {
        &self.schema
    }

    fn forward(
        &self,
        _params: &[f32],
        _buffers: &[f32],
        x: ArrayView2<f32>,
        _mode: Mode,
    ) -> machine_learning::Result<PassthroughTrace> {
        Ok(PassthroughTrace(x.to_owned()))
    }

    fn backward(
        &self,
        _params: &[f32],
        trace: &PassthroughTrace,
        _d: Array2<f32>,
        grad: &mut [f32],
    ) -> machine_learning::Result<Array2<f32>> {
        grad.fill(0.);
        Ok(Array2::zeros(trace.0.dim()))
    }
}

/// Landmarks with the eyes 10 pixels apart, shifted by `i` on every row.
pub fn landmarks(n: usize) -> Array2<f32> {
    let face = [30f32, 30., 40., 30., 35., 35., 31., 40., 39., 40.];
    Array2::from_shape_fn((n, LANDMARK_DIM), |(i, j)| face[j] + i as f32)
}

/// A labeled split whose inputs are the targets moved one pixel along both axes.
pub fn labeled(n: usize) -> LabeledSet {
    let targets = landmarks(n);
    LabeledSet::new(&targets + 1., targets).unwrap()
}

/// Identical views with identical offsets.
pub fn unlabeled(n: usize) -> UnlabeledSet {
    let views = landmarks(n);
    let offsets = Array2::from_elem((n, 2), 1.5);
    UnlabeledSet::new(UnlabeledBatch {
        raw: views.clone(),
        raw_offsets: offsets.clone(),
        augmented: views,
        augmented_offsets: offsets,
    })
    .unwrap()
}

pub fn data() -> TrainData {
    TrainData {
        labeled: Arc::new(labeled(8)),
        unlabeled: Arc::new(unlabeled(8)),
        val: Arc::new(labeled(6)),
        test: Arc::new(labeled(4)),
        stats: NormStats::new(Array1::zeros(LANDMARK_DIM), Array1::ones(LANDMARK_DIM)).unwrap(),
    }
}

pub fn config(epochs: usize) -> TrainConfig {
    TrainConfig {
        epochs,
        batch_size: 4,
        val_iteration: 3,
        n_labeled: 8,
        n_unlabeled: 8,
        n_val: 6,
        n_test: 4,
        ..TrainConfig::default()
    }
}
