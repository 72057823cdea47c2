//! Tiny models with hand-checkable gradients.

use std::sync::Arc;

use machine_learning::{
    arch::{Mode, Model, Trace},
    params::{ModelState, ParamSchema},
};
use ndarray::{Array2, ArrayView2, s};

use crate::landmarks::LANDMARK_DIM;

pub struct ColumnsTrace {
    input: Array2<f32>,
    output: Array2<f32>,
}

impl Trace for ColumnsTrace {
    fn output(&self) -> ArrayView2<'_, f32> {
        self.output.view()
    }

    fn buffers(&self) -> &[f32] {
        &[]
    }
}

/// Predicts `gain · x[:, ..10]`.
///
/// With `frozen` the gain doesn't require gradients, and with `detached` the output ignores
/// the gain altogether so every gradient is zero.
pub struct Columns {
    schema: Arc<ParamSchema>,
    detached: bool,
}

impl Columns {
    pub fn frozen() -> Self {
        let mut schema = ParamSchema::new();
        schema.push_frozen_param("gain", &[1]);
        Self {
            schema: Arc::new(schema),
            detached: false,
        }
    }

    pub fn trainable() -> Self {
        let mut schema = ParamSchema::new();
        schema.push_param("gain", &[1]);
        Self {
            schema: Arc::new(schema),
            detached: false,
        }
    }

    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Self::trainable()
        }
    }

    pub fn state(&self, gain: f32) -> ModelState {
        ModelState::new(self.schema.clone(), vec![gain], vec![]).unwrap()
    }
}

impl Model for Columns {
    type Trace = ColumnsTrace;

    fn schema(&self) -> &Arc<ParamSchema> {
        &self.schema
    }

    fn forward(
        &self,
        params: &[f32],
        _buffers: &[f32],
        x: ArrayView2<f32>,
        _mode: Mode,
    ) -> machine_learning::Result<ColumnsTrace> {
        let input = x.slice(s![.., ..LANDMARK_DIM]).to_owned();
        let output = if self.detached {
            input.clone()
        } else {
            &input * params[0]
        };

        Ok(ColumnsTrace { input, output })
    }

    fn backward(
        &self,
        params: &[f32],
        trace: &ColumnsTrace,
        d: Array2<f32>,
        grad: &mut [f32],
    ) -> machine_learning::Result<Array2<f32>> {
        if self.detached {
            grad[0] = 0.;
            return Ok(Array2::zeros(trace.input.dim()));
        }

        grad[0] = (&d * &trace.input).sum();
        Ok(d * params[0])
    }
}
