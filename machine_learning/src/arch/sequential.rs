use std::{ops::Range, sync::Arc};

use log::debug;
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Mode, Model, Trace, layers::{Layer, LayerTrace}};
use crate::{
    MlErr, Result,
    params::{ModelState, ParamSchema},
};

/// The trace of a forward pass through a `Sequential`.
pub struct SequentialTrace {
    output: Array2<f32>,
    layers: Vec<LayerTrace>,
    buffers: Vec<f32>,
}

impl Trace for SequentialTrace {
    fn output(&self) -> ArrayView2<'_, f32> {
        self.output.view()
    }

    fn buffers(&self) -> &[f32] {
        &self.buffers
    }
}

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
    schema: Arc<ParamSchema>,
    ranges: Vec<(Range<usize>, Range<usize>)>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<Layer> = layers.into_iter().collect();
        let mut schema = ParamSchema::new();
        let mut ranges = Vec::with_capacity(layers.len());
        let (mut p, mut b) = (0, 0);

        for (i, layer) in layers.iter().enumerate() {
            layer.register(i, &mut schema);

            let (ps, bs) = (layer.size(), layer.buffer_size());
            ranges.push((p..p + ps, b..b + bs));
            p += ps;
            b += bs;
        }

        Self {
            layers,
            schema: Arc::new(schema),
            ranges,
        }
    }

    /// Creates a freshly initialized copy of this model's state.
    pub fn init_state<R: Rng>(&self, rng: &mut R) -> Result<ModelState> {
        let mut state = ModelState::zeros(self.schema.clone());
        let (params, buffers) = state.split_mut();

        for (layer, (pr, br)) in self.layers.iter().zip(&self.ranges) {
            layer.init(&mut params[pr.clone()], &mut buffers[br.clone()], rng)?;
        }

        debug!(
            layers = self.layers.len(),
            params = self.schema.num_params(),
            buffers = self.schema.num_buffers();
            "initialized model state"
        );
        Ok(state)
    }

    fn check_size(what: &'static str, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    type Trace = SequentialTrace;

    fn schema(&self) -> &Arc<ParamSchema> {
        &self.schema
    }

    fn forward(
        &self,
        params: &[f32],
        buffers: &[f32],
        x: ArrayView2<f32>,
        mode: Mode,
    ) -> Result<SequentialTrace> {
        Self::check_size("params", params.len(), self.schema.num_params())?;
        Self::check_size("buffers", buffers.len(), self.schema.num_buffers())?;

        let mut updated = buffers.to_vec();
        let mut traces = Vec::with_capacity(self.layers.len());
        let mut a = x.to_owned();

        for (layer, (pr, br)) in self.layers.iter().zip(&self.ranges) {
            let (next, trace) = layer.forward(
                &params[pr.clone()],
                &buffers[br.clone()],
                a.view(),
                mode,
                &mut updated[br.clone()],
            )?;

            traces.push(trace);
            a = next;
        }

        Ok(SequentialTrace {
            output: a,
            layers: traces,
            buffers: updated,
        })
    }

    fn backward(
        &self,
        params: &[f32],
        trace: &SequentialTrace,
        mut d: Array2<f32>,
        grad: &mut [f32],
    ) -> Result<Array2<f32>> {
        Self::check_size("params", params.len(), self.schema.num_params())?;
        Self::check_size("grad", grad.len(), self.schema.num_params())?;
        Self::check_size("trace", trace.layers.len(), self.layers.len())?;

        let layers = self.layers.iter().zip(&self.ranges).zip(&trace.layers);
        for (i, ((layer, (pr, _)), layer_trace)) in layers.enumerate().rev() {
            d = layer.backward(i, &params[pr.clone()], layer_trace, d, &mut grad[pr.clone()])?;
        }

        Ok(d)
    }
}
