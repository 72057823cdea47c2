use std::sync::Arc;

use ndarray::{Array2, ArrayView2};

use crate::{
    Result,
    params::{ModelState, ParamSchema},
};

/// Which statistics normalization layers use on a forward pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Batch statistics, the trace carries the updated running buffers.
    Train,
    /// Running statistics, buffers are left as they are.
    Eval,
}

/// The result of a forward pass, kept around to go backwards through the model.
pub trait Trace {
    /// The model's prediction.
    fn output(&self) -> ArrayView2<'_, f32>;

    /// The buffers as they are after this pass. Committing them onto a `ModelState` is up to
    /// the caller.
    fn buffers(&self) -> &[f32];
}

/// A differentiable model whose forward pass is a pure function of an externally supplied
/// parameter table.
pub trait Model {
    type Trace: Trace;

    /// Returns the layout of this model's parameters and buffers.
    fn schema(&self) -> &Arc<ParamSchema>;

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `params` - The flat parameters to use, laid out by `schema`.
    /// * `buffers` - The flat buffers to use, laid out by `schema`.
    /// * `x` - The input batch, one sample per row.
    /// * `mode` - Whether to normalize with batch or running statistics.
    ///
    /// # Returns
    /// The trace of the pass or an error if the input or parameters have the wrong size.
    fn forward(
        &self,
        params: &[f32],
        buffers: &[f32],
        x: ArrayView2<f32>,
        mode: Mode,
    ) -> Result<Self::Trace>;

    /// Goes backwards through the model.
    ///
    /// # Arguments
    /// * `params` - The parameters used on the forward pass.
    /// * `trace` - The forward pass trace.
    /// * `d` - The loss derivative with respect to the output.
    /// * `grad` - The buffer where the gradient with respect to `params` gets **overwritten**.
    ///
    /// # Returns
    /// The loss derivative with respect to the input.
    fn backward(
        &self,
        params: &[f32],
        trace: &Self::Trace,
        d: Array2<f32>,
        grad: &mut [f32],
    ) -> Result<Array2<f32>>;

    /// Makes a forward pass using the parameters and buffers of `state`.
    fn predict(&self, state: &ModelState, x: ArrayView2<f32>, mode: Mode) -> Result<Self::Trace> {
        self.forward(state.params(), state.buffers(), x, mode)
    }

    /// Goes backwards through the model returning a freshly allocated gradient.
    fn gradient(&self, params: &[f32], trace: &Self::Trace, d: Array2<f32>) -> Result<Vec<f32>> {
        let mut grad = vec![0.; self.schema().num_params()];
        self.backward(params, trace, d, &mut grad)?;
        Ok(grad)
    }
}
